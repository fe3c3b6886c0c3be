//! Recorded chunks and the ordered list handed to the stream writer.
use std::sync::Arc;

use fxhash::FxHashSet;

/// Serial number of a recorded chunk.
///
/// Serials are allocated monotonically while recording, so the ascending
/// order of serials within one record matches the order in which its
/// mutations were recorded.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct ChunkSerial(pub u64);

/// One serialized mutation/creation event, opaque to the tracking layer.
///
/// The `tag` is driver-defined (it identifies the intercepted call the
/// chunk encodes); the payload is whatever the serialiser produced.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Chunk {
    tag: u32,
    data: Box<[u8]>,
}

impl Chunk {
    pub fn new(tag: u32, data: Vec<u8>) -> Chunk {
        Chunk {
            tag,
            data: data.into_boxed_slice(),
        }
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Ordered mapping from chunk serial to chunk payload.
///
/// Insertion order is preserved: records insert their dependencies'
/// chunks before their own, so iterating the list yields a valid
/// topological order. Inserting the same serial twice is a no-op.
#[derive(Default)]
pub struct ChunkList {
    chunks: Vec<(ChunkSerial, Arc<Chunk>)>,
    seen: FxHashSet<ChunkSerial>,
}

impl ChunkList {
    pub fn new() -> ChunkList {
        ChunkList::default()
    }

    /// Appends a chunk unless its serial is already present.
    pub fn insert(&mut self, serial: ChunkSerial, chunk: Arc<Chunk>) {
        if self.seen.insert(serial) {
            self.chunks.push((serial, chunk));
        }
    }

    pub fn contains(&self, serial: ChunkSerial) -> bool {
        self.seen.contains(&serial)
    }

    pub fn get(&self, serial: ChunkSerial) -> Option<&Arc<Chunk>> {
        self.chunks
            .iter()
            .find(|(s, _)| *s == serial)
            .map(|(_, c)| c)
    }

    /// Chunks in the order they were inserted.
    pub fn iter(&self) -> impl Iterator<Item = (ChunkSerial, &Arc<Chunk>)> {
        self.chunks.iter().map(|(s, c)| (*s, c))
    }

    pub fn serials(&self) -> Vec<ChunkSerial> {
        self.chunks.iter().map(|(s, _)| *s).collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_serials_are_dropped() {
        let mut list = ChunkList::new();
        let c = Arc::new(Chunk::new(1, vec![0xab]));
        list.insert(ChunkSerial(7), c.clone());
        list.insert(ChunkSerial(7), Arc::new(Chunk::new(2, vec![])));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(ChunkSerial(7)).unwrap().tag(), 1);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut list = ChunkList::new();
        for serial in [3u64, 1, 2] {
            list.insert(ChunkSerial(serial), Arc::new(Chunk::new(0, vec![])));
        }
        assert_eq!(
            list.serials(),
            vec![ChunkSerial(3), ChunkSerial(1), ChunkSerial(2)]
        );
    }
}
