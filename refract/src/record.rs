//! Per-resource capture bookkeeping.
//!
//! A `ResourceRecord` is created by the interception layer for every
//! tracked API object. It accumulates the serialized chunks describing
//! the object's mutations, the dependency edges to the records it cannot
//! be replayed without, per-mip/per-slice sub-records, and the shadow
//! storage used to diff mapped writes.
use std::{
    collections::BTreeMap,
    ops::Range,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use tracing::{error, trace};

use crate::{
    chunk::{Chunk, ChunkList, ChunkSerial},
    shadow::{find_diff_range, ContextId, ShadowStorage, MAX_CONTEXTS},
};

/// Stable logical identity of a tracked resource, independent of the
/// native object's lifetime and shared between capture and replay.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct ResourceId(u64);

impl ResourceId {
    pub const NULL: ResourceId = ResourceId(0);

    pub fn from_raw(raw: u64) -> ResourceId {
        ResourceId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Slots 1..=31 hand out deferred-context ids; slot 0 belongs to the
/// immediate context and is never allocated.
#[derive(Default)]
struct ContextPool {
    taken: [bool; MAX_CONTEXTS],
}

impl ContextPool {
    fn acquire(&mut self) -> Option<ContextId> {
        for i in 1..MAX_CONTEXTS {
            if !self.taken[i] {
                self.taken[i] = true;
                return Some(ContextId::new(i as u32));
            }
        }
        None
    }

    fn release(&mut self, ctx: ContextId) {
        self.taken[ctx.index()] = false;
    }
}

#[derive(Default)]
struct RecordInner {
    parents: Vec<Arc<ResourceRecord>>,
    chunks: BTreeMap<ChunkSerial, Arc<Chunk>>,
    sub_resources: Vec<Arc<ResourceRecord>>,
    shadow: ShadowStorage,
    contexts: ContextPool,
}

/// Capture bookkeeping for one tracked resource.
///
/// Records are shared (`Arc`) between the identity registry, parent edge
/// lists and owning sub-resource lists; all mutable state sits behind a
/// single per-record mutex. The traversal mark is a relaxed atomic so the
/// serialization walk never holds the lock across recursion.
pub struct ResourceRecord {
    id: ResourceId,
    ignore_serialise: AtomicBool,
    data_written: AtomicBool,
    data_offset: AtomicU64,
    inner: Mutex<RecordInner>,
}

impl ResourceRecord {
    pub fn new(id: ResourceId) -> Arc<ResourceRecord> {
        Arc::new(ResourceRecord {
            id,
            ignore_serialise: AtomicBool::new(false),
            data_written: AtomicBool::new(false),
            data_offset: AtomicU64::new(0),
            inner: Mutex::new(RecordInner::default()),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Excludes this record's chunks from every capture. Used for
    /// resources whose state is rebuilt structurally at replay.
    pub fn set_ignore_serialise(&self, ignore: bool) {
        self.ignore_serialise.store(ignore, Ordering::Relaxed);
    }

    pub fn ignore_serialise(&self) -> bool {
        self.ignore_serialise.load(Ordering::Relaxed)
    }

    /// Offset of this record's data in the capture file, propagated to
    /// sub-resources so they resolve against the same region.
    pub fn set_data_offset(&self, offset: u64) {
        self.data_offset.store(offset, Ordering::Relaxed);
        let subs = self.inner.lock().unwrap().sub_resources.clone();
        for sub in subs {
            sub.set_data_offset(offset);
        }
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset.load(Ordering::Relaxed)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Adds a dependency edge to `parent`. Duplicate edges (same logical
    /// id) are dropped.
    pub fn add_parent(&self, parent: &Arc<ResourceRecord>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.parents.iter().all(|p| p.id != parent.id) {
            trace!(child = ?self.id, parent = ?parent.id, "add_parent");
            inner.parents.push(parent.clone());
        }
    }

    pub fn num_parents(&self) -> usize {
        self.inner.lock().unwrap().parents.len()
    }

    /// Attaches a sub-resource record (per-mip/per-slice). The sub-record
    /// is owned by this record and dies with it.
    pub fn add_sub_resource(&self, sub: Arc<ResourceRecord>) {
        self.inner.lock().unwrap().sub_resources.push(sub);
    }

    pub fn sub_resources(&self) -> Vec<Arc<ResourceRecord>> {
        self.inner.lock().unwrap().sub_resources.clone()
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn add_chunk(&self, serial: ChunkSerial, chunk: Chunk) {
        self.inner
            .lock()
            .unwrap()
            .chunks
            .insert(serial, Arc::new(chunk));
    }

    pub fn clear_chunks(&self) {
        self.inner.lock().unwrap().chunks.clear();
    }

    pub fn num_chunks(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    /// Whether this record's chunks have already been merged into an
    /// output set during the current serialization pass.
    pub fn data_written(&self) -> bool {
        self.data_written.load(Ordering::Relaxed)
    }

    /// Clears the traversal mark ahead of a new serialization pass.
    pub fn reset_data_written(&self) {
        self.data_written.store(false, Ordering::Relaxed);
    }

    /// Merges this record's chunks and those of its transitive dependency
    /// closure into `list`, dependencies first.
    ///
    /// Every reached record is pre-marked before traversal, so shared
    /// parents are emitted once and defensive cycles terminate. Records
    /// reached as dependencies contribute their own chunks only;
    /// sub-resources are pulled in when their owning record is inserted,
    /// not through a dependent's parent chain.
    pub fn insert(&self, list: &mut ChunkList) {
        self.insert_impl(list, true);
    }

    fn insert_impl(&self, list: &mut ChunkList, with_sub_resources: bool) {
        let already_written = self.data_written.swap(true, Ordering::Relaxed);

        let parents = self.inner.lock().unwrap().parents.clone();
        for parent in &parents {
            if !parent.data_written() {
                parent.insert_impl(list, false);
            }
        }

        if !already_written {
            let (chunks, subs) = {
                let inner = self.inner.lock().unwrap();
                let subs = if with_sub_resources {
                    inner.sub_resources.clone()
                } else {
                    Vec::new()
                };
                (inner.chunks.clone(), subs)
            };
            if !self.ignore_serialise() {
                for (serial, chunk) in chunks {
                    list.insert(serial, chunk);
                }
            }
            for sub in &subs {
                sub.insert_impl(list, true);
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Hands out a free deferred-context id for this record.
    ///
    /// Exhaustion returns [`ContextId::IMMEDIATE`] as a fail-safe; it
    /// signals a context leak or pathological fan-out of deferred
    /// contexts mapping the same resource.
    pub fn acquire_context_id(&self) -> ContextId {
        match self.inner.lock().unwrap().contexts.acquire() {
            Some(ctx) => ctx,
            None => {
                error!(
                    resource = ?self.id,
                    "all {} deferred context ids in use; context leak, or that many \
                     contexts really are mapping one resource",
                    MAX_CONTEXTS - 1
                );
                ContextId::IMMEDIATE
            }
        }
    }

    /// Returns `ctx` to the pool. Double release is a caller bug and is
    /// not detected.
    pub fn release_context_id(&self, ctx: ContextId) {
        self.inner.lock().unwrap().contexts.release(ctx);
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Lazily allocates the shadow pair for `ctx`. Idempotent.
    pub fn alloc_shadow_storage(&self, ctx: ContextId, size: usize) {
        self.inner.lock().unwrap().shadow.alloc(ctx, size);
    }

    /// Checks the guard bytes of `ctx`'s shadow pair. A failure means the
    /// application wrote past the end of its mapped range.
    pub fn verify_shadow_storage(&self, ctx: ContextId) -> bool {
        let ok = self.inner.lock().unwrap().shadow.verify(ctx);
        if !ok {
            error!(resource = ?self.id, ?ctx, "shadow guard bytes overwritten");
        }
        ok
    }

    pub fn free_shadow_storage(&self) {
        self.inner.lock().unwrap().shadow.free_all();
    }

    pub fn shadow_size(&self, ctx: ContextId) -> Option<usize> {
        self.inner.lock().unwrap().shadow.size(ctx)
    }

    /// Runs `f` over the before/after data regions of `ctx`'s shadow
    /// pair. Returns `None` if the context has no storage.
    pub fn with_shadow<R>(&self, ctx: ContextId, f: impl FnOnce(&mut [u8], &mut [u8]) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        let (before, after) = inner.shadow.both_mut(ctx)?;
        Some(f(before, after))
    }

    /// Byte range the application touched between the two shadow copies;
    /// `None` if the context has no storage or nothing changed.
    pub fn shadow_diff(&self, ctx: ContextId) -> Option<Range<usize>> {
        let mut inner = self.inner.lock().unwrap();
        let (before, after) = inner.shadow.both_mut(ctx)?;
        find_diff_range(before, after)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_shadow(&self, ctx: ContextId) {
        self.inner
            .lock()
            .unwrap()
            .shadow
            .corrupt_guard(ctx, crate::shadow::ShadowSide::After);
    }
}

impl Drop for ResourceRecord {
    fn drop(&mut self) {
        trace!(resource = ?self.id, "record destroyed");
    }
}
