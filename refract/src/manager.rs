//! Resource lifecycle orchestration across a capture/replay cycle.
//!
//! The manager owns the identity maps between native object handles and
//! logical ids, the per-resource capture state machine, and the
//! descriptor-heap registry. The driver layer supplies the type-specific
//! knowledge (what is serialisable, how to snapshot and rebuild a given
//! object kind) through a [`ResourceHandler`].
use std::{hash::Hash, sync::Arc};

use fxhash::FxHashMap;
use slotmap::SlotMap;
use tracing::{debug, error};

use crate::{
    chunk::{Chunk, ChunkList, ChunkSerial},
    descriptor::{Descriptor, DescriptorHeap, DescriptorHeapId, DescriptorPayload},
    error::Error,
    record::{ResourceId, ResourceRecord},
    shadow::ContextId,
};

/// Where a resource stands in the current capture/replay cycle.
/// Transitions only move forward; a new cycle starts with
/// [`ResourceManager::begin_capture`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CaptureState {
    Untracked,
    Live,
    Snapshotted,
    Serialized,
    Created,
    Applied,
}

/// Snapshot of a resource's contents at capture time.
///
/// `has_data` distinguishes a real payload from structural-only metadata
/// (a resource whose contents are rebuilt rather than restored). The tag
/// is driver-defined.
#[derive(Debug, Clone)]
pub struct InitialContents {
    tag: u32,
    data: Option<Vec<u8>>,
}

impl InitialContents {
    pub fn new(tag: u32, data: Vec<u8>) -> InitialContents {
        InitialContents {
            tag,
            data: Some(data),
        }
    }

    /// Metadata-only snapshot; replay rebuilds the contents structurally.
    pub fn structural(tag: u32) -> InitialContents {
        InitialContents { tag, data: None }
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

/// Driver-side hooks the manager orchestrates a capture through.
///
/// `Resource` is the driver's native handle type for wrapped objects.
pub trait ResourceHandler {
    type Resource: Copy;

    /// Whether this resource kind participates in capture at all.
    fn serialisable_resource(&self, id: ResourceId, record: &ResourceRecord) -> bool;

    /// Resource kinds that always need a full snapshot, dirty or not.
    fn force_initial_state(&self, res: Self::Resource) -> bool;

    /// Whether the capture is self-contained without an initial-state
    /// chunk for this resource.
    fn need_initial_state_chunk(&self, res: Self::Resource) -> bool;

    /// Capture-time: snapshot the resource's current contents.
    fn prepare_initial_state(
        &mut self,
        id: ResourceId,
        res: Self::Resource,
    ) -> Result<InitialContents, Error>;

    /// Capture-time: encode a prepared snapshot as a chunk for the
    /// stream writer.
    fn serialise_initial_state(
        &mut self,
        id: ResourceId,
        contents: &InitialContents,
    ) -> Result<Chunk, Error>;

    /// Replay-time: build a live object for `id`. `has_data` tells the
    /// driver whether real contents follow or only structural metadata
    /// was captured.
    fn create_initial_state(
        &mut self,
        id: ResourceId,
        has_data: bool,
    ) -> Result<Self::Resource, Error>;

    /// Replay-time: restore the snapshot contents into the live object.
    fn apply_initial_state(
        &mut self,
        live: Self::Resource,
        contents: &InitialContents,
    ) -> Result<(), Error>;
}

/// Maps native object identities to stable logical identities and drives
/// records through the capture state machine.
///
/// The manager itself expects exclusive access (`&mut self`); records it
/// hands out are individually lockable and may be used concurrently by
/// recording contexts.
pub struct ResourceManager<H: Copy + Eq + Hash> {
    next_id: u64,
    next_serial: u64,
    ids: FxHashMap<H, ResourceId>,
    natives: FxHashMap<ResourceId, H>,
    records: FxHashMap<ResourceId, Arc<ResourceRecord>>,
    states: FxHashMap<ResourceId, CaptureState>,
    initial: FxHashMap<ResourceId, InitialContents>,
    live: FxHashMap<ResourceId, H>,
    heaps: SlotMap<DescriptorHeapId, DescriptorHeap>,
    corrupted: Option<ResourceId>,
}

impl<H: Copy + Eq + Hash> Default for ResourceManager<H> {
    fn default() -> Self {
        ResourceManager::new()
    }
}

impl<H: Copy + Eq + Hash> ResourceManager<H> {
    pub fn new() -> ResourceManager<H> {
        ResourceManager {
            next_id: 1,
            next_serial: 1,
            ids: FxHashMap::default(),
            natives: FxHashMap::default(),
            records: FxHashMap::default(),
            states: FxHashMap::default(),
            initial: FxHashMap::default(),
            live: FxHashMap::default(),
            heaps: SlotMap::with_key(),
            corrupted: None,
        }
    }

    /// Allocates the serial for the next recorded chunk.
    pub fn next_serial(&mut self) -> ChunkSerial {
        let serial = ChunkSerial(self.next_serial);
        self.next_serial += 1;
        serial
    }

    /// Creates a record with a fresh logical id, without a native
    /// binding. Used for sub-resources and heap bookkeeping records.
    pub fn new_record(&mut self) -> Arc<ResourceRecord> {
        let id = ResourceId::from_raw(self.next_id);
        self.next_id += 1;
        let record = ResourceRecord::new(id);
        self.records.insert(id, record.clone());
        self.states.insert(id, CaptureState::Live);
        record
    }

    /// Binds a native object to a record, creating one on first sight.
    pub fn register(&mut self, native: H) -> Arc<ResourceRecord> {
        if let Some(&id) = self.ids.get(&native) {
            return self.records[&id].clone();
        }
        let record = self.new_record();
        let id = record.id();
        debug!(resource = ?id, "register");
        self.ids.insert(native, id);
        self.natives.insert(id, native);
        record
    }

    /// Logical id bound to a native object, if it is tracked.
    pub fn resource_id(&self, native: H) -> Option<ResourceId> {
        self.ids.get(&native).copied()
    }

    pub fn record(&self, id: ResourceId) -> Option<&Arc<ResourceRecord>> {
        self.records.get(&id)
    }

    /// Drops a native object's tracking once its refcount hits zero.
    /// The record itself survives as long as other records still hold
    /// dependency edges to it.
    pub fn release(&mut self, native: H) -> bool {
        let id = match self.ids.remove(&native) {
            Some(id) => id,
            None => return false,
        };
        debug!(resource = ?id, "release");
        self.natives.remove(&id);
        self.records.remove(&id);
        self.states.remove(&id);
        self.initial.remove(&id);
        self.live.remove(&id);
        true
    }

    pub fn state(&self, id: ResourceId) -> CaptureState {
        self.states
            .get(&id)
            .copied()
            .unwrap_or(CaptureState::Untracked)
    }

    fn advance(&mut self, id: ResourceId, to: CaptureState) -> Result<(), Error> {
        let from = self.state(id);
        if to == from {
            return Ok(());
        }
        if to < from {
            error!(resource = ?id, ?from, ?to, "capture state moved backwards");
            return Err(Error::InvalidTransition { id, from, to });
        }
        self.states.insert(id, to);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Starts a new capture cycle: every tracked resource returns to
    /// `Live`, traversal marks and stored snapshots are cleared, and a
    /// previous cycle's invalidation is forgotten.
    pub fn begin_capture(&mut self) {
        debug!("begin_capture");
        self.corrupted = None;
        self.initial.clear();
        for (id, record) in &self.records {
            record.reset_data_written();
            self.states.insert(*id, CaptureState::Live);
        }
    }

    /// Flags the in-flight capture as invalid; its diff data cannot be
    /// trusted once a shadow guard was overwritten.
    pub fn invalidate_capture(&mut self, id: ResourceId) {
        error!(resource = ?id, "capture invalidated");
        self.corrupted = Some(id);
    }

    pub fn capture_valid(&self) -> bool {
        self.corrupted.is_none()
    }

    /// Guard check for a mapped write under `ctx`; a failure invalidates
    /// the capture and reports the offending resource.
    pub fn verify_shadow(&mut self, id: ResourceId, ctx: ContextId) -> Result<(), Error> {
        let record = self
            .records
            .get(&id)
            .ok_or(Error::UnknownResource(id))?
            .clone();
        if record.verify_shadow_storage(ctx) {
            Ok(())
        } else {
            self.invalidate_capture(id);
            Err(Error::ShadowCorrupted(id))
        }
    }

    /// Snapshots every serialisable resource the handler wants an
    /// initial state for. Returns how many snapshots were taken.
    pub fn prepare_initial_states<R>(&mut self, handler: &mut R) -> Result<usize, Error>
    where
        R: ResourceHandler<Resource = H>,
    {
        let targets: Vec<(ResourceId, H)> = self.natives.iter().map(|(&id, &h)| (id, h)).collect();
        let mut prepared = 0;
        for (id, native) in targets {
            let record = self.records[&id].clone();
            if record.ignore_serialise() || !handler.serialisable_resource(id, &record) {
                continue;
            }
            if handler.force_initial_state(native) || handler.need_initial_state_chunk(native) {
                let contents = handler.prepare_initial_state(id, native)?;
                self.initial.insert(id, contents);
                self.advance(id, CaptureState::Snapshotted)?;
                prepared += 1;
            }
        }
        debug!(prepared, "prepared initial states");
        Ok(prepared)
    }

    /// Encodes the prepared snapshots as chunks, in ascending id order.
    pub fn serialise_initial_states<R>(&mut self, handler: &mut R) -> Result<ChunkList, Error>
    where
        R: ResourceHandler<Resource = H>,
    {
        let mut ids: Vec<ResourceId> = self.initial.keys().copied().collect();
        ids.sort();

        let mut list = ChunkList::new();
        for id in ids {
            let contents = self.initial[&id].clone();
            let chunk = handler.serialise_initial_state(id, &contents)?;
            let serial = self.next_serial();
            list.insert(serial, Arc::new(chunk));
            self.advance(id, CaptureState::Serialized)?;
        }
        Ok(list)
    }

    /// Walks the dependency graphs of `roots` and emits their chunks and
    /// those of their transitive dependency closure, dependencies first.
    ///
    /// Refuses if the capture was invalidated by a shadow-guard failure.
    pub fn serialise_capture(&mut self, roots: &[ResourceId]) -> Result<ChunkList, Error> {
        if let Some(id) = self.corrupted {
            return Err(Error::CaptureInvalidated(id));
        }
        let mut list = ChunkList::new();
        for &id in roots {
            let record = self
                .records
                .get(&id)
                .ok_or(Error::UnknownResource(id))?
                .clone();
            if record.ignore_serialise() {
                continue;
            }
            record.insert(&mut list);
            self.advance(id, CaptureState::Serialized)?;
        }
        Ok(list)
    }

    /// Snapshot stored for `id`, if one was prepared or loaded.
    pub fn initial_contents(&self, id: ResourceId) -> Option<&InitialContents> {
        self.initial.get(&id)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Installs a deserialized snapshot ahead of replay.
    pub fn load_initial_contents(&mut self, id: ResourceId, contents: InitialContents) {
        self.initial.insert(id, contents);
    }

    /// Builds live objects for every stored snapshot, ascending id order.
    pub fn create_initial_states<R>(&mut self, handler: &mut R) -> Result<(), Error>
    where
        R: ResourceHandler<Resource = H>,
    {
        let mut ids: Vec<ResourceId> = self.initial.keys().copied().collect();
        ids.sort();
        for id in ids {
            let has_data = self.initial[&id].has_data();
            let live = handler.create_initial_state(id, has_data)?;
            self.live.insert(id, live);
            self.advance(id, CaptureState::Created)?;
        }
        Ok(())
    }

    /// Restores snapshot contents into the live objects built by
    /// [`create_initial_states`](Self::create_initial_states).
    pub fn apply_initial_states<R>(&mut self, handler: &mut R) -> Result<(), Error>
    where
        R: ResourceHandler<Resource = H>,
    {
        let mut ids: Vec<ResourceId> = self.initial.keys().copied().collect();
        ids.sort();
        for id in ids {
            let live = *self.live.get(&id).ok_or(Error::UnknownResource(id))?;
            let contents = self.initial[&id].clone();
            handler.apply_initial_state(live, &contents)?;
            self.advance(id, CaptureState::Applied)?;
        }
        Ok(())
    }

    /// Replay-side handle built for `id`, once created.
    pub fn live_resource(&self, id: ResourceId) -> Option<H> {
        self.live.get(&id).copied()
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Tracks a descriptor heap of `num_slots` slots, backed by its own
    /// bookkeeping record.
    pub fn create_descriptor_heap(&mut self, num_slots: u32) -> DescriptorHeapId {
        let record = self.new_record();
        let id = record.id();
        let key = self
            .heaps
            .insert_with_key(|key| DescriptorHeap::new(key, id, num_slots));
        debug!(resource = ?id, slots = num_slots, "descriptor heap tracked");
        key
    }

    pub fn heap(&self, heap: DescriptorHeapId) -> Option<&DescriptorHeap> {
        self.heaps.get(heap)
    }

    pub fn descriptor(&self, heap: DescriptorHeapId, index: u32) -> Option<&Descriptor> {
        self.heaps.get(heap).and_then(|h| h.get(index))
    }

    /// Records a descriptor write into a heap slot.
    ///
    /// A view payload makes the heap's record depend on the viewed
    /// resource, so serializing anything that references the heap pulls
    /// the viewed resource's chunks in first. A payload referencing an
    /// untracked resource is rejected rather than left dangling.
    pub fn write_descriptor(
        &mut self,
        heap: DescriptorHeapId,
        index: u32,
        payload: DescriptorPayload,
    ) -> Result<(), Error> {
        let heap = self.heaps.get_mut(heap).ok_or(Error::UnknownHeap)?;
        if index >= heap.len() {
            return Err(Error::DescriptorOutOfBounds {
                index,
                len: heap.len(),
            });
        }
        let heap_id = heap.id();

        // Reject dangling references before touching the slot.
        if let Some(viewed) = payload.resource() {
            let viewed_record = self
                .records
                .get(&viewed)
                .ok_or(Error::UnknownResource(viewed))?;
            self.records[&heap_id].add_parent(viewed_record);
        }
        heap.write(index, payload);
        Ok(())
    }
}
