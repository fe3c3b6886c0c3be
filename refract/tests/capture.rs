//! End-to-end capture ordering over a realistic record graph.
use refract::{
    Chunk, ChunkList, ChunkSerial, ContextId, InitialContents, ResourceHandler, ResourceId,
    ResourceManager, ResourceRecord,
};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

struct Driver;

impl ResourceHandler for Driver {
    type Resource = u64;

    fn serialisable_resource(&self, _id: ResourceId, _record: &ResourceRecord) -> bool {
        true
    }

    fn force_initial_state(&self, _res: u64) -> bool {
        true
    }

    fn need_initial_state_chunk(&self, _res: u64) -> bool {
        false
    }

    fn prepare_initial_state(
        &mut self,
        _id: ResourceId,
        res: u64,
    ) -> Result<InitialContents, refract::Error> {
        Ok(InitialContents::new(0x10, res.to_le_bytes().to_vec()))
    }

    fn serialise_initial_state(
        &mut self,
        _id: ResourceId,
        contents: &InitialContents,
    ) -> Result<Chunk, refract::Error> {
        Ok(Chunk::new(contents.tag(), contents.data().unwrap().to_vec()))
    }

    fn create_initial_state(
        &mut self,
        id: ResourceId,
        has_data: bool,
    ) -> Result<u64, refract::Error> {
        assert!(has_data);
        Ok(id.raw() | 0xcafe_0000)
    }

    fn apply_initial_state(
        &mut self,
        _live: u64,
        contents: &InitialContents,
    ) -> Result<(), refract::Error> {
        assert_eq!(contents.data().map(|d| d.len()), Some(8));
        Ok(())
    }
}

/// Buffer A with view B and sub-resource A[0]: rooting the capture at B
/// pulls A's chunks first, then B's, and leaves A[0] out until A itself
/// is rooted.
#[test]
fn rooted_insertion_pulls_dependencies_not_sub_resources() {
    init_logging();

    let mut manager: ResourceManager<u64> = ResourceManager::new();
    let a = manager.register(0xa);
    let b = manager.register(0xb);
    let a0 = manager.new_record();
    b.add_parent(&a);
    a.add_sub_resource(a0.clone());

    let a1 = manager.next_serial();
    a.add_chunk(a1, Chunk::new(1, b"create buffer".to_vec()));
    let b1 = manager.next_serial();
    b.add_chunk(b1, Chunk::new(2, b"create view".to_vec()));
    let a0_chunk = manager.next_serial();
    a0.add_chunk(a0_chunk, Chunk::new(3, b"upload mip 0".to_vec()));

    manager.begin_capture();
    let list = manager.serialise_capture(&[b.id()]).unwrap();
    assert_eq!(list.serials(), vec![a1, b1]);
    assert!(!list.contains(a0_chunk));
    let tags: Vec<u32> = list.iter().map(|(_, chunk)| chunk.tag()).collect();
    assert_eq!(tags, vec![1, 2]);

    // A capture rooted at the owning buffer does bring the sub-resource.
    manager.begin_capture();
    let list = manager.serialise_capture(&[a.id()]).unwrap();
    assert_eq!(list.serials(), vec![a1, a0_chunk]);
}

#[test]
fn mapped_write_diff_feeds_a_minimal_chunk() {
    init_logging();

    let mut manager: ResourceManager<u64> = ResourceManager::new();
    let buffer = manager.register(0xbeef);
    let id = buffer.id();

    // A deferred context maps 1 KiB of the buffer.
    let ctx = buffer.acquire_context_id();
    assert!(!ctx.is_immediate());
    buffer.alloc_shadow_storage(ctx, 1024);

    // The application writes 16 bytes in the middle of the range.
    buffer
        .with_shadow(ctx, |_, after| {
            for (i, byte) in after[512..528].iter_mut().enumerate() {
                *byte = i as u8 + 1;
            }
        })
        .unwrap();

    manager.verify_shadow(id, ctx).unwrap();
    let range = buffer.shadow_diff(ctx).unwrap();
    assert_eq!(range, 512..528);

    let payload = buffer
        .with_shadow(ctx, |_, after| after[range.clone()].to_vec())
        .unwrap();
    let serial = manager.next_serial();
    buffer.add_chunk(serial, Chunk::new(4, payload));
    buffer.release_context_id(ctx);

    let list = manager.serialise_capture(&[id]).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list.get(serial).unwrap().data().len(), 16);
}

#[test]
fn initial_states_round_trip_through_the_handler() {
    init_logging();

    let mut manager: ResourceManager<u64> = ResourceManager::new();
    let mut driver = Driver;
    let texture = manager.register(0x7e);
    let id = texture.id();

    manager.begin_capture();
    assert_eq!(manager.prepare_initial_states(&mut driver).unwrap(), 1);
    let initial = manager.serialise_initial_states(&mut driver).unwrap();
    assert_eq!(initial.len(), 1);

    manager.create_initial_states(&mut driver).unwrap();
    manager.apply_initial_states(&mut driver).unwrap();
    assert_eq!(manager.live_resource(id), Some(id.raw() | 0xcafe_0000));
}

#[test]
fn shadow_sides_are_independent_copies() {
    init_logging();

    let record = ResourceRecord::new(ResourceId::from_raw(99));
    let ctx = ContextId::IMMEDIATE;
    record.alloc_shadow_storage(ctx, 64);
    record
        .with_shadow(ctx, |before, after| {
            before.fill(0x11);
            after.fill(0x11);
            after[0] = 0x22;
        })
        .unwrap();
    assert_eq!(record.shadow_diff(ctx), Some(0..1));

    // Inserting the same record twice in one pass emits its chunks once.
    let mut list = ChunkList::new();
    record.add_chunk(ChunkSerial(500), Chunk::new(0, vec![]));
    record.insert(&mut list);
    record.insert(&mut list);
    assert_eq!(list.len(), 1);
}
