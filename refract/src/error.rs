use crate::{manager::CaptureState, record::ResourceId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceId),
    #[error("unknown descriptor heap")]
    UnknownHeap,
    #[error("descriptor slot {index} out of bounds for heap of {len} slots")]
    DescriptorOutOfBounds { index: u32, len: u32 },
    #[error("invalid capture state transition for {id:?}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: ResourceId,
        from: CaptureState,
        to: CaptureState,
    },
    #[error("shadow storage of {0:?} failed guard verification")]
    ShadowCorrupted(ResourceId),
    #[error("capture invalidated by corrupted resource {0:?}")]
    CaptureInvalidated(ResourceId),
}
