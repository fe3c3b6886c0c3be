//! Descriptor records.
//!
//! One `Descriptor` tracks the last write into a single descriptor-heap
//! slot. Heaps hold thousands of slots, so the record is kept within a
//! fixed 64-byte ceiling; payload fields use compact crate-local mirrors
//! of the API enums where the full-width ones would not fit.
use bitflags::bitflags;
use ordered_float::OrderedFloat;

use crate::{record::ResourceId, vk};

slotmap::new_key_type! {
    /// Identifies a tracked descriptor heap.
    pub struct DescriptorHeapId;
}

/// Kind of data held in a descriptor slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorType {
    /// The slot was never written. Distinct from every populated kind.
    Empty,
    Sampler,
    ConstantBufferView,
    ShaderResourceView,
    UnorderedAccessView,
    RenderTargetView,
    DepthStencilView,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Filter {
    Nearest = 0,
    Linear = 1,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum MipmapMode {
    Nearest = 0,
    Linear = 1,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum AddressMode {
    Repeat = 0,
    MirroredRepeat = 1,
    ClampToEdge = 2,
    ClampToBorder = 3,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CompareOp {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessOrEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterOrEqual = 6,
    Always = 7,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum BorderColor {
    TransparentBlack = 0,
    OpaqueBlack = 1,
    OpaqueWhite = 2,
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct SamplerFlags: u8 {
        const ANISOTROPY = 0b1;
        const COMPARE = 0b10;
        const UNNORMALIZED_COORDINATES = 0b100;
    }
}

/// Sampler state as written into a sampler descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_mode: MipmapMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub mip_lod_bias: OrderedFloat<f32>,
    pub max_anisotropy: OrderedFloat<f32>,
    pub compare_op: CompareOp,
    pub min_lod: OrderedFloat<f32>,
    pub max_lod: OrderedFloat<f32>,
    pub border_color: BorderColor,
    pub flags: SamplerFlags,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        SamplerDesc {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_mode: MipmapMode::Linear,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mip_lod_bias: 0.0.into(),
            max_anisotropy: 0.0.into(),
            compare_op: CompareOp::Always,
            min_lod: 0.0.into(),
            max_lod: 0.0.into(),
            border_color: BorderColor::OpaqueBlack,
            flags: SamplerFlags::empty(),
        }
    }
}

/// Dimensionality of a view descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ViewDimension {
    Buffer = 0,
    Tex1D = 1,
    Tex1DArray = 2,
    Tex2D = 3,
    Tex2DArray = 4,
    Tex3D = 5,
    Cube = 6,
    CubeArray = 7,
}

/// Mip/layer window of a view descriptor.
///
/// Same shape as the API's subresource range, narrowed to `u16` so view
/// payloads stay within the descriptor ceiling.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SubresourceRange {
    pub base_mip: u16,
    pub mip_count: u16,
    pub base_layer: u16,
    pub layer_count: u16,
}

impl SubresourceRange {
    /// Every mip of the first layer.
    pub const FULL: SubresourceRange = SubresourceRange {
        base_mip: 0,
        mip_count: u16::MAX,
        base_layer: 0,
        layer_count: 1,
    };
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConstantBufferViewDesc {
    pub resource: ResourceId,
    pub offset: u64,
    pub size: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ShaderResourceViewDesc {
    pub resource: ResourceId,
    pub format: vk::Format,
    pub min_lod_clamp: OrderedFloat<f32>,
    pub range: SubresourceRange,
    pub dim: ViewDimension,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct UnorderedAccessViewDesc {
    pub resource: ResourceId,
    /// Resource backing the UAV counter, if the view has one.
    pub counter: ResourceId,
    pub format: vk::Format,
    pub range: SubresourceRange,
    pub dim: ViewDimension,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RenderTargetViewDesc {
    pub resource: ResourceId,
    pub format: vk::Format,
    pub range: SubresourceRange,
    pub dim: ViewDimension,
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct DepthStencilViewFlags: u8 {
        const READ_ONLY_DEPTH = 0b1;
        const READ_ONLY_STENCIL = 0b10;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DepthStencilViewDesc {
    pub resource: ResourceId,
    pub format: vk::Format,
    pub range: SubresourceRange,
    pub dim: ViewDimension,
    pub flags: DepthStencilViewFlags,
}

/// Contents of one descriptor slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorPayload {
    Empty,
    Sampler(SamplerDesc),
    ConstantBufferView(ConstantBufferViewDesc),
    ShaderResourceView(ShaderResourceViewDesc),
    UnorderedAccessView(UnorderedAccessViewDesc),
    RenderTargetView(RenderTargetViewDesc),
    DepthStencilView(DepthStencilViewDesc),
}

impl DescriptorPayload {
    /// The resource a view payload references, if any.
    pub fn resource(&self) -> Option<ResourceId> {
        match *self {
            DescriptorPayload::Empty | DescriptorPayload::Sampler(_) => None,
            DescriptorPayload::ConstantBufferView(d) => Some(d.resource),
            DescriptorPayload::ShaderResourceView(d) => Some(d.resource),
            DescriptorPayload::UnorderedAccessView(d) => Some(d.resource),
            DescriptorPayload::RenderTargetView(d) => Some(d.resource),
            DescriptorPayload::DepthStencilView(d) => Some(d.resource),
        }
    }
}

/// One tracked descriptor: owning heap, slot index, payload.
///
/// The heap/index prefix is readable regardless of what the slot holds;
/// the payload must be matched on before its fields mean anything.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Descriptor {
    heap: DescriptorHeapId,
    index: u32,
    payload: DescriptorPayload,
}

// Heaps hold tens of thousands of these.
const _: () = assert!(
    std::mem::size_of::<Descriptor>() <= 64,
    "Descriptor has gotten larger"
);

impl Default for Descriptor {
    fn default() -> Self {
        Descriptor {
            heap: DescriptorHeapId::default(),
            index: 0,
            payload: DescriptorPayload::Empty,
        }
    }
}

impl Descriptor {
    pub fn new(heap: DescriptorHeapId, index: u32, payload: DescriptorPayload) -> Descriptor {
        Descriptor { heap, index, payload }
    }

    pub fn ty(&self) -> DescriptorType {
        match self.payload {
            DescriptorPayload::Empty => DescriptorType::Empty,
            DescriptorPayload::Sampler(_) => DescriptorType::Sampler,
            DescriptorPayload::ConstantBufferView(_) => DescriptorType::ConstantBufferView,
            DescriptorPayload::ShaderResourceView(_) => DescriptorType::ShaderResourceView,
            DescriptorPayload::UnorderedAccessView(_) => DescriptorType::UnorderedAccessView,
            DescriptorPayload::RenderTargetView(_) => DescriptorType::RenderTargetView,
            DescriptorPayload::DepthStencilView(_) => DescriptorType::DepthStencilView,
        }
    }

    pub fn heap(&self) -> DescriptorHeapId {
        self.heap
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn payload(&self) -> &DescriptorPayload {
        &self.payload
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.payload, DescriptorPayload::Empty)
    }

    /// The resource a view payload references, if any.
    pub fn resource(&self) -> Option<ResourceId> {
        self.payload.resource()
    }
}

/// Tracked contents of one descriptor heap.
pub struct DescriptorHeap {
    id: ResourceId,
    slots: Vec<Descriptor>,
}

impl DescriptorHeap {
    pub(crate) fn new(key: DescriptorHeapId, id: ResourceId, num_slots: u32) -> DescriptorHeap {
        let slots = (0..num_slots)
            .map(|index| Descriptor {
                heap: key,
                index,
                payload: DescriptorPayload::Empty,
            })
            .collect();
        DescriptorHeap { id, slots }
    }

    /// Logical id of the heap object itself.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&Descriptor> {
        self.slots.get(index as usize)
    }

    pub(crate) fn write(&mut self, index: u32, payload: DescriptorPayload) -> Option<&Descriptor> {
        let slot = self.slots.get_mut(index as usize)?;
        slot.payload = payload;
        Some(slot)
    }
}
