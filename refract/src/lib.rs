//! Capture/replay resource tracking for a graphics-API debugger.
//!
//! The interception layer creates a [`ResourceRecord`] per wrapped API
//! object and appends serialized chunks as calls mutate it; the
//! [`ResourceManager`] maps native identities to logical ids, walks the
//! dependency graphs into a topologically ordered [`ChunkList`] at
//! capture time, and drives initial-state reconstruction at replay time.
pub use ash::{self, vk};

pub use chunk::*;
pub use descriptor::*;
pub use error::*;
pub use manager::*;
pub use record::*;
pub use shadow::*;

mod chunk;
mod descriptor;
mod error;
mod manager;
mod record;
mod shadow;
