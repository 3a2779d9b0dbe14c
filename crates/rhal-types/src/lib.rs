pub mod handle;
pub mod format;
pub mod usage;
pub mod description;
pub mod error;

pub use description::{
    BufferDescription, SamplerAddressMode, SamplerDescription, SamplerFilter, TextureDescription,
    TextureRegion, TextureType,
};
pub use error::{HalError, HalResult};
pub use format::{PixelFormat, SampleCount};
pub use handle::{BackendKind, BatchHandle, NativeHandle, RefCountId, ResourceKind};
pub use usage::{BufferUsage, MapMode, TextureUsage};
