//! Portable GPU device layer: resource handles, CPU mappings, command
//! submission and fence waits over a pluggable native driver, plus a
//! host-memory software driver emulating three driver families.

pub mod command_list;
pub mod device;
pub mod driver;
pub mod resources;
pub mod software;
mod update;

pub use command_list::CommandList;
pub use device::GraphicsDevice;
pub use driver::{Command, CompletionHook, DriverCapabilities, MapTarget, NativeDriver, TextureCopy};
pub use resources::{
    BindableResource, Buffer, MappableResource, MappedResource, NamedResource, ResourceSet,
    Sampler, Texture,
};
pub use software::{DriverStats, SoftwareDriver, SoftwareProfile};

pub use rhal_core::Fence;
