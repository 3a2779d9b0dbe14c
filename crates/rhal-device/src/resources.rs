//! Application-facing resource handles.
//!
//! Handles are owned and not `Clone`: each one is exactly the creator's
//! claim on the object. Dropping it releases that claim; the native object
//! goes away once every binding and pending batch has released theirs too.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use rhal_core::{MappingKey, NativeMapping, ResourceLifetimeManager};
use rhal_types::{
    BufferDescription, MapMode, NativeHandle, RefCountId, SamplerDescription, TextureDescription,
};
use tracing::error;

/// The creator's claim on one reference-counted object.
pub(crate) struct Claim {
    pub(crate) id: RefCountId,
    pub(crate) native: NativeHandle,
    pub(crate) device_id: u64,
    pub(crate) lifetime: Arc<ResourceLifetimeManager>,
    pub(crate) name: Mutex<Option<String>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Err(e) = self.lifetime.decrement(self.id) {
            error!("releasing {:?} {}: {}", self.native.kind, self.id, e);
        }
    }
}

macro_rules! handle_accessors {
    ($ty:ident) => {
        impl $ty {
            pub fn id(&self) -> RefCountId {
                self.claim.id
            }

            pub fn native(&self) -> NativeHandle {
                self.claim.native
            }

            pub fn name(&self) -> Option<String> {
                self.claim.name.lock().clone()
            }

            /// Release the creator's claim now rather than at end of scope.
            pub fn dispose(self) {}
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("id", &self.claim.id)
                    .field("native", &format_args!("{:#x}", self.claim.native.raw))
                    .finish()
            }
        }
    };
}

pub struct Buffer {
    pub(crate) claim: Claim,
    pub(crate) desc: BufferDescription,
}

impl Buffer {
    pub fn description(&self) -> &BufferDescription {
        &self.desc
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.desc.size_in_bytes
    }
}

pub struct Texture {
    pub(crate) claim: Claim,
    pub(crate) desc: TextureDescription,
}

impl Texture {
    pub fn description(&self) -> &TextureDescription {
        &self.desc
    }
}

pub struct Sampler {
    pub(crate) claim: Claim,
    pub(crate) desc: SamplerDescription,
}

impl Sampler {
    pub fn description(&self) -> &SamplerDescription {
        &self.desc
    }
}

pub struct ResourceSet {
    pub(crate) claim: Claim,
    pub(crate) constituents: Vec<RefCountId>,
}

impl ResourceSet {
    /// Ids of every bound resource, in binding order.
    pub fn constituents(&self) -> &[RefCountId] {
        &self.constituents
    }
}

handle_accessors!(Buffer);
handle_accessors!(Texture);
handle_accessors!(Sampler);
handle_accessors!(ResourceSet);

/// Anything a resource set can bind.
#[derive(Clone, Copy)]
pub enum BindableResource<'a> {
    Buffer(&'a Buffer),
    Texture(&'a Texture),
    Sampler(&'a Sampler),
}

impl BindableResource<'_> {
    pub(crate) fn claim(&self) -> &Claim {
        match self {
            BindableResource::Buffer(b) => &b.claim,
            BindableResource::Texture(t) => &t.claim,
            BindableResource::Sampler(s) => &s.claim,
        }
    }
}

impl<'a> From<&'a Buffer> for BindableResource<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        BindableResource::Buffer(buffer)
    }
}

impl<'a> From<&'a Texture> for BindableResource<'a> {
    fn from(texture: &'a Texture) -> Self {
        BindableResource::Texture(texture)
    }
}

impl<'a> From<&'a Sampler> for BindableResource<'a> {
    fn from(sampler: &'a Sampler) -> Self {
        BindableResource::Sampler(sampler)
    }
}

/// Anything that can be mapped: a buffer or a texture subresource.
#[derive(Clone, Copy)]
pub enum MappableResource<'a> {
    Buffer(&'a Buffer),
    Texture(&'a Texture),
}

impl MappableResource<'_> {
    pub(crate) fn claim(&self) -> &Claim {
        match self {
            MappableResource::Buffer(b) => &b.claim,
            MappableResource::Texture(t) => &t.claim,
        }
    }
}

impl<'a> From<&'a Buffer> for MappableResource<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        MappableResource::Buffer(buffer)
    }
}

impl<'a> From<&'a Texture> for MappableResource<'a> {
    fn from(texture: &'a Texture) -> Self {
        MappableResource::Texture(texture)
    }
}

/// A CPU view of a mapped buffer or texture subresource.
///
/// Valid until the balancing `unmap`. The raw views are `unsafe` because
/// other holders of the same mapping may touch the bytes concurrently;
/// [`crate::GraphicsDevice::read_mapped`] and
/// [`crate::GraphicsDevice::write_mapped`] are the checked alternatives.
#[derive(Debug, Clone, Copy)]
pub struct MappedResource {
    pub(crate) key: MappingKey,
    pub mode: MapMode,
    ptr: NonNull<u8>,
    pub size_in_bytes: u64,
    pub row_pitch: u32,
    pub depth_pitch: u32,
}

impl MappedResource {
    pub(crate) fn new(key: MappingKey, mode: MapMode, mapping: NativeMapping) -> Self {
        Self {
            key,
            mode,
            ptr: mapping.ptr,
            size_in_bytes: mapping.size_in_bytes,
            row_pitch: mapping.row_pitch,
            depth_pitch: mapping.depth_pitch,
        }
    }

    pub fn resource(&self) -> RefCountId {
        self.key.resource
    }

    pub fn subresource(&self) -> u32 {
        self.key.subresource
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// # Safety
    /// The mapping must still be live and no other holder may be writing
    /// the same bytes.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size_in_bytes as usize) }
    }

    /// # Safety
    /// The mapping must still be live, mapped writable, and no other holder
    /// may be accessing the same bytes.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size_in_bytes as usize) }
    }
}

// Same contract as the native mapping it was built from.
unsafe impl Send for MappedResource {}
unsafe impl Sync for MappedResource {}

/// Anything that can carry a debug name.
#[derive(Clone, Copy)]
pub enum NamedResource<'a> {
    Buffer(&'a Buffer),
    Texture(&'a Texture),
    Sampler(&'a Sampler),
    ResourceSet(&'a ResourceSet),
}

impl NamedResource<'_> {
    pub(crate) fn claim(&self) -> &Claim {
        match self {
            NamedResource::Buffer(b) => &b.claim,
            NamedResource::Texture(t) => &t.claim,
            NamedResource::Sampler(s) => &s.claim,
            NamedResource::ResourceSet(r) => &r.claim,
        }
    }
}

impl<'a> From<&'a Buffer> for NamedResource<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        NamedResource::Buffer(buffer)
    }
}

impl<'a> From<&'a Texture> for NamedResource<'a> {
    fn from(texture: &'a Texture) -> Self {
        NamedResource::Texture(texture)
    }
}

impl<'a> From<&'a Sampler> for NamedResource<'a> {
    fn from(sampler: &'a Sampler) -> Self {
        NamedResource::Sampler(sampler)
    }
}

impl<'a> From<&'a ResourceSet> for NamedResource<'a> {
    fn from(set: &'a ResourceSet) -> Self {
        NamedResource::ResourceSet(set)
    }
}
