//! The seam between the portable device layer and a native driver.
//!
//! Everything below this trait is backend specific: object storage, map
//! semantics, pitch padding and how batches complete. Everything above it
//! (mapping table, lifetimes, fences, update selection) is shared.

use std::ops::Range;
use std::sync::Arc;

use rhal_core::pitch::{Extent, Origin, PitchLayout};
use rhal_core::NativeMapping;
use rhal_types::{
    BackendKind, BatchHandle, BufferDescription, HalResult, MapMode, NativeHandle, PixelFormat,
    SampleCount, SamplerDescription, TextureDescription, TextureRegion,
};

/// Invoked by drivers that complete batches off-thread, after a batch
/// has been marked complete.
pub type CompletionHook = Arc<dyn Fn() + Send + Sync>;

/// Static facts about a driver that shape the portable layer's choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// Textures can be written without a staging copy
    pub direct_texture_updates: bool,
    /// Buffers live in host-visible memory for their whole lifetime
    pub persistent_buffer_mapping: bool,
    /// Objects can carry debug labels
    pub debug_labels: bool,
    /// Batches complete on another thread
    pub async_completion: bool,
}

/// What a native map/unmap call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapTarget {
    Buffer(NativeHandle),
    Texture {
        texture: NativeHandle,
        subresource: u32,
    },
}

/// One texture-to-texture copy inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCopy {
    pub src: NativeHandle,
    pub src_origin: Origin,
    pub src_mip: u32,
    pub src_layer: u32,
    pub dst: NativeHandle,
    pub dst_origin: Origin,
    pub dst_mip: u32,
    pub dst_layer: u32,
    pub extent: Extent,
    pub format: PixelFormat,
}

/// A recorded GPU command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CopyBuffer {
        src: NativeHandle,
        src_offset: u64,
        dst: NativeHandle,
        dst_offset: u64,
        size: u64,
    },
    CopyTexture(TextureCopy),
    BindResourceSet {
        slot: u32,
        set: NativeHandle,
    },
}

impl Command {
    /// Native objects the command reads or writes.
    pub fn referenced(&self) -> Vec<NativeHandle> {
        match self {
            Command::CopyBuffer { src, dst, .. } => vec![*src, *dst],
            Command::CopyTexture(copy) => vec![copy.src, copy.dst],
            Command::BindResourceSet { set, .. } => vec![*set],
        }
    }
}

pub trait NativeDriver: Send + Sync {
    fn backend(&self) -> BackendKind;

    fn capabilities(&self) -> DriverCapabilities;

    /// Whether textures of `format` may use `count` samples.
    fn supports_sample_count(&self, format: PixelFormat, depth: bool, count: SampleCount) -> bool;

    // ── Objects ─────────────────────────────────────────────

    fn create_buffer(&self, desc: &BufferDescription) -> HalResult<NativeHandle>;
    fn destroy_buffer(&self, buffer: NativeHandle);

    fn create_texture(&self, desc: &TextureDescription) -> HalResult<NativeHandle>;
    fn destroy_texture(&self, texture: NativeHandle);

    fn create_sampler(&self, desc: &SamplerDescription) -> HalResult<NativeHandle>;
    fn destroy_sampler(&self, sampler: NativeHandle);

    fn create_resource_set(&self, bindings: &[NativeHandle]) -> HalResult<NativeHandle>;
    fn destroy_resource_set(&self, set: NativeHandle);

    // ── CPU access ──────────────────────────────────────────

    /// Make the target CPU visible. Called at most once per target until
    /// the matching [`NativeDriver::unmap`].
    fn map(&self, target: MapTarget, mode: MapMode) -> HalResult<NativeMapping>;
    fn unmap(&self, target: MapTarget);

    /// Write into a buffer without mapping it. `None` replaces the
    /// whole buffer.
    fn update_buffer(&self, buffer: NativeHandle, range: Option<Range<u64>>, data: &[u8]) -> HalResult<()>;

    /// Write a texel region without a staging copy. Drivers without
    /// [`DriverCapabilities::direct_texture_updates`] return `Unsupported`.
    fn update_texture(
        &self,
        texture: NativeHandle,
        region: &TextureRegion,
        data: &[u8],
        layout: PitchLayout,
    ) -> HalResult<()>;

    // ── Execution ───────────────────────────────────────────

    fn execute(&self, commands: &[Command]) -> HalResult<BatchHandle>;
    fn is_complete(&self, batch: BatchHandle) -> bool;
    fn wait_until_complete(&self, batch: BatchHandle);
    fn release_batch(&self, batch: BatchHandle);

    /// Let any held-back execution run again. Called before the device
    /// waits for idle at teardown.
    fn release_held_work(&self) {}

    /// Register the hook fired after off-thread completions.
    fn set_completion_hook(&self, _hook: CompletionHook) {}

    fn set_name(&self, _object: NativeHandle, _name: &str) {}
}
