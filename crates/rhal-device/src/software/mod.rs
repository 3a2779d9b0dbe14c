//! Host-memory reference driver.
//!
//! Emulates the three native driver families closely enough to exercise
//! the portable layer: which resources are mappable, how mapped rows are
//! padded, whether textures take direct writes and whether batches
//! complete inline or on a worker thread. It also counts native calls and
//! flags objects destroyed while something still uses them.

mod storage;
mod worker;

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use rhal_core::config::SoftwareConfig;
use rhal_core::pitch::{Extent, Origin, PitchLayout};
use rhal_core::NativeMapping;
use rhal_types::{
    BackendKind, BatchHandle, BufferDescription, BufferUsage, HalError, HalResult, MapMode,
    NativeHandle, PixelFormat, ResourceKind, SampleCount, SamplerDescription, SamplerFilter,
    TextureDescription, TextureRegion,
};
use tracing::{debug, error, warn};

use crate::driver::{
    Command, CompletionHook, DriverCapabilities, MapTarget, NativeDriver, TextureCopy,
};
use storage::{SoftBuffer, SoftTexture};
use worker::{CompletionWorker, Job};

/// Behaviour knobs distinguishing the emulated driver families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareProfile {
    pub backend: BackendKind,
    /// Row pitch alignment of mapped staging texture rows
    pub row_alignment: u32,
    pub async_completion: bool,
    pub max_color_samples: SampleCount,
    pub max_depth_samples: SampleCount,
}

impl SoftwareProfile {
    pub fn for_backend(backend: BackendKind) -> Self {
        match backend {
            BackendKind::Immediate => Self {
                backend,
                row_alignment: 256,
                async_completion: false,
                max_color_samples: SampleCount::Count8,
                max_depth_samples: SampleCount::Count8,
            },
            BackendKind::Tiled => Self {
                backend,
                row_alignment: 1,
                async_completion: true,
                max_color_samples: SampleCount::Count4,
                max_depth_samples: SampleCount::Count4,
            },
            BackendKind::Explicit => Self {
                backend,
                row_alignment: 64,
                async_completion: true,
                max_color_samples: SampleCount::Count8,
                max_depth_samples: SampleCount::Count4,
            },
        }
    }

    /// Profile defaults overridden by whatever the config sets.
    pub fn from_config(backend: BackendKind, config: &SoftwareConfig) -> Self {
        let mut profile = Self::for_backend(backend);
        if let Some(alignment) = config.row_alignment {
            profile.row_alignment = alignment;
        }
        if let Some(async_completion) = config.async_completion {
            profile.async_completion = async_completion;
        }
        profile
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            direct_texture_updates: self.backend == BackendKind::Immediate,
            persistent_buffer_mapping: self.backend == BackendKind::Tiled,
            debug_labels: self.backend != BackendKind::Explicit,
            async_completion: self.async_completion,
        }
    }

    fn check_buffer_map(&self, usage: BufferUsage, mode: MapMode) -> HalResult<()> {
        match self.backend {
            BackendKind::Tiled => Ok(()),
            BackendKind::Immediate => {
                if usage.contains(BufferUsage::STAGING) {
                    Ok(())
                } else if usage.contains(BufferUsage::DYNAMIC) {
                    if mode == MapMode::Write {
                        Ok(())
                    } else {
                        Err(HalError::unsupported(
                            "dynamic buffers can only be mapped for writing",
                        ))
                    }
                } else {
                    Err(HalError::unsupported(
                        "only dynamic or staging buffers can be mapped",
                    ))
                }
            }
            BackendKind::Explicit => {
                if usage.is_cpu_writable() {
                    Ok(())
                } else {
                    Err(HalError::unsupported("buffer is not in host-visible memory"))
                }
            }
        }
    }
}

/// Native call counters, for tests and `rhal verify`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub native_maps: usize,
    pub native_unmaps: usize,
    pub objects_created: usize,
    pub objects_destroyed: usize,
    pub batches_executed: usize,
    /// Objects destroyed while a binding, pending batch or mapping still used them
    pub lifetime_violations: usize,
}

#[derive(Default)]
struct Counters {
    native_maps: AtomicUsize,
    native_unmaps: AtomicUsize,
    objects_created: AtomicUsize,
    objects_destroyed: AtomicUsize,
    batches_executed: AtomicUsize,
    lifetime_violations: AtomicUsize,
}

#[derive(Clone)]
enum SoftObject {
    Buffer(Arc<SoftBuffer>),
    Texture(Arc<SoftTexture>),
    Sampler,
    ResourceSet(Arc<Vec<NativeHandle>>),
}

struct BatchRecord {
    complete: bool,
    referenced: Vec<NativeHandle>,
}

pub(crate) struct SoftwareState {
    pub(crate) profile: SoftwareProfile,
    objects: DashMap<u64, SoftObject>,
    names: DashMap<u64, String>,
    next_id: AtomicU64,
    mapped: Mutex<HashSet<MapTarget>>,
    batches: Mutex<HashMap<u64, BatchRecord>>,
    batch_done: Condvar,
    next_batch: AtomicU64,
    hook: RwLock<Option<CompletionHook>>,
    counters: Counters,
}

impl SoftwareState {
    fn new(profile: SoftwareProfile) -> Self {
        Self {
            profile,
            objects: DashMap::new(),
            names: DashMap::new(),
            // Keep handles visibly distinct from small integers
            next_id: AtomicU64::new(0x2000),
            mapped: Mutex::new(HashSet::new()),
            batches: Mutex::new(HashMap::new()),
            batch_done: Condvar::new(),
            next_batch: AtomicU64::new(1),
            hook: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    fn insert(&self, kind: ResourceKind, object: SoftObject) -> NativeHandle {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(raw, object);
        self.counters.objects_created.fetch_add(1, Ordering::Relaxed);
        debug!("created {:?} {:#x}", kind, raw);
        NativeHandle { raw, kind }
    }

    fn remove(&self, handle: NativeHandle) {
        if let Some(reason) = self.still_in_use(handle) {
            self.counters.lifetime_violations.fetch_add(1, Ordering::Relaxed);
            error!("destroying {:?} {:#x} while {}", handle.kind, handle.raw, reason);
        }
        if self.objects.remove(&handle.raw).is_none() {
            warn!("destroy of unknown {:?} {:#x}", handle.kind, handle.raw);
            return;
        }
        self.names.remove(&handle.raw);
        self.counters.objects_destroyed.fetch_add(1, Ordering::Relaxed);
        debug!("destroyed {:?} {:#x}", handle.kind, handle.raw);
    }

    fn still_in_use(&self, handle: NativeHandle) -> Option<&'static str> {
        let bound = self.objects.iter().any(|entry| match entry.value() {
            SoftObject::ResourceSet(bindings) => bindings.contains(&handle),
            _ => false,
        });
        if bound {
            return Some("a resource set still binds it");
        }
        let pending = self
            .batches
            .lock()
            .values()
            .any(|b| !b.complete && b.referenced.contains(&handle));
        if pending {
            return Some("a pending batch still uses it");
        }
        let mapped = self.mapped.lock().iter().any(|target| match target {
            MapTarget::Buffer(buffer) => *buffer == handle,
            MapTarget::Texture { texture, .. } => *texture == handle,
        });
        if mapped {
            return Some("it is still mapped");
        }
        None
    }

    fn buffer(&self, handle: NativeHandle) -> HalResult<Arc<SoftBuffer>> {
        match self.objects.get(&handle.raw).map(|o| o.value().clone()) {
            Some(SoftObject::Buffer(buffer)) => Ok(buffer),
            _ => Err(HalError::usage(format!("{:#x} is not a live buffer", handle.raw))),
        }
    }

    fn texture(&self, handle: NativeHandle) -> HalResult<Arc<SoftTexture>> {
        match self.objects.get(&handle.raw).map(|o| o.value().clone()) {
            Some(SoftObject::Texture(texture)) => Ok(texture),
            _ => Err(HalError::usage(format!("{:#x} is not a live texture", handle.raw))),
        }
    }

    fn validate(&self, command: &Command) -> HalResult<()> {
        match command {
            Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let src = self.buffer(*src)?;
                let dst = self.buffer(*dst)?;
                let fits = |offset: u64, limit: u64| offset.checked_add(*size).is_some_and(|end| end <= limit);
                if !fits(*src_offset, src.desc.size_in_bytes) || !fits(*dst_offset, dst.desc.size_in_bytes) {
                    return Err(HalError::usage("buffer copy out of bounds"));
                }
                Ok(())
            }
            Command::CopyTexture(copy) => {
                self.texture(copy.src)?;
                self.texture(copy.dst)?;
                Ok(())
            }
            Command::BindResourceSet { set, .. } => match self.objects.get(&set.raw).map(|o| o.value().clone()) {
                Some(SoftObject::ResourceSet(_)) => Ok(()),
                _ => Err(HalError::usage(format!("{:#x} is not a live resource set", set.raw))),
            },
        }
    }

    fn run_command(&self, command: &Command) -> HalResult<()> {
        match command {
            Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let src = self.buffer(*src)?;
                let dst = self.buffer(*dst)?;
                let mut bytes = vec![0u8; *size as usize];
                src.memory.read(*src_offset, &mut bytes)?;
                dst.memory.write(*dst_offset, &bytes)
            }
            Command::CopyTexture(copy) => self.copy_texture(copy),
            Command::BindResourceSet { .. } => Ok(()),
        }
    }

    fn copy_texture(&self, copy: &TextureCopy) -> HalResult<()> {
        let src = self.texture(copy.src)?;
        let dst = self.texture(copy.dst)?;
        // Through a dense intermediate, so src and dst may alias
        let texels = src.read_region(copy.src_mip, copy.src_layer, copy.src_origin, copy.extent)?;
        let dense = PitchLayout::dense(copy.extent.width, copy.extent.height, copy.format)?;
        dst.write_region(copy.dst_mip, copy.dst_layer, copy.dst_origin, copy.extent, &texels, dense)
    }

    pub(crate) fn run_batch(&self, batch: BatchHandle, commands: &[Command]) {
        for command in commands {
            if let Err(e) = self.run_command(command) {
                error!("batch {} command failed: {}", batch.0, e);
            }
        }
        self.counters.batches_executed.fetch_add(1, Ordering::Relaxed);
        let mut batches = self.batches.lock();
        if let Some(record) = batches.get_mut(&batch.0) {
            record.complete = true;
            record.referenced.clear();
        }
        self.batch_done.notify_all();
    }

    pub(crate) fn fire_completion_hook(&self) {
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

pub struct SoftwareDriver {
    state: Arc<SoftwareState>,
    worker: Option<CompletionWorker>,
}

impl SoftwareDriver {
    pub fn new(profile: SoftwareProfile) -> HalResult<Self> {
        let state = Arc::new(SoftwareState::new(profile));
        let worker = if profile.async_completion {
            Some(CompletionWorker::spawn(state.clone())?)
        } else {
            None
        };
        debug!(
            "software driver up: backend={}, row_alignment={}, async={}",
            profile.backend.name(),
            profile.row_alignment,
            profile.async_completion
        );
        Ok(Self { state, worker })
    }

    pub fn for_backend(backend: BackendKind) -> HalResult<Self> {
        Self::new(SoftwareProfile::for_backend(backend))
    }

    pub fn profile(&self) -> SoftwareProfile {
        self.state.profile
    }

    pub fn stats(&self) -> DriverStats {
        let c = &self.state.counters;
        DriverStats {
            native_maps: c.native_maps.load(Ordering::Relaxed),
            native_unmaps: c.native_unmaps.load(Ordering::Relaxed),
            objects_created: c.objects_created.load(Ordering::Relaxed),
            objects_destroyed: c.objects_destroyed.load(Ordering::Relaxed),
            batches_executed: c.batches_executed.load(Ordering::Relaxed),
            lifetime_violations: c.lifetime_violations.load(Ordering::Relaxed),
        }
    }

    /// Hold queued batches until [`SoftwareDriver::resume`]. No effect on
    /// synchronous profiles.
    pub fn pause(&self) {
        if let Some(worker) = &self.worker {
            worker.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(worker) = &self.worker {
            worker.resume();
        }
    }

    pub fn live_objects(&self) -> usize {
        self.state.objects.len()
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.state.objects.contains_key(&handle.raw)
    }

    pub fn object_name(&self, handle: NativeHandle) -> Option<String> {
        self.state.names.get(&handle.raw).map(|n| n.value().clone())
    }

    /// Full contents of a buffer, bypassing the mapping rules.
    pub fn read_buffer(&self, buffer: NativeHandle) -> HalResult<Vec<u8>> {
        Ok(self.state.buffer(buffer)?.memory.snapshot())
    }

    /// Densely packed texels of a region, bypassing the mapping rules.
    pub fn read_texture(&self, texture: NativeHandle, region: &TextureRegion) -> HalResult<Vec<u8>> {
        let texture = self.state.texture(texture)?;
        if !region.fits(&texture.desc) {
            return Err(HalError::usage("region outside texture"));
        }
        texture.read_region(
            region.mip_level,
            region.array_layer,
            Origin::new(region.x, region.y, region.z),
            Extent::new(region.width, region.height, region.depth),
        )
    }
}

impl NativeDriver for SoftwareDriver {
    fn backend(&self) -> BackendKind {
        self.state.profile.backend
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.state.profile.capabilities()
    }

    fn supports_sample_count(&self, format: PixelFormat, depth: bool, count: SampleCount) -> bool {
        if count == SampleCount::Count1 {
            return true;
        }
        if format.is_compressed() {
            return false;
        }
        let max = if depth || format.is_depth_stencil() {
            self.state.profile.max_depth_samples
        } else {
            self.state.profile.max_color_samples
        };
        count <= max
    }

    fn create_buffer(&self, desc: &BufferDescription) -> HalResult<NativeHandle> {
        if desc.size_in_bytes == 0 {
            return Err(HalError::usage("buffer size must be non-zero"));
        }
        let buffer = SoftBuffer::new(*desc)?;
        Ok(self.state.insert(ResourceKind::Buffer, SoftObject::Buffer(Arc::new(buffer))))
    }

    fn destroy_buffer(&self, buffer: NativeHandle) {
        self.state.remove(buffer);
    }

    fn create_texture(&self, desc: &TextureDescription) -> HalResult<NativeHandle> {
        let texture = SoftTexture::new(*desc, self.state.profile.row_alignment)?;
        Ok(self.state.insert(ResourceKind::Texture, SoftObject::Texture(Arc::new(texture))))
    }

    fn destroy_texture(&self, texture: NativeHandle) {
        self.state.remove(texture);
    }

    fn create_sampler(&self, desc: &SamplerDescription) -> HalResult<NativeHandle> {
        if desc.filter == SamplerFilter::Anisotropic && !(1..=16).contains(&desc.max_anisotropy) {
            return Err(HalError::usage(format!(
                "max_anisotropy must be 1..=16 for anisotropic filtering, got {}",
                desc.max_anisotropy
            )));
        }
        Ok(self.state.insert(ResourceKind::Sampler, SoftObject::Sampler))
    }

    fn destroy_sampler(&self, sampler: NativeHandle) {
        self.state.remove(sampler);
    }

    fn create_resource_set(&self, bindings: &[NativeHandle]) -> HalResult<NativeHandle> {
        for binding in bindings {
            if !self.state.objects.contains_key(&binding.raw) {
                return Err(HalError::usage(format!(
                    "resource set binds destroyed {:?} {:#x}",
                    binding.kind, binding.raw
                )));
            }
        }
        Ok(self.state.insert(
            ResourceKind::ResourceSet,
            SoftObject::ResourceSet(Arc::new(bindings.to_vec())),
        ))
    }

    fn destroy_resource_set(&self, set: NativeHandle) {
        self.state.remove(set);
    }

    fn map(&self, target: MapTarget, mode: MapMode) -> HalResult<NativeMapping> {
        let mapping = match target {
            MapTarget::Buffer(handle) => {
                let buffer = self.state.buffer(handle)?;
                self.state.profile.check_buffer_map(buffer.desc.usage, mode)?;
                let size = buffer.desc.size_in_bytes;
                NativeMapping {
                    ptr: buffer.memory.ptr(),
                    size_in_bytes: size,
                    row_pitch: size as u32,
                    depth_pitch: size as u32,
                }
            }
            MapTarget::Texture {
                texture,
                subresource,
            } => {
                let texture = self.state.texture(texture)?;
                if !texture.desc.usage.is_cpu_writable() {
                    return Err(HalError::unsupported("only staging textures can be mapped"));
                }
                let sub = texture.subresource_at(subresource)?;
                NativeMapping {
                    ptr: sub.memory.ptr(),
                    size_in_bytes: sub.memory.len() as u64,
                    row_pitch: sub.layout.row_pitch,
                    depth_pitch: sub.layout.depth_pitch,
                }
            }
        };

        if !self.state.mapped.lock().insert(target) {
            return Err(HalError::usage(format!("{:?} is already mapped", target)));
        }
        self.state.counters.native_maps.fetch_add(1, Ordering::Relaxed);
        Ok(mapping)
    }

    fn unmap(&self, target: MapTarget) {
        if !self.state.mapped.lock().remove(&target) {
            warn!("unmap of {:?} which is not mapped", target);
            return;
        }
        // Persistently mapped buffers have nothing to release natively
        self.state.counters.native_unmaps.fetch_add(1, Ordering::Relaxed);
    }

    fn update_buffer(&self, buffer: NativeHandle, range: Option<Range<u64>>, data: &[u8]) -> HalResult<()> {
        let buffer = self.state.buffer(buffer)?;
        let size = buffer.desc.size_in_bytes;
        match range {
            None => {
                if data.len() as u64 != size {
                    return Err(HalError::usage(format!(
                        "whole-buffer update needs {} bytes, got {}",
                        size,
                        data.len()
                    )));
                }
                buffer.memory.write(0, data)
            }
            Some(range) => {
                if self.state.profile.backend == BackendKind::Immediate
                    && buffer.desc.usage.contains(BufferUsage::UNIFORM)
                    && (range.start != 0 || range.end != size)
                {
                    return Err(HalError::unsupported("uniform buffers must be updated whole"));
                }
                if range.end < range.start || range.end - range.start != data.len() as u64 {
                    return Err(HalError::usage("update range does not match data length"));
                }
                buffer.memory.write(range.start, data)
            }
        }
    }

    fn update_texture(
        &self,
        texture: NativeHandle,
        region: &TextureRegion,
        data: &[u8],
        layout: PitchLayout,
    ) -> HalResult<()> {
        if !self.state.profile.capabilities().direct_texture_updates {
            return Err(HalError::unsupported(format!(
                "{} driver has no direct texture writes",
                self.state.profile.backend.name()
            )));
        }
        let texture = self.state.texture(texture)?;
        if !region.fits(&texture.desc) {
            return Err(HalError::usage("texture update region out of bounds"));
        }
        texture.write_region(
            region.mip_level,
            region.array_layer,
            Origin::new(region.x, region.y, region.z),
            Extent::new(region.width, region.height, region.depth),
            data,
            layout,
        )
    }

    fn execute(&self, commands: &[Command]) -> HalResult<BatchHandle> {
        for command in commands {
            self.state.validate(command)?;
        }
        let batch = BatchHandle(self.state.next_batch.fetch_add(1, Ordering::Relaxed));
        let referenced = commands.iter().flat_map(Command::referenced).collect();
        self.state.batches.lock().insert(
            batch.0,
            BatchRecord {
                complete: false,
                referenced,
            },
        );

        match &self.worker {
            Some(worker) => {
                if let Err(e) = worker.enqueue(Job {
                    batch,
                    commands: commands.to_vec(),
                }) {
                    self.state.batches.lock().remove(&batch.0);
                    return Err(e);
                }
            }
            None => self.state.run_batch(batch, commands),
        }
        Ok(batch)
    }

    fn is_complete(&self, batch: BatchHandle) -> bool {
        self.state
            .batches
            .lock()
            .get(&batch.0)
            .map_or(true, |record| record.complete)
    }

    fn wait_until_complete(&self, batch: BatchHandle) {
        let mut batches = self.state.batches.lock();
        while batches.get(&batch.0).is_some_and(|record| !record.complete) {
            self.state.batch_done.wait(&mut batches);
        }
    }

    fn release_batch(&self, batch: BatchHandle) {
        self.state.batches.lock().remove(&batch.0);
    }

    fn release_held_work(&self) {
        self.resume();
    }

    fn set_completion_hook(&self, hook: CompletionHook) {
        *self.state.hook.write() = Some(hook);
    }

    fn set_name(&self, object: NativeHandle, name: &str) {
        if self.state.objects.contains_key(&object.raw) {
            self.state.names.insert(object.raw, name.to_string());
        }
    }
}
