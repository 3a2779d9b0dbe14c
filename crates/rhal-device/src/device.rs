//! The portable device: object creation, CPU mappings, submission and
//! fence waits over one [`NativeDriver`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rhal_core::config::{DeviceConfig, RhalConfig};
use rhal_core::fence::wait_for_slots;
use rhal_core::{
    CompletionSource, Fence, FenceSyncRegistry, MappedResourceCache, MappingKey,
    ResourceLifetimeManager, WaitHandlePool,
};
use rhal_types::{
    BackendKind, BatchHandle, BufferDescription, HalError, HalResult, MapMode, NativeHandle,
    PixelFormat, RefCountId, SampleCount, SamplerDescription, TextureDescription,
};
use tracing::{debug, error, info, warn};

use crate::command_list::CommandList;
use crate::driver::{DriverCapabilities, MapTarget, NativeDriver};
use crate::resources::{
    BindableResource, Buffer, Claim, MappableResource, MappedResource, NamedResource,
    ResourceSet, Sampler, Texture,
};
use crate::software::{SoftwareDriver, SoftwareProfile};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// A submitted batch plus the claims it holds on every object it uses.
pub(crate) struct InFlightBatch {
    handle: BatchHandle,
    retained: Vec<RefCountId>,
}

pub(crate) struct DeviceShared {
    pub(crate) id: u64,
    pub(crate) driver: Arc<dyn NativeDriver>,
    /// Serialises batch execution, native map/unmap and direct updates
    pub(crate) submission_lock: Mutex<()>,
    pub(crate) mapped: MappedResourceCache<MapTarget>,
    pub(crate) registry: FenceSyncRegistry<InFlightBatch>,
    pub(crate) lifetime: Arc<ResourceLifetimeManager>,
    pub(crate) wait_pool: WaitHandlePool,
    pub(crate) debug: bool,
}

impl CompletionSource for DeviceShared {
    type Batch = InFlightBatch;
    type Token = BatchHandle;

    fn token(&self, batch: &InFlightBatch) -> BatchHandle {
        batch.handle
    }

    fn is_complete(&self, token: BatchHandle) -> bool {
        self.driver.is_complete(token)
    }

    fn wait_until_complete(&self, token: BatchHandle) {
        self.driver.wait_until_complete(token);
    }

    fn release(&self, batch: InFlightBatch) {
        self.driver.release_batch(batch.handle);
        if let Err(e) = self.lifetime.decrement_all(&batch.retained) {
            error!("releasing batch {} resources: {}", batch.handle.0, e);
        }
    }
}

impl DeviceShared {
    /// Force-unmap whatever is still mapped of a resource being destroyed.
    fn evict_mappings(&self, id: RefCountId) {
        let driver = &self.driver;
        self.mapped.evict_resource(id, &self.submission_lock, |key, entry| {
            warn!(
                "resource {} subresource {} destroyed while mapped ({} holder(s)), unmapping",
                key.resource, key.subresource, entry.ref_count
            );
            driver.unmap(entry.target);
        });
    }

    fn poll(&self) -> usize {
        self.registry.poll_completions(self)
    }
}

pub struct GraphicsDevice {
    pub(crate) shared: Arc<DeviceShared>,
}

impl GraphicsDevice {
    /// Wrap `driver`. A driver serves one device at a time: the device
    /// installs its completion hook on it.
    pub fn new(driver: Arc<dyn NativeDriver>, config: &DeviceConfig) -> Self {
        let shared = Arc::new(DeviceShared {
            id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            driver,
            submission_lock: Mutex::new(()),
            mapped: MappedResourceCache::new(),
            registry: FenceSyncRegistry::new(),
            lifetime: Arc::new(ResourceLifetimeManager::new()),
            wait_pool: WaitHandlePool::new(config.wait_pool_limit),
            debug: config.debug,
        });

        let weak = Arc::downgrade(&shared);
        shared.driver.set_completion_hook(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.poll();
            }
        }));

        info!(
            "device {} ready on {} driver (debug={})",
            shared.id,
            shared.driver.backend().name(),
            shared.debug
        );
        Self { shared }
    }

    /// Bring up the software driver described by `config`.
    pub fn from_config(config: &RhalConfig) -> HalResult<Self> {
        let profile = SoftwareProfile::from_config(config.device.backend, &config.software);
        let driver = SoftwareDriver::new(profile)?;
        Ok(Self::new(Arc::new(driver), &config.device))
    }

    pub fn backend(&self) -> BackendKind {
        self.shared.driver.backend()
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        self.shared.driver.capabilities()
    }

    // ── Object creation ─────────────────────────────────────

    pub fn create_buffer(&self, desc: &BufferDescription) -> HalResult<Buffer> {
        let native = self.shared.driver.create_buffer(desc)?;
        let weak = Arc::downgrade(&self.shared);
        let claim = self.claim(native, move |id| {
            if let Some(shared) = weak.upgrade() {
                shared.evict_mappings(id);
                shared.driver.destroy_buffer(native);
            }
        });
        Ok(Buffer { claim, desc: *desc })
    }

    pub fn create_texture(&self, desc: &TextureDescription) -> HalResult<Texture> {
        let native = self.shared.driver.create_texture(desc)?;
        let weak = Arc::downgrade(&self.shared);
        let claim = self.claim(native, move |id| {
            if let Some(shared) = weak.upgrade() {
                shared.evict_mappings(id);
                shared.driver.destroy_texture(native);
            }
        });
        Ok(Texture { claim, desc: *desc })
    }

    pub fn create_sampler(&self, desc: &SamplerDescription) -> HalResult<Sampler> {
        let native = self.shared.driver.create_sampler(desc)?;
        let weak = Arc::downgrade(&self.shared);
        let claim = self.claim(native, move |_| {
            if let Some(shared) = weak.upgrade() {
                shared.driver.destroy_sampler(native);
            }
        });
        Ok(Sampler { claim, desc: *desc })
    }

    /// Bind `bindings` into one set. Each binding is held until the set
    /// itself is destroyed, whatever order the handles are dropped in.
    pub fn create_resource_set(&self, bindings: &[BindableResource<'_>]) -> HalResult<ResourceSet> {
        let mut constituents = Vec::with_capacity(bindings.len());
        let mut natives = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let claim = binding.claim();
            let held = self
                .check_owner(claim)
                .and_then(|_| self.shared.lifetime.increment(claim.id));
            if let Err(e) = held {
                self.rollback_bindings(&constituents);
                return Err(e);
            }
            constituents.push(claim.id);
            natives.push(claim.native);
        }

        let native = match self.shared.driver.create_resource_set(&natives) {
            Ok(native) => native,
            Err(e) => {
                self.rollback_bindings(&constituents);
                return Err(e);
            }
        };

        let weak = Arc::downgrade(&self.shared);
        let lifetime = Arc::downgrade(&self.shared.lifetime);
        let bound = constituents.clone();
        let claim = self.claim(native, move |id| {
            if let Some(shared) = weak.upgrade() {
                shared.driver.destroy_resource_set(native);
            }
            // The native set goes first so nothing it binds is still in use
            if let Some(lifetime) = lifetime.upgrade() {
                if let Err(e) = lifetime.decrement_all(&bound) {
                    error!("resource set {} releasing its bindings: {}", id, e);
                }
            }
        });
        Ok(ResourceSet {
            claim,
            constituents,
        })
    }

    pub fn create_command_list(&self) -> CommandList {
        CommandList::new(self.shared.id, self.shared.lifetime.clone())
    }

    pub fn create_fence(&self, signaled: bool) -> Fence {
        Fence::new(signaled)
    }

    fn claim<F>(&self, native: NativeHandle, dispose: F) -> Claim
    where
        F: FnOnce(RefCountId) + Send + 'static,
    {
        let id = self.shared.lifetime.register(dispose);
        debug!("registered {:?} {:#x} as {}", native.kind, native.raw, id);
        Claim {
            id,
            native,
            device_id: self.shared.id,
            lifetime: self.shared.lifetime.clone(),
            name: Mutex::new(None),
        }
    }

    fn rollback_bindings(&self, held: &[RefCountId]) {
        if let Err(e) = self.shared.lifetime.decrement_all(held) {
            error!("rolling back resource set bindings: {}", e);
        }
    }

    pub(crate) fn check_owner(&self, claim: &Claim) -> HalResult<()> {
        if claim.device_id != self.shared.id {
            return Err(HalError::usage(format!(
                "{:?} {} belongs to another device",
                claim.native.kind, claim.id
            )));
        }
        Ok(())
    }

    // ── CPU mappings ────────────────────────────────────────

    /// Map a buffer (`subresource` 0) or one texture subresource.
    ///
    /// Repeated maps with the same mode share one native mapping; each
    /// must be balanced by an [`GraphicsDevice::unmap`].
    pub fn map<'a>(
        &self,
        resource: impl Into<MappableResource<'a>>,
        mode: MapMode,
        subresource: u32,
    ) -> HalResult<MappedResource> {
        let (key, target) = self.map_target(resource.into(), subresource)?;
        let driver = &self.shared.driver;
        let mapping = self
            .shared
            .mapped
            .map(key, mode, target, &self.shared.submission_lock, || driver.map(target, mode))?;
        Ok(MappedResource::new(key, mode, mapping))
    }

    pub fn unmap<'a>(&self, resource: impl Into<MappableResource<'a>>, subresource: u32) -> HalResult<()> {
        let (key, _) = self.map_target(resource.into(), subresource)?;
        let driver = &self.shared.driver;
        self.shared
            .mapped
            .unmap(key, &self.shared.submission_lock, |entry| driver.unmap(entry.target))
            .map(|_| ())
    }

    /// Copy out of a live mapping; the mapping cannot be torn down while
    /// the copy runs.
    pub fn read_mapped(&self, mapped: &MappedResource, offset: u64, out: &mut [u8]) -> HalResult<()> {
        self.shared.mapped.with_entry(&mapped.key, |entry| {
            if !entry.mode.can_read() {
                return Err(HalError::usage("mapping was not opened for reading"));
            }
            let start = checked_span(offset, out.len(), entry.mapping.size_in_bytes)?;
            unsafe {
                std::ptr::copy_nonoverlapping(entry.mapping.ptr.as_ptr().add(start), out.as_mut_ptr(), out.len());
            }
            Ok(())
        })
    }

    /// Copy into a live mapping.
    pub fn write_mapped(&self, mapped: &MappedResource, offset: u64, data: &[u8]) -> HalResult<()> {
        self.shared.mapped.with_entry(&mapped.key, |entry| {
            if !entry.mode.can_write() {
                return Err(HalError::usage("mapping was not opened for writing"));
            }
            let start = checked_span(offset, data.len(), entry.mapping.size_in_bytes)?;
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), entry.mapping.ptr.as_ptr().add(start), data.len());
            }
            Ok(())
        })
    }

    /// Number of live (key, mode) mappings.
    pub fn mapped_count(&self) -> usize {
        self.shared.mapped.len()
    }

    fn map_target(&self, resource: MappableResource<'_>, subresource: u32) -> HalResult<(MappingKey, MapTarget)> {
        let claim = resource.claim();
        self.check_owner(claim)?;
        let target = match resource {
            MappableResource::Buffer(_) => {
                if subresource != 0 {
                    return Err(HalError::usage("buffers only have subresource 0"));
                }
                MapTarget::Buffer(claim.native)
            }
            MappableResource::Texture(texture) => {
                let count = texture.desc.subresource_count();
                if subresource >= count {
                    return Err(HalError::usage(format!(
                        "subresource {} out of range ({} subresources)",
                        subresource, count
                    )));
                }
                MapTarget::Texture {
                    texture: claim.native,
                    subresource,
                }
            }
        };
        Ok((MappingKey::new(claim.id, subresource), target))
    }

    // ── Submission and fences ───────────────────────────────

    /// Execute a sealed command list. `fence` is signaled once the batch
    /// has completed and been retired.
    pub fn submit_commands(&self, list: &CommandList, fence: Option<&Fence>) -> HalResult<()> {
        if fence.is_some_and(Fence::is_disposed) {
            return Err(HalError::usage("cannot submit with a disposed fence"));
        }
        let (commands, retained) = list.prepare_submission(self.shared.id)?;

        let executed = {
            let _submission = self.shared.submission_lock.lock();
            self.shared.driver.execute(&commands)
        };
        let handle = match executed {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.shared.lifetime.decrement_all(&retained);
                return Err(e);
            }
        };
        debug!("submitted batch {} ({} command(s))", handle.0, commands.len());

        self.shared
            .registry
            .submit(self.shared.as_ref(), InFlightBatch { handle, retained }, fence.cloned());
        Ok(())
    }

    /// Retire every batch the driver reports complete.
    pub fn poll_completions(&self) -> usize {
        self.shared.poll()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.registry.in_flight()
    }

    pub fn wait_for_fence(&self, fence: &Fence, timeout_ns: u64) -> HalResult<bool> {
        self.shared.poll();
        fence.wait(timeout_ns)
    }

    pub fn wait_for_fences(&self, fences: &[Fence], wait_all: bool, timeout_ns: u64) -> HalResult<bool> {
        self.shared.poll();
        let mut slots = self.shared.wait_pool.checkout(fences.len());
        for (slot, fence) in slots.iter_mut().zip(fences) {
            *slot = Some(fence.clone());
        }
        let result = wait_for_slots(&slots, wait_all, timeout_ns);
        self.shared.wait_pool.give_back(slots);
        result
    }

    pub fn reset_fence(&self, fence: &Fence) -> HalResult<()> {
        fence.reset()
    }

    /// Block until everything submitted so far has completed.
    pub fn wait_for_idle(&self) {
        self.shared.registry.wait_for_idle(self.shared.as_ref());
    }

    // ── Capabilities and debugging ──────────────────────────

    /// Highest multisample count the driver accepts for `format`.
    pub fn sample_count_limit(&self, format: PixelFormat, depth: bool) -> SampleCount {
        SampleCount::DESCENDING
            .into_iter()
            .find(|&count| self.shared.driver.supports_sample_count(format, depth, count))
            .unwrap_or(SampleCount::Count1)
    }

    pub fn set_name<'a>(&self, resource: impl Into<NamedResource<'a>>, name: &str) -> HalResult<()> {
        let resource = resource.into();
        let claim = resource.claim();
        self.check_owner(claim)?;
        *claim.name.lock() = Some(name.to_string());
        if self.shared.debug || self.shared.driver.capabilities().debug_labels {
            self.shared.driver.set_name(claim.native, name);
        }
        Ok(())
    }

    /// Current holder count of an object, `None` once destroyed.
    pub fn ref_count(&self, id: RefCountId) -> Option<u32> {
        self.shared.lifetime.count(id)
    }

    /// Objects created through this device that have not been destroyed.
    pub fn live_objects(&self) -> usize {
        self.shared.lifetime.len()
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        self.shared.driver.release_held_work();
        self.shared.registry.wait_for_idle(self.shared.as_ref());
        let driver = &self.shared.driver;
        let evicted = self
            .shared
            .mapped
            .evict_all(&self.shared.submission_lock, |key, entry| {
                warn!(
                    "resource {} subresource {} still mapped at device teardown ({} holder(s))",
                    key.resource, key.subresource, entry.ref_count
                );
                driver.unmap(entry.target);
            });
        if evicted > 0 {
            warn!("force-unmapped {} mapping(s) on device {}", evicted, self.shared.id);
        }
        debug!("device {} dropped", self.shared.id);
    }
}

fn checked_span(offset: u64, len: usize, size: u64) -> HalResult<usize> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(offset as usize),
        _ => Err(HalError::usage(format!(
            "range {}+{} exceeds mapping of {} bytes",
            offset, len, size
        ))),
    }
}
