//! Per-device table of active CPU mappings.
//!
//! Lock order: the table lock is always taken first, the device-wide
//! submission lock second and only around the native map/unmap call.

use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;
use rhal_types::{HalError, HalResult, MapMode, RefCountId};
use tracing::debug;

/// Identifies a mapping target by value: the resource identity plus the
/// subresource index (0 for buffers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingKey {
    pub resource: RefCountId,
    pub subresource: u32,
}

impl MappingKey {
    pub fn new(resource: RefCountId, subresource: u32) -> Self {
        Self {
            resource,
            subresource,
        }
    }
}

/// What a native driver hands back for a successful map.
#[derive(Debug, Clone, Copy)]
pub struct NativeMapping {
    pub ptr: NonNull<u8>,
    pub size_in_bytes: u64,
    pub row_pitch: u32,
    pub depth_pitch: u32,
}

// The pointer targets driver-owned memory that stays valid until the
// matching native unmap; the cache serialises that unmap behind its lock.
unsafe impl Send for NativeMapping {}
unsafe impl Sync for NativeMapping {}

/// One live mapping. `target` is whatever the owner needs to issue the
/// native unmap later (driver handle, subresource, ...).
#[derive(Debug, Clone, Copy)]
pub struct MappingEntry<T> {
    pub mapping: NativeMapping,
    pub mode: MapMode,
    pub ref_count: u32,
    pub target: T,
}

pub struct MappedResourceCache<T = ()> {
    table: Mutex<HashMap<MappingKey, MappingEntry<T>>>,
}

impl<T: Copy> MappedResourceCache<T> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Find or create the mapping for `key`.
    ///
    /// A repeated map with the same mode shares the existing native mapping
    /// and bumps its count; a different mode is a usage error.
    pub fn map<F>(
        &self,
        key: MappingKey,
        mode: MapMode,
        target: T,
        submission: &Mutex<()>,
        native_map: F,
    ) -> HalResult<NativeMapping>
    where
        F: FnOnce() -> HalResult<NativeMapping>,
    {
        let mut table = self.table.lock();
        if let Some(entry) = table.get_mut(&key) {
            if entry.mode != mode {
                return Err(HalError::usage(format!(
                    "resource {} (subresource {}) already mapped with a different mode ({:?}, requested {:?})",
                    key.resource, key.subresource, entry.mode, mode
                )));
            }
            entry.ref_count += 1;
            return Ok(entry.mapping);
        }

        let mapping = {
            let _submission = submission.lock();
            native_map()?
        };
        debug!(
            "mapped resource {} subresource {} ({} bytes, {:?})",
            key.resource, key.subresource, mapping.size_in_bytes, mode
        );
        table.insert(
            key,
            MappingEntry {
                mapping,
                mode,
                ref_count: 1,
                target,
            },
        );
        Ok(mapping)
    }

    /// Release one claim on `key`. Returns `true` when this call performed
    /// the native unmap.
    pub fn unmap<F>(&self, key: MappingKey, submission: &Mutex<()>, native_unmap: F) -> HalResult<bool>
    where
        F: FnOnce(&MappingEntry<T>),
    {
        let mut table = self.table.lock();
        let entry = table.get_mut(&key).ok_or_else(|| {
            HalError::usage(format!(
                "resource {} (subresource {}) is not mapped",
                key.resource, key.subresource
            ))
        })?;

        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return Ok(false);
        }

        if let Some(entry) = table.remove(&key) {
            let _submission = submission.lock();
            native_unmap(&entry);
        }
        debug!("unmapped resource {} subresource {}", key.resource, key.subresource);
        Ok(true)
    }

    pub fn get(&self, key: &MappingKey) -> Option<MappingEntry<T>> {
        self.table.lock().get(key).copied()
    }

    /// Run `f` against the live entry for `key` while the table lock is
    /// held, so the mapping cannot be torn down underneath it.
    pub fn with_entry<R, F>(&self, key: &MappingKey, f: F) -> HalResult<R>
    where
        F: FnOnce(&MappingEntry<T>) -> HalResult<R>,
    {
        let table = self.table.lock();
        let entry = table.get(key).ok_or_else(|| {
            HalError::usage(format!(
                "resource {} (subresource {}) is not mapped",
                key.resource, key.subresource
            ))
        })?;
        f(entry)
    }

    /// Force-unmap every subresource of `resource`, regardless of count.
    /// Returns how many entries were dropped.
    pub fn evict_resource<F>(&self, resource: RefCountId, submission: &Mutex<()>, native_unmap: F) -> usize
    where
        F: FnMut(&MappingKey, &MappingEntry<T>),
    {
        self.evict_where(|key| key.resource == resource, submission, native_unmap)
    }

    /// Force-unmap every live entry (device teardown).
    pub fn evict_all<F>(&self, submission: &Mutex<()>, native_unmap: F) -> usize
    where
        F: FnMut(&MappingKey, &MappingEntry<T>),
    {
        self.evict_where(|_| true, submission, native_unmap)
    }

    fn evict_where<P, F>(&self, predicate: P, submission: &Mutex<()>, mut native_unmap: F) -> usize
    where
        P: Fn(&MappingKey) -> bool,
        F: FnMut(&MappingKey, &MappingEntry<T>),
    {
        let mut table = self.table.lock();
        let keys: Vec<MappingKey> = table.keys().filter(|k| predicate(k)).copied().collect();
        if keys.is_empty() {
            return 0;
        }

        let _submission = submission.lock();
        for key in &keys {
            if let Some(entry) = table.remove(key) {
                native_unmap(key, &entry);
            }
        }
        keys.len()
    }

    /// Return number of active mappings.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl<T: Copy> Default for MappedResourceCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
