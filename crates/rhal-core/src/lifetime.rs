//! Reference counts for GPU-visible objects.
//!
//! Every object gets an id at creation with a count of 1 (the creator's
//! handle). Each binding into a longer-lived aggregate adds one; each
//! holder releasing its claim removes one. The stored dispose callback
//! runs exactly once, on the 1 -> 0 transition.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use rhal_types::{HalError, HalResult, RefCountId};
use tracing::debug;

/// Runs once with the id whose count reached zero.
pub type DisposeCallback = Box<dyn FnOnce(RefCountId) + Send + 'static>;

struct RefSlot {
    count: AtomicU32,
    on_zero: Mutex<Option<DisposeCallback>>,
}

pub struct ResourceLifetimeManager {
    slots: DashMap<RefCountId, RefSlot>,
    /// Counter for generating unique ids
    next_id: AtomicU32,
}

impl ResourceLifetimeManager {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            // Start from 1 so a zeroed id is never live
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate a fresh id with a count of 1.
    pub fn register<F>(&self, dispose: F) -> RefCountId
    where
        F: FnOnce(RefCountId) + Send + 'static,
    {
        let id = RefCountId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.insert(
            id,
            RefSlot {
                count: AtomicU32::new(1),
                on_zero: Mutex::new(Some(Box::new(dispose))),
            },
        );
        id
    }

    /// Record one more holder of `id`.
    pub fn increment(&self, id: RefCountId) -> HalResult<()> {
        let slot = self
            .slots
            .get(&id)
            .ok_or_else(|| HalError::usage(format!("object {} has already been destroyed", id)))?;
        slot.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c == 0 {
                    None
                } else {
                    c.checked_add(1)
                }
            })
            .map(|_| ())
            .map_err(|_| HalError::usage(format!("object {} is being destroyed", id)))
    }

    /// Release one holder of `id`. Returns `true` when this call ran the
    /// dispose callback.
    pub fn decrement(&self, id: RefCountId) -> HalResult<bool> {
        let previous = {
            let slot = self.slots.get(&id).ok_or_else(|| {
                HalError::usage(format!("object {} released more times than it was held", id))
            })?;
            slot.count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
                .map_err(|_| {
                    HalError::usage(format!("object {} released more times than it was held", id))
                })?
        };

        if previous != 1 {
            return Ok(false);
        }

        // The shard guard is gone; the callback may re-enter the manager.
        if let Some((_, slot)) = self.slots.remove(&id) {
            if let Some(dispose) = slot.on_zero.into_inner() {
                debug!("destroying object {}", id);
                dispose(id);
            }
        }
        Ok(true)
    }

    /// Release one holder of each id, in order. Every id is attempted;
    /// the first error is returned.
    pub fn decrement_all(&self, ids: &[RefCountId]) -> HalResult<()> {
        let mut first_error = None;
        for &id in ids {
            if let Err(e) = self.decrement(id) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current count, or `None` once the object has been destroyed.
    pub fn count(&self, id: RefCountId) -> Option<u32> {
        self.slots.get(&id).map(|slot| slot.count.load(Ordering::Acquire))
    }

    pub fn is_live(&self, id: RefCountId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Return number of live objects.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for ResourceLifetimeManager {
    fn default() -> Self {
        Self::new()
    }
}
