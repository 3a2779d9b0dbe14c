//! Binary CPU-observable completion signals and blocking waits on them.
//!
//! Waits block the calling thread with an explicit nanosecond budget.
//! Running out of budget is a normal `Ok(false)` outcome; only misuse
//! (waiting on a disposed fence) is an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rhal_types::{HalError, HalResult};

#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

struct FenceInner {
    state: Mutex<FenceState>,
    signaled_cv: Condvar,
}

struct FenceState {
    signaled: bool,
    disposed: bool,
    /// Multi-fence waits currently parked on this fence
    waiters: Vec<Arc<MultiWaiter>>,
}

#[derive(Default)]
struct MultiWaiter {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Fence {
    pub fn new(signaled: bool) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                state: Mutex::new(FenceState {
                    signaled,
                    disposed: false,
                    waiters: Vec::new(),
                }),
                signaled_cv: Condvar::new(),
            }),
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.inner.state.lock().signaled
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Transition to signaled and wake every waiter.
    pub fn set(&self) {
        let waiters = {
            let mut state = self.inner.state.lock();
            state.signaled = true;
            self.inner.signaled_cv.notify_all();
            state.waiters.clone()
        };
        for waiter in waiters {
            let _guard = waiter.lock.lock();
            waiter.cv.notify_all();
        }
    }

    pub fn reset(&self) -> HalResult<()> {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(HalError::usage("cannot reset a disposed fence"));
        }
        state.signaled = false;
        Ok(())
    }

    pub fn dispose(&self) {
        self.inner.state.lock().disposed = true;
    }

    /// Block until signaled or until `timeout_ns` elapses.
    /// A zero timeout still checks the current state once.
    pub fn wait(&self, timeout_ns: u64) -> HalResult<bool> {
        let deadline = deadline_after(timeout_ns);
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(HalError::usage("cannot wait on a disposed fence"));
        }
        loop {
            if state.signaled {
                return Ok(true);
            }
            if timeout_ns == 0 {
                return Ok(false);
            }
            if self
                .inner
                .signaled_cv
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(state.signaled);
            }
        }
    }

    fn register(&self, waiter: &Arc<MultiWaiter>) {
        self.inner.state.lock().waiters.push(waiter.clone());
    }

    fn unregister(&self, waiter: &Arc<MultiWaiter>) {
        self.inner
            .state
            .lock()
            .waiters
            .retain(|w| !Arc::ptr_eq(w, waiter));
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Fence")
            .field("signaled", &state.signaled)
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// Wait for all (`wait_all`) or any of `fences`.
pub fn wait_for_fences(fences: &[Fence], wait_all: bool, timeout_ns: u64) -> HalResult<bool> {
    wait_signals(fences.iter(), wait_all, timeout_ns)
}

/// Same as [`wait_for_fences`] over a pooled handle array; every slot
/// must have been filled by the caller.
pub fn wait_for_slots(slots: &[Option<Fence>], wait_all: bool, timeout_ns: u64) -> HalResult<bool> {
    if slots.iter().any(Option::is_none) {
        return Err(HalError::usage("wait handle array has unfilled slots"));
    }
    wait_signals(slots.iter().flatten(), wait_all, timeout_ns)
}

fn wait_signals<'a, I>(fences: I, wait_all: bool, timeout_ns: u64) -> HalResult<bool>
where
    I: Iterator<Item = &'a Fence> + Clone,
{
    if fences.clone().any(|f| f.is_disposed()) {
        return Err(HalError::usage("cannot wait on a disposed fence"));
    }

    let condition = || {
        if wait_all {
            fences.clone().all(|f| f.is_signaled())
        } else {
            fences.clone().any(|f| f.is_signaled())
        }
    };

    if condition() {
        return Ok(true);
    }
    // An any-wait over no fences can never be met
    if timeout_ns == 0 || fences.clone().next().is_none() {
        return Ok(false);
    }

    let deadline = deadline_after(timeout_ns);
    let waiter = Arc::new(MultiWaiter::default());
    for fence in fences.clone() {
        fence.register(&waiter);
    }

    let met = {
        let mut guard = waiter.lock.lock();
        loop {
            if condition() {
                break true;
            }
            if waiter.cv.wait_until(&mut guard, deadline).timed_out() {
                break condition();
            }
        }
    };

    for fence in fences {
        fence.unregister(&waiter);
    }
    Ok(met)
}

fn deadline_after(timeout_ns: u64) -> Instant {
    let now = Instant::now();
    now.checked_add(Duration::from_nanos(timeout_ns))
        .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64))
}
