//! Integration test: fences, multi-fence waits, the wait-handle pool and
//! the batch registry.
//!
//! Run with: cargo test -p rhal-core --test fence_test -- --nocapture

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rhal_core::fence::{wait_for_fences, wait_for_slots, Fence};
use rhal_core::submission::{CompletionSource, FenceSyncRegistry};
use rhal_core::wait_pool::WaitHandlePool;

const MS: u64 = 1_000_000;

#[test]
fn test_wait_on_signaled_fence_returns_immediately() {
    let fence = Fence::new(true);
    let start = Instant::now();
    assert!(fence.wait(5_000 * MS).expect("wait"));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_wait_times_out() {
    let fence = Fence::new(false);
    let start = Instant::now();
    assert!(!fence.wait(20 * MS).expect("wait"));
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn test_zero_timeout_polls() {
    let fence = Fence::new(false);
    assert!(!fence.wait(0).expect("poll"));
    fence.set();
    assert!(fence.wait(0).expect("poll"));
}

#[test]
fn test_set_from_other_thread_wakes_waiter() {
    let fence = Fence::new(false);
    let signaller = fence.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        signaller.set();
    });
    assert!(fence.wait(5_000 * MS).expect("wait"));
    handle.join().expect("thread");
}

#[test]
fn test_reset_returns_to_unsignaled() {
    let fence = Fence::new(true);
    fence.reset().expect("reset");
    assert!(!fence.is_signaled());
    assert!(!fence.wait(0).expect("poll"));
}

#[test]
fn test_disposed_fence_is_usage_error() {
    let fence = Fence::new(true);
    fence.dispose();
    assert!(fence.wait(0).expect_err("disposed").is_usage());
    assert!(fence.reset().expect_err("disposed").is_usage());
    assert!(wait_for_fences(&[fence], true, 0)
        .expect_err("disposed")
        .is_usage());
}

#[test]
fn test_wait_all_requires_every_fence() {
    let f1 = Fence::new(false);
    let f2 = Fence::new(false);
    let fences = [f1.clone(), f2.clone()];

    f1.set();
    assert!(!wait_for_fences(&fences, true, 10 * MS).expect("wait"));

    let late = f2.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        late.set();
    });
    assert!(wait_for_fences(&fences, true, 5_000 * MS).expect("wait"));
    handle.join().expect("thread");
}

#[test]
fn test_wait_any_returns_on_first_signal() {
    let f1 = Fence::new(false);
    let f2 = Fence::new(false);
    let fences = [f1.clone(), f2.clone()];
    assert!(!wait_for_fences(&fences, false, 5 * MS).expect("wait"));

    let early = f2.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        early.set();
    });
    assert!(wait_for_fences(&fences, false, 5_000 * MS).expect("wait"));
    assert!(!f1.is_signaled());
    handle.join().expect("thread");
}

#[test]
fn test_empty_fence_set() {
    let start = Instant::now();
    // Nothing can ever satisfy "any" over no fences
    assert!(!wait_for_fences(&[], false, 5_000 * MS).expect("any"));
    assert!(!wait_for_slots(&[], false, 5_000 * MS).expect("any slots"));
    // "All" over no fences is trivially met
    assert!(wait_for_fences(&[], true, 5_000 * MS).expect("all"));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_wait_pool_reuses_most_recent_array_of_matching_length() {
    let pool = WaitHandlePool::new(8);
    let mut a = pool.checkout(2);
    a[0] = Some(Fence::new(true));
    a[1] = Some(Fence::new(true));
    let a_ptr = a.as_ptr();
    pool.give_back(a);
    pool.give_back(pool.checkout(3));

    let reused = pool.checkout(2);
    assert_eq!(reused.as_ptr(), a_ptr);
    // Not zeroed on return
    assert!(reused.iter().all(Option::is_some));
    assert!(wait_for_slots(&reused, true, 0).expect("wait"));
    assert_eq!(pool.pooled(), 1);
}

#[test]
fn test_unfilled_slots_are_rejected() {
    let pool = WaitHandlePool::new(4);
    let slots = pool.checkout(2);
    assert!(wait_for_slots(&slots, true, 0).expect_err("empty").is_usage());
}

// ── Registry ────────────────────────────────────────────────

/// Completion source whose batches complete when the test says so.
#[derive(Default)]
struct ManualSource {
    completed: Mutex<HashSet<u64>>,
    released: Mutex<Vec<u64>>,
    next: AtomicU64,
}

impl ManualSource {
    fn new_batch(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    fn complete(&self, batch: u64) {
        self.completed.lock().insert(batch);
    }
}

impl CompletionSource for ManualSource {
    type Batch = u64;
    type Token = u64;

    fn token(&self, batch: &u64) -> u64 {
        *batch
    }

    fn is_complete(&self, token: u64) -> bool {
        self.completed.lock().contains(&token)
    }

    fn wait_until_complete(&self, token: u64) {
        // Forced completion
        self.complete(token);
    }

    fn release(&self, batch: u64) {
        self.released.lock().push(batch);
    }
}

#[test]
fn test_poll_retires_completed_batches_in_order() {
    let source = ManualSource::default();
    let registry = FenceSyncRegistry::new();
    let fences: Vec<Fence> = (0..4).map(|_| Fence::new(false)).collect();
    let batches: Vec<u64> = (0..4).map(|_| source.new_batch()).collect();

    for (batch, fence) in batches.iter().zip(&fences) {
        registry.submit(&source, *batch, Some(fence.clone()));
    }
    assert_eq!(registry.in_flight(), 4);

    source.complete(batches[1]);
    source.complete(batches[3]);
    assert_eq!(registry.poll_completions(&source), 2);
    assert_eq!(registry.in_flight(), 2);
    assert_eq!(*source.released.lock(), vec![batches[1], batches[3]]);
    assert!(!fences[0].is_signaled());
    assert!(fences[1].is_signaled());
    assert!(!fences[2].is_signaled());
    assert!(fences[3].is_signaled());

    source.complete(batches[0]);
    source.complete(batches[2]);
    registry.poll_completions(&source);
    assert_eq!(
        *source.released.lock(),
        vec![batches[1], batches[3], batches[0], batches[2]]
    );
}

#[test]
fn test_submit_of_completed_batch_signals_before_return() {
    let source = ManualSource::default();
    let registry = FenceSyncRegistry::new();
    let batch = source.new_batch();
    source.complete(batch);
    let fence = Fence::new(false);
    registry.submit(&source, batch, Some(fence.clone()));
    assert!(fence.is_signaled());
    assert_eq!(registry.in_flight(), 0);
}

#[test]
fn test_wait_for_idle_forces_completion() {
    let source = ManualSource::default();
    let registry = FenceSyncRegistry::new();
    let fence = Fence::new(false);
    registry.submit(&source, source.new_batch(), None);
    registry.submit(&source, source.new_batch(), Some(fence.clone()));

    registry.wait_for_idle(&source);
    assert_eq!(registry.in_flight(), 0);
    assert!(fence.is_signaled());
    assert_eq!(source.released.lock().len(), 2);
}

#[test]
fn test_batches_without_fence_retire_quietly() {
    let source = Arc::new(ManualSource::default());
    let registry = FenceSyncRegistry::new();
    let batch = source.new_batch();
    registry.submit(source.as_ref(), batch, None);
    source.complete(batch);
    assert_eq!(registry.poll_completions(source.as_ref()), 1);
}
