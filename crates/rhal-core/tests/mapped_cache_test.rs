//! Integration test: MappedResourceCache
//!
//! Exercises the ref-counted mapping table with counting stand-ins for the
//! native map/unmap calls.
//!
//! Run with: cargo test -p rhal-core --test mapped_cache_test -- --nocapture

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rhal_core::mapped::{MappedResourceCache, MappingKey, NativeMapping};
use rhal_types::{MapMode, RefCountId};

struct Counters {
    maps: AtomicUsize,
    unmaps: AtomicUsize,
}

fn counters() -> Arc<Counters> {
    Arc::new(Counters {
        maps: AtomicUsize::new(0),
        unmaps: AtomicUsize::new(0),
    })
}

fn fake_mapping(size: u64) -> NativeMapping {
    NativeMapping {
        ptr: NonNull::dangling(),
        size_in_bytes: size,
        row_pitch: size as u32,
        depth_pitch: size as u32,
    }
}

#[test]
fn test_balanced_maps_share_one_native_mapping() {
    let cache: MappedResourceCache = MappedResourceCache::new();
    let submission = Mutex::new(());
    let counts = counters();
    let key = MappingKey::new(RefCountId(7), 0);

    for _ in 0..5 {
        cache
            .map(key, MapMode::Write, (), &submission, || {
                counts.maps.fetch_add(1, Ordering::SeqCst);
                Ok(fake_mapping(128))
            })
            .expect("map");
    }
    assert_eq!(counts.maps.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get(&key).map(|e| e.ref_count), Some(5));

    for i in 0..5 {
        let unmapped = cache
            .unmap(key, &submission, |_| {
                counts.unmaps.fetch_add(1, Ordering::SeqCst);
            })
            .expect("unmap");
        assert_eq!(unmapped, i == 4, "only the last unmap is native");
    }
    assert_eq!(counts.unmaps.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_map_with_different_mode_fails() {
    let cache: MappedResourceCache = MappedResourceCache::new();
    let submission = Mutex::new(());
    let key = MappingKey::new(RefCountId(1), 0);

    cache
        .map(key, MapMode::Write, (), &submission, || Ok(fake_mapping(16)))
        .expect("first map");
    let err = cache
        .map(key, MapMode::Read, (), &submission, || Ok(fake_mapping(16)))
        .expect_err("mode mismatch");
    assert!(err.is_usage(), "got {:?}", err);
    // The failed attempt must not have bumped the count
    assert_eq!(cache.get(&key).map(|e| e.ref_count), Some(1));
}

#[test]
fn test_unmap_without_map_fails() {
    let cache: MappedResourceCache = MappedResourceCache::new();
    let submission = Mutex::new(());
    let err = cache
        .unmap(MappingKey::new(RefCountId(3), 2), &submission, |_| {
            panic!("native unmap must not run")
        })
        .expect_err("not mapped");
    assert!(err.is_usage());
}

#[test]
fn test_double_unmap_fails() {
    let cache: MappedResourceCache = MappedResourceCache::new();
    let submission = Mutex::new(());
    let key = MappingKey::new(RefCountId(4), 0);
    cache
        .map(key, MapMode::ReadWrite, (), &submission, || Ok(fake_mapping(8)))
        .expect("map");
    cache.unmap(key, &submission, |_| {}).expect("unmap");
    assert!(cache.unmap(key, &submission, |_| {}).is_err());
}

#[test]
fn test_subresources_are_distinct_keys() {
    let cache: MappedResourceCache = MappedResourceCache::new();
    let submission = Mutex::new(());
    let a = MappingKey::new(RefCountId(9), 0);
    let b = MappingKey::new(RefCountId(9), 1);

    cache
        .map(a, MapMode::Write, (), &submission, || Ok(fake_mapping(4)))
        .expect("map a");
    // Different subresource may use a different mode
    cache
        .map(b, MapMode::Read, (), &submission, || Ok(fake_mapping(4)))
        .expect("map b");
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_failed_native_map_leaves_no_entry() {
    let cache: MappedResourceCache = MappedResourceCache::new();
    let submission = Mutex::new(());
    let key = MappingKey::new(RefCountId(5), 0);
    let err = cache
        .map(key, MapMode::Write, (), &submission, || {
            Err(rhal_types::HalError::unsupported("not mappable"))
        })
        .expect_err("native failure");
    assert!(err.is_unsupported());
    assert!(cache.get(&key).is_none());
}

#[test]
fn test_native_map_runs_under_submission_lock() {
    let cache: MappedResourceCache = MappedResourceCache::new();
    let submission = Mutex::new(());
    let key = MappingKey::new(RefCountId(6), 0);
    cache
        .map(key, MapMode::Write, (), &submission, || {
            assert!(submission.is_locked(), "submission lock must be held");
            Ok(fake_mapping(4))
        })
        .expect("map");
    cache
        .unmap(key, &submission, |_| {
            assert!(submission.is_locked(), "submission lock must be held");
        })
        .expect("unmap");
}

#[test]
fn test_evict_resource_drops_every_subresource() {
    let cache: MappedResourceCache = MappedResourceCache::new();
    let submission = Mutex::new(());
    let counts = counters();
    for sub in 0..3 {
        let key = MappingKey::new(RefCountId(11), sub);
        cache
            .map(key, MapMode::Write, (), &submission, || Ok(fake_mapping(4)))
            .expect("map");
        cache
            .map(key, MapMode::Write, (), &submission, || Ok(fake_mapping(4)))
            .expect("map again");
    }
    cache
        .map(MappingKey::new(RefCountId(12), 0), MapMode::Read, (), &submission, || {
            Ok(fake_mapping(4))
        })
        .expect("other resource");

    let evicted = cache.evict_resource(RefCountId(11), &submission, |_, _| {
        counts.unmaps.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(evicted, 3);
    assert_eq!(counts.unmaps.load(Ordering::SeqCst), 3);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_concurrent_balanced_maps() {
    let cache: Arc<MappedResourceCache> = Arc::new(MappedResourceCache::new());
    let submission = Arc::new(Mutex::new(()));
    let counts = counters();
    let key = MappingKey::new(RefCountId(42), 0);

    let threads: Vec<_> = (0..2)
        .map(|_| {
            let cache = cache.clone();
            let submission = submission.clone();
            let counts = counts.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    cache
                        .map(key, MapMode::Write, (), &submission, || {
                            counts.maps.fetch_add(1, Ordering::SeqCst);
                            Ok(fake_mapping(64))
                        })
                        .expect("map");
                    cache
                        .unmap(key, &submission, |_| {
                            counts.unmaps.fetch_add(1, Ordering::SeqCst);
                        })
                        .expect("unmap");
                }
            })
        })
        .collect();
    for t in threads {
        t.join().expect("thread");
    }

    assert!(cache.is_empty());
    let maps = counts.maps.load(Ordering::SeqCst);
    let unmaps = counts.unmaps.load(Ordering::SeqCst);
    println!("native maps: {}, native unmaps: {}", maps, unmaps);
    assert_eq!(maps, unmaps);
    assert!(maps >= 1);
}
