//! Integration test: object lifetimes across resource sets and batches
//!
//! Native objects must outlive every resource set binding them and every
//! batch using them, whatever order the handles are dropped in. The
//! software driver counts any destroy that breaks this.
//!
//! Run with: cargo test -p rhal-device --test lifetime_test -- --nocapture

use std::sync::Arc;

use rhal_core::config::DeviceConfig;
use rhal_device::{BindableResource, GraphicsDevice, SoftwareDriver};
use rhal_types::{
    BackendKind, BufferDescription, BufferUsage, PixelFormat, SamplerDescription, SamplerFilter,
    TextureDescription, TextureUsage,
};

fn make_device(backend: BackendKind, debug: bool) -> (Arc<SoftwareDriver>, GraphicsDevice) {
    let driver = Arc::new(SoftwareDriver::for_backend(backend).expect("software driver"));
    let config = DeviceConfig {
        debug,
        ..DeviceConfig::default()
    };
    let device = GraphicsDevice::new(driver.clone(), &config);
    (driver, device)
}

fn sampled_texture(device: &GraphicsDevice) -> rhal_device::Texture {
    device
        .create_texture(&TextureDescription::texture_2d(
            16,
            16,
            1,
            1,
            PixelFormat::R8G8B8A8Unorm,
            TextureUsage::SAMPLED,
        ))
        .expect("create texture")
}

#[test]
fn test_resource_set_keeps_constituents_alive() {
    for backend in BackendKind::ALL {
        let (driver, device) = make_device(backend, false);
        let buffer = device
            .create_buffer(&BufferDescription::new(256, BufferUsage::UNIFORM))
            .expect("buffer");
        let texture = sampled_texture(&device);
        let sampler = device
            .create_sampler(&SamplerDescription::default())
            .expect("sampler");
        let natives = [buffer.native(), texture.native(), sampler.native()];
        let buffer_id = buffer.id();

        let set = device
            .create_resource_set(&[
                BindableResource::from(&buffer),
                BindableResource::from(&texture),
                BindableResource::from(&sampler),
            ])
            .expect("resource set");
        assert_eq!(set.constituents().len(), 3);
        assert_eq!(device.ref_count(buffer_id), Some(2));

        // Constituents first, set last
        drop(buffer);
        drop(texture);
        drop(sampler);
        assert!(natives.iter().all(|&n| driver.contains(n)), "{:?}", backend);
        assert_eq!(device.ref_count(buffer_id), Some(1));

        let set_native = set.native();
        drop(set);
        assert!(!driver.contains(set_native));
        assert!(natives.iter().all(|&n| !driver.contains(n)));
        assert_eq!(device.live_objects(), 0);
        assert_eq!(driver.stats().lifetime_violations, 0);
        println!("{:?}: {:?}", backend, driver.stats());
    }
}

#[test]
fn test_resource_set_dropped_first() {
    let (driver, device) = make_device(BackendKind::Explicit, false);
    let buffer = device
        .create_buffer(&BufferDescription::new(64, BufferUsage::STRUCTURED_READ_ONLY))
        .expect("buffer");
    let set = device
        .create_resource_set(&[BindableResource::from(&buffer)])
        .expect("resource set");

    set.dispose();
    assert!(driver.contains(buffer.native()));
    assert_eq!(device.ref_count(buffer.id()), Some(1));

    let native = buffer.native();
    buffer.dispose();
    assert!(!driver.contains(native));
    assert_eq!(driver.stats().lifetime_violations, 0);
}

#[test]
fn test_foreign_binding_is_rejected() {
    let (_a_driver, a) = make_device(BackendKind::Immediate, false);
    let (_b_driver, b) = make_device(BackendKind::Immediate, false);
    let ours = a
        .create_buffer(&BufferDescription::new(64, BufferUsage::UNIFORM))
        .expect("ours");
    let theirs = b
        .create_buffer(&BufferDescription::new(64, BufferUsage::UNIFORM))
        .expect("theirs");

    let err = a
        .create_resource_set(&[BindableResource::from(&ours), BindableResource::from(&theirs)])
        .expect_err("foreign binding");
    assert!(err.is_usage());
    // The claim taken on `ours` before the failure was rolled back
    assert_eq!(a.ref_count(ours.id()), Some(1));
}

#[test]
fn test_invalid_sampler_is_rejected() {
    let (driver, device) = make_device(BackendKind::Tiled, false);
    let desc = SamplerDescription {
        filter: SamplerFilter::Anisotropic,
        max_anisotropy: 0,
        ..SamplerDescription::default()
    };
    assert!(device.create_sampler(&desc).expect_err("anisotropy").is_usage());
    assert_eq!(driver.live_objects(), 0);
}

#[test]
fn test_batch_retains_resources_until_retired() {
    for backend in [BackendKind::Tiled, BackendKind::Explicit] {
        let (driver, device) = make_device(backend, false);
        driver.pause();

        let src = device
            .create_buffer(&BufferDescription::new(128, BufferUsage::STAGING))
            .expect("src");
        let dst = device
            .create_buffer(&BufferDescription::new(128, BufferUsage::STAGING))
            .expect("dst");
        let natives = [src.native(), dst.native()];

        let mut list = device.create_command_list();
        list.begin();
        list.copy_buffer(&src, 0, &dst, 0, 128).expect("copy");
        list.end().expect("end");
        device.submit_commands(&list, None).expect("submit");

        // Every user-visible handle is gone while the batch is queued
        drop(list);
        drop(src);
        drop(dst);
        assert!(natives.iter().all(|&n| driver.contains(n)), "{:?}", backend);
        assert_eq!(device.live_objects(), 2);

        driver.resume();
        device.wait_for_idle();
        assert!(natives.iter().all(|&n| !driver.contains(n)));
        assert_eq!(device.live_objects(), 0);
        assert_eq!(driver.stats().lifetime_violations, 0);
    }
}

#[test]
fn test_bound_resource_set_survives_its_batch() {
    let (driver, device) = make_device(BackendKind::Explicit, false);
    driver.pause();

    let texture = sampled_texture(&device);
    let set = device
        .create_resource_set(&[BindableResource::from(&texture)])
        .expect("resource set");
    let set_native = set.native();
    let texture_native = texture.native();

    let mut list = device.create_command_list();
    list.begin();
    list.set_resource_set(0, &set).expect("bind");
    list.end().expect("end");
    let fence = device.create_fence(false);
    device.submit_commands(&list, Some(&fence)).expect("submit");
    drop(list);
    drop(set);
    drop(texture);
    assert!(driver.contains(set_native));
    assert!(driver.contains(texture_native));

    driver.resume();
    assert!(device.wait_for_fence(&fence, 1_000_000_000).expect("wait"));
    device.wait_for_idle();
    assert!(!driver.contains(set_native));
    assert!(!driver.contains(texture_native));
    assert_eq!(driver.stats().lifetime_violations, 0);
}

#[test]
fn test_recording_retains_resources() {
    let (driver, device) = make_device(BackendKind::Immediate, false);
    let src = device
        .create_buffer(&BufferDescription::new(32, BufferUsage::STAGING))
        .expect("src");
    let dst = device
        .create_buffer(&BufferDescription::new(32, BufferUsage::VERTEX))
        .expect("dst");
    let src_native = src.native();

    let mut list = device.create_command_list();
    list.begin();
    list.copy_buffer(&src, 0, &dst, 0, 32).expect("copy");
    drop(src);
    assert!(driver.contains(src_native));

    // Restarting the recording lets go of the previous one's resources
    list.begin();
    assert!(!driver.contains(src_native));
    assert_eq!(list.command_count(), 0);
    drop(dst);
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn test_set_name_forwarding() {
    // Drivers with label support always get the name
    let (driver, device) = make_device(BackendKind::Immediate, false);
    let buffer = device
        .create_buffer(&BufferDescription::new(16, BufferUsage::VERTEX))
        .expect("buffer");
    device.set_name(&buffer, "vertices").expect("name");
    assert_eq!(buffer.name().as_deref(), Some("vertices"));
    assert_eq!(driver.object_name(buffer.native()).as_deref(), Some("vertices"));

    // Without label support, only debug devices forward it
    let (driver, device) = make_device(BackendKind::Explicit, false);
    let texture = sampled_texture(&device);
    device.set_name(&texture, "albedo").expect("name");
    assert_eq!(texture.name().as_deref(), Some("albedo"));
    assert_eq!(driver.object_name(texture.native()), None);

    let (driver, device) = make_device(BackendKind::Explicit, true);
    let texture = sampled_texture(&device);
    device.set_name(&texture, "albedo").expect("name");
    assert_eq!(driver.object_name(texture.native()).as_deref(), Some("albedo"));
}

#[test]
fn test_set_name_on_foreign_resource() {
    let (_a_driver, a) = make_device(BackendKind::Tiled, true);
    let (_b_driver, b) = make_device(BackendKind::Tiled, true);
    let buffer = a
        .create_buffer(&BufferDescription::new(16, BufferUsage::VERTEX))
        .expect("buffer");
    assert!(b.set_name(&buffer, "nope").expect_err("foreign").is_usage());
    assert_eq!(buffer.name(), None);
}
