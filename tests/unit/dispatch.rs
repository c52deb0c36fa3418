use super::*;
use crate::codec::{ColorRecord, encode};
use crate::device::{CpuDevice, DeviceFault};
use crate::foundation::core::{Image, linear_index, solid_image};
use crate::kernel::KernelRegistry;

fn kernel(dev: &CpuDevice, name: &str) -> KernelHandle {
    KernelRegistry::default().resolve(dev, name).unwrap()
}

fn encoded(w: u32, h: u32) -> RecordBuffer<ColorRecord> {
    encode(&solid_image(w, h, [0.25, 0.5, 0.75, 1.0])).unwrap()
}

#[test]
fn grid_truncates_partial_groups() {
    assert_eq!(WorkGrid::covering(50, 40, 16), WorkGrid { x: 3, y: 2, z: 1 });
    assert_eq!(WorkGrid::covering(32, 32, 16), WorkGrid { x: 2, y: 2, z: 1 });
    assert_eq!(WorkGrid::covering(15, 64, 16), WorkGrid { x: 0, y: 4, z: 1 });
    assert_eq!(WorkGrid::covering(50, 40, 16).coverage(16), (48, 32));
    assert!(WorkGrid::covering(15, 64, 16).is_empty());
    assert_eq!(WorkGrid::covering(64, 64, 32).to_string(), "2x2x1");
}

#[test]
fn dispatch_uses_a_2d_grid() {
    let mut dev = CpuDevice::new();
    let k = kernel(&dev, "Identity");
    let buf = encoded(50, 40);
    let cfg = KernelConfig::for_buffer("Identity", &buf, 0);

    let out = DispatchCoordinator::default()
        .dispatch(&mut dev, &k, buf.clone(), &cfg)
        .unwrap();
    assert_eq!(out, buf);
    assert_eq!(dev.stats().last_grid, Some(WorkGrid { x: 3, y: 2, z: 1 }));
    assert_eq!(dev.stats().invocations, 3 * 2 * 16 * 16);
    assert_eq!(dev.stats().bytes_uploaded, 50 * 40 * 12);
}

#[test]
fn trailing_band_comes_back_as_uploaded() {
    let mut dev = CpuDevice::new();
    let k = kernel(&dev, "Invert");
    let buf = encoded(50, 40);
    let cfg = KernelConfig::for_buffer("Invert", &buf, 0);

    let out = DispatchCoordinator::default()
        .dispatch(&mut dev, &k, buf.clone(), &cfg)
        .unwrap();
    for y in 0..40 {
        for x in 0..50 {
            let i = linear_index(x, y, 50);
            if x < 48 && y < 32 {
                assert_eq!(out.records()[i].r, 0.75, "({x},{y}) should be inverted");
            } else {
                assert_eq!(out.records()[i], buf.records()[i], "({x},{y}) should be untouched");
            }
        }
    }
}

#[test]
fn image_smaller_than_a_group_is_not_dispatched() {
    let mut dev = CpuDevice::new();
    let k = kernel(&dev, "Invert");
    let buf = encoded(15, 64);
    let cfg = KernelConfig::for_buffer("Invert", &buf, 0);

    let err = DispatchCoordinator::default()
        .dispatch(&mut dev, &k, buf, &cfg)
        .unwrap_err();
    assert!(matches!(
        err,
        FilterError::InvalidDimensions {
            width: 15,
            height: 64,
            ..
        }
    ));
    assert_eq!(dev.stats().buffers_created, 0);
    assert_eq!(dev.stats().dispatches, 0);
}

#[test]
fn mismatched_config_is_rejected() {
    let mut dev = CpuDevice::new();
    let k = kernel(&dev, "Identity");
    let buf = encoded(32, 32);
    let cfg = KernelConfig {
        kernel_name: "Identity".to_string(),
        width: 16,
        height: 32,
        sample_param: 0,
    };
    let err = DispatchCoordinator::default()
        .dispatch(&mut dev, &k, buf, &cfg)
        .unwrap_err();
    assert!(matches!(err, FilterError::InvalidDimensions { .. }));
    assert_eq!(dev.stats().buffers_created, 0);
}

#[test]
fn config_must_name_the_dispatched_kernel() {
    let mut dev = CpuDevice::new();
    let k = kernel(&dev, "Identity");
    for name in ["NoSuchKernel", "Invert"] {
        let buf = encoded(32, 32);
        let cfg = KernelConfig::for_buffer(name, &buf, 0);
        let err = DispatchCoordinator::default()
            .dispatch(&mut dev, &k, buf, &cfg)
            .unwrap_err();
        assert!(matches!(err, FilterError::KernelNotFound { name: ref n } if n == name));
    }
    assert_eq!(dev.stats().buffers_created, 0);
    assert_eq!(dev.stats().dispatches, 0);
}

#[test]
fn buffer_is_released_on_every_fault() {
    for fault in [DeviceFault::Upload, DeviceFault::Dispatch, DeviceFault::Readback] {
        let mut dev = CpuDevice::new();
        let k = kernel(&dev, "Invert");
        let buf = encoded(32, 32);
        let cfg = KernelConfig::for_buffer("Invert", &buf, 0);
        dev.fail_next(fault);

        let err = DispatchCoordinator::default()
            .dispatch(&mut dev, &k, buf, &cfg)
            .unwrap_err();
        assert!(matches!(err, FilterError::Device(_)), "{fault:?}: {err}");
        assert_eq!(dev.stats().buffers_created, 1, "{fault:?}");
        assert_eq!(dev.stats().buffers_released, 1, "{fault:?}");
        assert_eq!(dev.stats().invalid_releases, 0, "{fault:?}");
        assert_eq!(dev.live_buffers(), 0, "{fault:?}");
    }
}

#[test]
fn buffer_is_released_after_success() {
    let mut dev = CpuDevice::new();
    let k = kernel(&dev, "Identity");
    let buf = encoded(16, 16);
    let cfg = KernelConfig::for_buffer("Identity", &buf, 0);
    DispatchCoordinator::default()
        .dispatch(&mut dev, &k, buf, &cfg)
        .unwrap();
    assert_eq!(dev.live_buffers(), 0);
    assert_eq!(dev.stats().buffers_released, 1);
}

#[test]
fn larger_group_size_shrinks_coverage() {
    let mut dev = CpuDevice::new();
    let k = kernel(&dev, "Invert");
    let img = Image::from_pixel(48, 48, image::Rgba([0.0, 0.0, 0.0, 1.0]));
    let buf = encode::<ColorRecord>(&img).unwrap();
    let cfg = KernelConfig::for_buffer("Invert", &buf, 0);

    // Grid of 1x1 groups of 32, but the kernel runs 16x16 per group: only [0,16)^2 is hit.
    let out = DispatchCoordinator::new(32)
        .dispatch(&mut dev, &k, buf, &cfg)
        .unwrap();
    assert_eq!(dev.stats().last_grid, Some(WorkGrid { x: 1, y: 1, z: 1 }));
    assert_eq!(out.records()[linear_index(15, 15, 48)].r, 1.0);
    assert_eq!(out.records()[linear_index(16, 0, 48)].r, 0.0);
    assert_eq!(out.records()[linear_index(40, 40, 48)].r, 0.0);
}
