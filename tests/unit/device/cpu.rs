use super::*;
use crate::kernel::KernelRegistry;

fn handle(dev: &CpuDevice, name: &str) -> KernelHandle {
    KernelRegistry::default().resolve(dev, name).unwrap()
}

fn color_buffer(dev: &mut CpuDevice, recs: &[ColorRecord]) -> BufferId {
    let id = dev
        .create_buffer(&BufferDesc {
            label: "colorDataBuffer",
            len: recs.len(),
            stride: 12,
        })
        .unwrap();
    dev.write_buffer(id, bytemuck::cast_slice(recs)).unwrap();
    id
}

fn bind(dev: &mut CpuDevice, k: &KernelHandle, id: BufferId, w: u32, h: u32, sample: i32) {
    let names = k.signature.uniforms;
    dev.set_uniform(k, names.width, Uniform::U32(w)).unwrap();
    dev.set_uniform(k, names.height, Uniform::U32(h)).unwrap();
    dev.set_uniform(k, names.sample, Uniform::I32(sample)).unwrap();
    dev.bind_buffer(k, k.signature.buffer_binding, id).unwrap();
}

fn read(dev: &mut CpuDevice, id: BufferId, len: usize) -> Vec<ColorRecord> {
    let mut out = vec![ColorRecord::default(); len];
    dev.read_buffer(id, bytemuck::cast_slice_mut(&mut out)).unwrap();
    out
}

#[test]
fn exposes_the_bundled_kernel_set() {
    let dev = CpuDevice::new();
    assert_eq!(dev.signatures(), &builtin::ALL[..]);
    assert_eq!(dev.label(), "cpu-reference");
}

#[test]
fn rejects_unaligned_and_empty_buffers() {
    let mut dev = CpuDevice::new();
    for (len, stride) in [(0, 12), (3, 3)] {
        let err = dev
            .create_buffer(&BufferDesc {
                label: "x",
                len,
                stride,
            })
            .unwrap_err();
        assert!(matches!(err, FilterError::Device(_)));
    }
    assert_eq!(dev.stats().buffers_created, 0);
}

#[test]
fn pixelate_copies_block_anchors() {
    let mut dev = CpuDevice::new();
    let k = handle(&dev, "FilterComputer");
    let (w, h) = (16u32, 16u32);
    let recs: Vec<ColorRecord> = (0..w * h)
        .map(|i| ColorRecord {
            r: i as f32,
            g: 0.0,
            b: 0.0,
        })
        .collect();
    let id = color_buffer(&mut dev, &recs);
    bind(&mut dev, &k, id, w, h, 8);
    dev.dispatch(&k, WorkGrid { x: 1, y: 1, z: 1 }).unwrap();

    let out = read(&mut dev, id, recs.len());
    for y in 0..h {
        for x in 0..w {
            let anchor = linear_index(x - x % 8, y - y % 8, w);
            assert_eq!(out[linear_index(x, y, w)].r, anchor as f32, "({x},{y})");
        }
    }
}

#[test]
fn non_positive_sample_size_pixelates_per_pixel() {
    let mut dev = CpuDevice::new();
    let k = handle(&dev, "FilterComputer");
    let recs: Vec<ColorRecord> = (0..256)
        .map(|i| ColorRecord {
            r: i as f32,
            g: 1.0,
            b: 2.0,
        })
        .collect();
    let id = color_buffer(&mut dev, &recs);
    bind(&mut dev, &k, id, 16, 16, 0);
    dev.dispatch(&k, WorkGrid { x: 1, y: 1, z: 1 }).unwrap();
    assert_eq!(read(&mut dev, id, 256), recs);
}

#[test]
fn posterize_keeps_positions_and_alpha() {
    let mut dev = CpuDevice::new();
    let k = handle(&dev, "ImageFilter");
    let recs: Vec<PositionedColorRecord> = (0..256)
        .map(|i| PositionedColorRecord {
            x: i % 16,
            y: i / 16,
            r: 0.1,
            g: 0.49,
            b: 0.9,
            a: 0.3,
        })
        .collect();
    let id = dev
        .create_buffer(&BufferDesc {
            label: "dataBuffer",
            len: 256,
            stride: 24,
        })
        .unwrap();
    dev.write_buffer(id, bytemuck::cast_slice(&recs)).unwrap();
    bind(&mut dev, &k, id, 16, 16, 3);
    dev.dispatch(&k, WorkGrid { x: 1, y: 1, z: 1 }).unwrap();

    let mut out = vec![PositionedColorRecord::default(); 256];
    dev.read_buffer(id, bytemuck::cast_slice_mut(&mut out)).unwrap();
    for (i, p) in out.iter().enumerate() {
        assert_eq!((p.x, p.y), (recs[i].x, recs[i].y));
        // Three levels: 0, 0.5, 1.
        assert_eq!([p.r, p.g, p.b, p.a], [0.0, 0.5, 1.0, 0.3]);
    }
}

#[test]
fn dispatch_without_a_bound_buffer_fails() {
    let mut dev = CpuDevice::new();
    let k = handle(&dev, "Identity");
    let err = dev.dispatch(&k, WorkGrid { x: 1, y: 1, z: 1 }).unwrap_err();
    assert!(matches!(err, FilterError::Binding(_)));
}

#[test]
fn release_clears_bindings() {
    let mut dev = CpuDevice::new();
    let k = handle(&dev, "Identity");
    let id = color_buffer(&mut dev, &[ColorRecord::default(); 4]);
    bind(&mut dev, &k, id, 2, 2, 0);
    dev.release_buffer(id);

    let err = dev.dispatch(&k, WorkGrid { x: 1, y: 1, z: 1 }).unwrap_err();
    assert!(matches!(err, FilterError::Binding(_)));
    assert!(matches!(
        dev.read_buffer(id, &mut [0u8; 48]).unwrap_err(),
        FilterError::Device(_)
    ));
}

#[test]
fn double_release_is_counted_not_fatal() {
    let mut dev = CpuDevice::new();
    let id = color_buffer(&mut dev, &[ColorRecord::default(); 4]);
    dev.release_buffer(id);
    dev.release_buffer(id);
    assert_eq!(dev.stats().buffers_released, 1);
    assert_eq!(dev.stats().invalid_releases, 1);
}

#[test]
fn injected_faults_fire_once() {
    let mut dev = CpuDevice::new();
    let id = color_buffer(&mut dev, &[ColorRecord::default(); 4]);
    dev.fail_next(DeviceFault::Readback);
    assert!(dev.read_buffer(id, &mut [0u8; 48]).is_err());
    assert!(dev.read_buffer(id, &mut [0u8; 48]).is_ok());
}

#[test]
fn handles_from_other_kernel_sets_are_rejected() {
    let mut dev = CpuDevice::new();
    let mut k = handle(&dev, "Invert");
    k.index = 0;
    let err = dev.set_uniform(&k, "width", Uniform::U32(1)).unwrap_err();
    assert!(matches!(err, FilterError::Binding(_)));
}

#[test]
fn record_view_follows_the_kernel_stride() {
    // Color records under the 24-byte posterize kernel: reinterpreted when the byte length
    // divides evenly, a device error when it does not.
    for (side, fits) in [(16u32, true), (17u32, false)] {
        let mut dev = CpuDevice::new();
        let k = handle(&dev, "ImageFilter");
        let recs = vec![ColorRecord::default(); (side * side) as usize];
        let id = color_buffer(&mut dev, &recs);
        bind(&mut dev, &k, id, side, side, 2);

        let res = dev.dispatch(&k, WorkGrid { x: 1, y: 1, z: 1 });
        if fits {
            res.unwrap();
        } else {
            let err = res.unwrap_err();
            assert!(matches!(err, FilterError::Device(ref m) if m.contains("24-byte records")));
        }
    }
}
