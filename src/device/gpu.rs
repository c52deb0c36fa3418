//! wgpu compute device running the bundled WGSL kernels.
//!
//! Every kernel shares one bind group layout: binding 0 is the read-write record buffer,
//! binding 1 a 16-byte [`UniformBlock`]. Readback copies the record buffer into a transient
//! `MAP_READ` staging buffer and blocks on `PollType::wait_indefinitely`.

use std::collections::HashMap;

use crate::device::{
    BufferDesc, BufferId, ComputeDevice, Uniform, UniformBlock, check_buffer_binding,
};
use crate::dispatch::WorkGrid;
use crate::foundation::error::{FilterError, FilterResult};
use crate::kernel::{KernelHandle, KernelSignature, builtin};

const UNIFORM_BLOCK_SIZE: u64 = std::mem::size_of::<UniformBlock>() as u64;

fn kernel_source(signature: &KernelSignature) -> Option<&'static str> {
    let src = match signature.name {
        n if n == builtin::IDENTITY.name => include_str!("../shaders/identity.wgsl"),
        n if n == builtin::INVERT.name => include_str!("../shaders/invert.wgsl"),
        n if n == builtin::PIXELATE.name => include_str!("../shaders/pixelate.wgsl"),
        n if n == builtin::POSTERIZE.name => include_str!("../shaders/posterize.wgsl"),
        _ => return None,
    };
    Some(src)
}

struct GpuKernel {
    pipeline: wgpu::ComputePipeline,
    params: wgpu::Buffer,
    uniforms: UniformBlock,
    bound: Option<BufferId>,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

/// A wgpu device with the bundled kernel set compiled into compute pipelines.
///
/// Field order matters: `_instance` is declared last so it is dropped after the device and
/// queue.
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    label: String,
    bind_group_layout: wgpu::BindGroupLayout,
    signatures: Vec<KernelSignature>,
    kernels: Vec<GpuKernel>,
    buffers: HashMap<BufferId, GpuBuffer>,
    next_id: u64,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Pick a high-performance adapter and compile the bundled kernels.
    ///
    /// Fails with `FilterError::Device("no gpu adapter available")` on machines without one.
    pub fn new() -> FilterResult<Self> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> FilterResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| match e {
                wgpu::RequestAdapterError::NotFound { .. } => {
                    FilterError::device("no gpu adapter available")
                }
                other => FilterError::device(format!("wgpu request_adapter failed: {other:?}")),
            })?;

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "gpu adapter selected"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("kernfilter"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| FilterError::device(format!("wgpu request_device failed: {e:?}")))?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kernfilter_records_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(UNIFORM_BLOCK_SIZE),
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("kernfilter_records_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mut signatures = Vec::new();
        let mut kernels = Vec::new();
        for signature in builtin::ALL {
            let Some(source) = kernel_source(&signature) else {
                continue;
            };

            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(signature.name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(signature.name),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });
            if let Some(err) = device.pop_error_scope().await {
                return Err(FilterError::device(format!(
                    "kernel '{}' failed to build: {err}",
                    signature.name
                )));
            }

            let params = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("kernfilter_params"),
                size: UNIFORM_BLOCK_SIZE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            signatures.push(signature);
            kernels.push(GpuKernel {
                pipeline,
                params,
                uniforms: UniformBlock::default(),
                bound: None,
            });
        }

        Ok(Self {
            device,
            queue,
            label: format!("{} ({:?})", info.name, info.backend),
            bind_group_layout,
            signatures,
            kernels,
            buffers: HashMap::new(),
            next_id: 1,
            _instance: instance,
        })
    }

    fn kernel_mut(&mut self, kernel: &KernelHandle) -> FilterResult<&mut GpuKernel> {
        match self.signatures.get(kernel.index) {
            Some(sig) if *sig == kernel.signature => Ok(&mut self.kernels[kernel.index]),
            _ => Err(FilterError::binding(format!(
                "kernel handle {kernel} does not belong to device '{}'",
                self.label
            ))),
        }
    }

    fn buffer(&self, id: BufferId) -> FilterResult<&GpuBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| FilterError::device(format!("{id} is not a live buffer")))
    }

    fn wait_idle(&self) -> FilterResult<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| FilterError::device(format!("wgpu poll failed: {e:?}")))?;
        Ok(())
    }
}

impl ComputeDevice for GpuDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn signatures(&self) -> &[KernelSignature] {
        &self.signatures
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> FilterResult<BufferId> {
        let size = desc.byte_len()? as u64;
        if size == 0 || size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(FilterError::device(format!(
                "buffer '{}' of {size} bytes is not a non-empty multiple of {}",
                desc.label,
                wgpu::COPY_BUFFER_ALIGNMENT
            )));
        }
        let max = self.device.limits().max_storage_buffer_binding_size as u64;
        if size > max {
            return Err(FilterError::device(format!(
                "buffer '{}' of {size} bytes exceeds the device storage binding limit of {max}",
                desc.label
            )));
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, GpuBuffer { buffer, size });
        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> FilterResult<()> {
        let buf = self.buffer(id)?;
        if data.len() as u64 != buf.size {
            return Err(FilterError::device(format!(
                "upload of {} bytes into {id} of {} bytes",
                data.len(),
                buf.size
            )));
        }
        self.queue.write_buffer(&buf.buffer, 0, data);
        Ok(())
    }

    fn set_uniform(
        &mut self,
        kernel: &KernelHandle,
        name: &str,
        value: Uniform,
    ) -> FilterResult<()> {
        let signature = kernel.signature;
        self.kernel_mut(kernel)?
            .uniforms
            .assign(&signature, name, value)
    }

    fn bind_buffer(
        &mut self,
        kernel: &KernelHandle,
        name: &str,
        id: BufferId,
    ) -> FilterResult<()> {
        check_buffer_binding(&kernel.signature, name)?;
        self.buffer(id)?;
        self.kernel_mut(kernel)?.bound = Some(id);
        Ok(())
    }

    fn dispatch(&mut self, kernel: &KernelHandle, grid: WorkGrid) -> FilterResult<()> {
        let (uniforms, bound) = {
            let k = self.kernel_mut(kernel)?;
            (k.uniforms, k.bound)
        };
        let id = bound.ok_or_else(|| {
            FilterError::binding(format!("kernel '{}' has no buffer bound", kernel.name()))
        })?;
        let records = &self.buffer(id)?.buffer;
        let k = &self.kernels[kernel.index];

        self.queue
            .write_buffer(&k.params, 0, bytemuck::bytes_of(&uniforms));

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernfilter_records_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: records.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: k.params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernfilter_dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&k.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid.x, grid.y, grid.z);
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(FilterError::device(format!(
                "dispatch of '{}' failed: {err}",
                kernel.name()
            )));
        }
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId, out: &mut [u8]) -> FilterResult<()> {
        let src = self.buffer(id)?;
        if out.len() as u64 != src.size {
            return Err(FilterError::device(format!(
                "readback of {} bytes from {id} of {} bytes",
                out.len(),
                src.size
            )));
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernfilter_readback"),
            size: src.size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernfilter_readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(&src.buffer, 0, &staging, 0, src.size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });

        let mapped = self.wait_idle().and_then(|()| {
            rx.recv()
                .map_err(|_| FilterError::device("readback channel closed"))?
                .map_err(|e| FilterError::device(format!("readback map failed: {e:?}")))
        });
        if let Err(err) = mapped {
            staging.destroy();
            return Err(err);
        }

        {
            let view = slice.get_mapped_range();
            out.copy_from_slice(&view);
        }
        staging.unmap();
        staging.destroy();
        Ok(())
    }

    fn release_buffer(&mut self, id: BufferId) {
        let Some(buf) = self.buffers.remove(&id) else {
            tracing::error!(
                buffer = %id,
                device = %self.label,
                "release of a buffer that is not live"
            );
            return;
        };
        for k in &mut self.kernels {
            if k.bound == Some(id) {
                k.bound = None;
            }
        }
        buf.buffer.destroy();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/device/gpu.rs"]
mod tests;
