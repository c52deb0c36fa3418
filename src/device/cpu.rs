use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::codec::{ColorRecord, PositionedColorRecord};
use crate::device::{
    BufferDesc, BufferId, ComputeDevice, Uniform, UniformBlock, check_buffer_binding,
};
use crate::dispatch::WorkGrid;
use crate::foundation::core::linear_index;
use crate::foundation::error::{FilterError, FilterResult};
use crate::kernel::{KernelHandle, KernelSignature, builtin};

/// One kernel invocation: global id, bound uniforms, the bound buffer as 32-bit words.
type CpuKernelFn = fn([u32; 2], &UniformBlock, &mut [u32]) -> FilterResult<()>;

/// A device operation that [`CpuDevice::fail_next`] can make fail once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceFault {
    Upload,
    Dispatch,
    Readback,
}

/// Allocation and dispatch counters of a [`CpuDevice`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub buffers_created: u64,
    pub buffers_released: u64,
    /// Releases of ids that were not live (double release or foreign id).
    pub invalid_releases: u64,
    pub bytes_uploaded: u64,
    pub dispatches: u64,
    pub invocations: u64,
    pub last_grid: Option<WorkGrid>,
}

struct CpuKernel {
    run: CpuKernelFn,
    uniforms: UniformBlock,
    bound: Option<BufferId>,
}

/// Software reference device running the bundled kernel set one workgroup at a time.
///
/// Invocations execute in workgroup order, each workgroup row by row. The GPU kernels are
/// written so their result does not depend on invocation order; this device is the oracle
/// they are compared against.
pub struct CpuDevice {
    label: String,
    signatures: Vec<KernelSignature>,
    kernels: Vec<CpuKernel>,
    buffers: BTreeMap<BufferId, Vec<u32>>,
    next_id: u64,
    fault: Option<DeviceFault>,
    stats: DeviceStats,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    pub fn new() -> Self {
        let mut signatures = Vec::new();
        let mut kernels = Vec::new();
        for signature in builtin::ALL {
            let Some(run) = cpu_kernel(&signature) else {
                continue;
            };
            signatures.push(signature);
            kernels.push(CpuKernel {
                run,
                uniforms: UniformBlock::default(),
                bound: None,
            });
        }

        Self {
            label: "cpu-reference".to_string(),
            signatures,
            kernels,
            buffers: BTreeMap::new(),
            next_id: 1,
            fault: None,
            stats: DeviceStats::default(),
        }
    }

    /// Make the next operation of kind `fault` fail. One-shot.
    pub fn fail_next(&mut self, fault: DeviceFault) {
        self.fault = Some(fault);
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Buffers created and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn trip(&mut self, at: DeviceFault) -> FilterResult<()> {
        if self.fault == Some(at) {
            self.fault = None;
            return Err(FilterError::device(format!("injected {at:?} fault")));
        }
        Ok(())
    }

    fn kernel_mut(&mut self, kernel: &KernelHandle) -> FilterResult<&mut CpuKernel> {
        match self.signatures.get(kernel.index) {
            Some(sig) if *sig == kernel.signature => Ok(&mut self.kernels[kernel.index]),
            _ => Err(FilterError::binding(format!(
                "kernel handle {kernel} does not belong to device '{}'",
                self.label
            ))),
        }
    }

    fn buffer_mut(&mut self, id: BufferId) -> FilterResult<&mut Vec<u32>> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| FilterError::device(format!("{id} is not a live buffer")))
    }
}

impl ComputeDevice for CpuDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn signatures(&self) -> &[KernelSignature] {
        &self.signatures
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> FilterResult<BufferId> {
        let bytes = desc.byte_len()?;
        if bytes == 0 || bytes % 4 != 0 {
            return Err(FilterError::device(format!(
                "buffer '{}' of {bytes} bytes is not a non-empty multiple of 4",
                desc.label
            )));
        }
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, vec![0; bytes / 4]);
        self.stats.buffers_created += 1;
        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> FilterResult<()> {
        self.trip(DeviceFault::Upload)?;
        let words = self.buffer_mut(id)?;
        let dst: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
        if dst.len() != data.len() {
            return Err(FilterError::device(format!(
                "upload of {} bytes into {id} of {} bytes",
                data.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(data);
        self.stats.bytes_uploaded += data.len() as u64;
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
        if !self.buffers.contains_key(&id) {
            return Err(FilterError::binding(format!("{id} is not a live buffer")));
        }
        self.kernel_mut(kernel)?.bound = Some(id);
        Ok(())
    }

    fn dispatch(&mut self, kernel: &KernelHandle, grid: WorkGrid) -> FilterResult<()> {
        self.trip(DeviceFault::Dispatch)?;
        let local = kernel.signature.local_size;
        let (run, uniforms, bound) = {
            let k = self.kernel_mut(kernel)?;
            (k.run, k.uniforms, k.bound)
        };
        let id = bound.ok_or_else(|| {
            FilterError::binding(format!("kernel '{}' has no buffer bound", kernel.name()))
        })?;
        let words: &mut [u32] = self.buffer_mut(id)?;

        let mut invocations = 0u64;
        for _gz in 0..grid.z {
            for gy in 0..grid.y {
                for gx in 0..grid.x {
                    for ly in 0..local {
                        for lx in 0..local {
                            run([gx * local + lx, gy * local + ly], &uniforms, words)?;
                            invocations += 1;
                        }
                    }
                }
            }
        }

        self.stats.dispatches += 1;
        self.stats.invocations += invocations;
        self.stats.last_grid = Some(grid);
        Ok(())
    }

    fn read_buffer(&mut self, id: BufferId, out: &mut [u8]) -> FilterResult<()> {
        self.trip(DeviceFault::Readback)?;
        let words = self.buffer_mut(id)?;
        let src: &[u8] = bytemuck::cast_slice(words.as_slice());
        if src.len() != out.len() {
            return Err(FilterError::device(format!(
                "readback of {} bytes from {id} of {} bytes",
                out.len(),
                src.len()
            )));
        }
        out.copy_from_slice(src);
        Ok(())
    }

    fn release_buffer(&mut self, id: BufferId) {
        if self.buffers.remove(&id).is_none() {
            self.stats.invalid_releases += 1;
            tracing::error!(
                buffer = %id,
                device = %self.label,
                "release of a buffer that is not live"
            );
            return;
        }
        for k in &mut self.kernels {
            if k.bound == Some(id) {
                k.bound = None;
            }
        }
        self.stats.buffers_released += 1;
    }
}

fn cpu_kernel(signature: &KernelSignature) -> Option<CpuKernelFn> {
    let run: CpuKernelFn = match signature.name {
        n if n == builtin::IDENTITY.name => identity,
        n if n == builtin::INVERT.name => invert,
        n if n == builtin::PIXELATE.name => pixelate,
        n if n == builtin::POSTERIZE.name => posterize,
        _ => return None,
    };
    Some(run)
}

fn records<R: Pod>(words: &mut [u32]) -> FilterResult<&mut [R]> {
    bytemuck::try_cast_slice_mut(words).map_err(|e| {
        FilterError::device(format!(
            "bound buffer is not a whole number of {}-byte records: {e:?}",
            std::mem::size_of::<R>()
        ))
    })
}

/// Index of invocation `gid`, or `None` outside the image or the buffer.
fn slot(gid: [u32; 2], width: u32, height: u32, len: usize) -> Option<usize> {
    let [x, y] = gid;
    if x >= width || y >= height {
        return None;
    }
    Some(linear_index(x, y, width)).filter(|&i| i < len)
}

fn identity(gid: [u32; 2], u: &UniformBlock, words: &mut [u32]) -> FilterResult<()> {
    let recs = records::<ColorRecord>(words)?;
    if let Some(i) = slot(gid, u.width, u.height, recs.len()) {
        let c = recs[i];
        recs[i] = c;
    }
    Ok(())
}

fn invert(gid: [u32; 2], u: &UniformBlock, words: &mut [u32]) -> FilterResult<()> {
    let recs = records::<ColorRecord>(words)?;
    if let Some(i) = slot(gid, u.width, u.height, recs.len()) {
        let c = &mut recs[i];
        c.r = 1.0 - c.r;
        c.g = 1.0 - c.g;
        c.b = 1.0 - c.b;
    }
    Ok(())
}

fn pixelate(gid: [u32; 2], u: &UniformBlock, words: &mut [u32]) -> FilterResult<()> {
    let recs = records::<ColorRecord>(words)?;
    if let Some(i) = slot(gid, u.width, u.height, recs.len()) {
        let s = u.sample.max(1) as u32;
        let [x, y] = gid;
        recs[i] = recs[linear_index(x - x % s, y - y % s, u.width)];
    }
    Ok(())
}

fn posterize(gid: [u32; 2], u: &UniformBlock, words: &mut [u32]) -> FilterResult<()> {
    let recs = records::<PositionedColorRecord>(words)?;
    if let Some(i) = slot(gid, u.width, u.height, recs.len()) {
        let levels = (u.sample.max(2) - 1) as f32;
        let q = |c: f32| (c.clamp(0.0, 1.0) * levels + 0.5).floor() / levels;
        let p = &mut recs[i];
        p.r = q(p.r);
        p.g = q(p.g);
        p.b = q(p.b);
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/device/cpu.rs"]
mod tests;
