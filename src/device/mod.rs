//! Compute devices: where kernels run and record buffers live.
//!
//! The [`ComputeDevice`] trait is shaped after a classic compute-shader host API: buffers are
//! created, filled, bound by name, dispatched over, read back and released. Uniforms are bound
//! by the names the kernel declares in its [`KernelSignature`].

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::dispatch::WorkGrid;
use crate::foundation::error::{FilterError, FilterResult};
use crate::kernel::{KernelHandle, KernelSignature};

pub use cpu::{CpuDevice, DeviceFault, DeviceStats};
#[cfg(feature = "gpu")]
pub use gpu::GpuDevice;

/// Device-owned buffer identifier. Only meaningful to the device that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Shape of a record buffer: `len` elements of `stride` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub len: usize,
    pub stride: usize,
}

impl BufferDesc {
    pub fn byte_len(&self) -> FilterResult<usize> {
        self.len
            .checked_mul(self.stride)
            .ok_or_else(|| FilterError::device(format!("buffer '{}' size overflow", self.label)))
    }
}

/// A scalar uniform value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uniform {
    U32(u32),
    I32(i32),
}

/// Device-side uniform block every bundled kernel reads.
///
/// Slot order is fixed: width, height, sample. Kernels rename the slots in their source; the
/// host addresses them through [`KernelSignature::uniforms`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UniformBlock {
    pub width: u32,
    pub height: u32,
    pub sample: i32,
    pub _pad: u32,
}

impl UniformBlock {
    /// Store `value` in the slot `signature` declares under `name`.
    pub fn assign(
        &mut self,
        signature: &KernelSignature,
        name: &str,
        value: Uniform,
    ) -> FilterResult<()> {
        let names = &signature.uniforms;
        match value {
            Uniform::U32(v) if name == names.width => self.width = v,
            Uniform::U32(v) if name == names.height => self.height = v,
            Uniform::I32(v) if name == names.sample => self.sample = v,
            _ if name == names.width || name == names.height || name == names.sample => {
                return Err(FilterError::binding(format!(
                    "uniform '{name}' of kernel '{}' has a different type than {value:?}",
                    signature.name
                )));
            }
            _ => {
                return Err(FilterError::binding(format!(
                    "kernel '{}' declares no uniform named '{name}'",
                    signature.name
                )));
            }
        }
        Ok(())
    }
}

/// Check that `name` is the buffer binding `signature` declares.
pub fn check_buffer_binding(signature: &KernelSignature, name: &str) -> FilterResult<()> {
    if signature.buffer_binding != name {
        return Err(FilterError::binding(format!(
            "kernel '{}' declares buffer '{}', not '{name}'",
            signature.name, signature.buffer_binding
        )));
    }
    Ok(())
}

/// A device that can run a fixed set of compute kernels over record buffers.
///
/// Calls are issued from one control thread. [`ComputeDevice::read_buffer`] is the only
/// blocking call: it returns once every previously issued dispatch has completed.
pub trait ComputeDevice {
    /// Human-readable device name for logs.
    fn label(&self) -> &str;

    /// Every kernel this device can run. [`KernelHandle::index`] points into this slice.
    fn signatures(&self) -> &[KernelSignature];

    fn create_buffer(&mut self, desc: &BufferDesc) -> FilterResult<BufferId>;

    /// Upload `data` to the start of buffer `id`. `data` must cover the whole buffer.
    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> FilterResult<()>;

    fn set_uniform(&mut self, kernel: &KernelHandle, name: &str, value: Uniform)
    -> FilterResult<()>;

    fn bind_buffer(&mut self, kernel: &KernelHandle, name: &str, id: BufferId)
    -> FilterResult<()>;

    fn dispatch(&mut self, kernel: &KernelHandle, grid: WorkGrid) -> FilterResult<()>;

    /// Blocking readback of the whole buffer into `out`.
    fn read_buffer(&mut self, id: BufferId, out: &mut [u8]) -> FilterResult<()>;

    /// Release buffer `id`. Also clears any kernel binding that still refers to it.
    fn release_buffer(&mut self, id: BufferId);
}

impl<D: ComputeDevice + ?Sized> ComputeDevice for Box<D> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn signatures(&self) -> &[KernelSignature] {
        (**self).signatures()
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> FilterResult<BufferId> {
        (**self).create_buffer(desc)
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> FilterResult<()> {
        (**self).write_buffer(id, data)
    }

    fn set_uniform(
        &mut self,
        kernel: &KernelHandle,
        name: &str,
        value: Uniform,
    ) -> FilterResult<()> {
        (**self).set_uniform(kernel, name, value)
    }

    fn bind_buffer(
        &mut self,
        kernel: &KernelHandle,
        name: &str,
        id: BufferId,
    ) -> FilterResult<()> {
        (**self).bind_buffer(kernel, name, id)
    }

    fn dispatch(&mut self, kernel: &KernelHandle, grid: WorkGrid) -> FilterResult<()> {
        (**self).dispatch(kernel, grid)
    }

    fn read_buffer(&mut self, id: BufferId, out: &mut [u8]) -> FilterResult<()> {
        (**self).read_buffer(id, out)
    }

    fn release_buffer(&mut self, id: BufferId) {
        (**self).release_buffer(id)
    }
}

/// Exclusive lease on one device buffer, released exactly once when dropped.
///
/// The lease holds the only mutable borrow of the device for its lifetime, so no other code
/// can touch the device, or the buffer, until the lease is gone.
pub struct BufferLease<'d, D: ComputeDevice + ?Sized> {
    device: &'d mut D,
    id: BufferId,
}

impl<'d, D: ComputeDevice + ?Sized> BufferLease<'d, D> {
    pub fn create(device: &'d mut D, desc: &BufferDesc) -> FilterResult<Self> {
        let bytes = desc.byte_len()?;
        let id = device.create_buffer(desc)?;
        tracing::debug!(buffer = %id, bytes, "device buffer allocated");
        Ok(Self { device, id })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn device(&mut self) -> &mut D {
        self.device
    }
}

impl<D: ComputeDevice + ?Sized> Drop for BufferLease<'_, D> {
    fn drop(&mut self) {
        self.device.release_buffer(self.id);
        tracing::debug!(buffer = %self.id, "device buffer released");
    }
}

#[cfg(test)]
#[path = "../../tests/unit/device/lease.rs"]
mod tests;
