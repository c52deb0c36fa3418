use std::fmt;

use crate::codec::{PixelRecord, RecordBuffer};
use crate::device::{BufferDesc, BufferLease, ComputeDevice, Uniform};
use crate::foundation::error::{FilterError, FilterResult};
use crate::kernel::KernelHandle;

/// Local workgroup size the bundled kernels are compiled with.
pub const THREAD_GROUP_SIZE: u32 = 16;

/// Dispatch grid in workgroups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkGrid {
    /// Whole workgroups that fit inside `width x height`.
    ///
    /// Truncating division: a trailing partial group is not dispatched, so the right and
    /// bottom bands narrower than `group` are never visited by the kernel.
    pub fn covering(width: u32, height: u32, group: u32) -> Self {
        Self {
            x: width / group,
            y: height / group,
            z: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }

    /// Pixel extent visited by this grid: `[0, w) x [0, h)`.
    pub fn coverage(&self, group: u32) -> (u32, u32) {
        (self.x * group, self.y * group)
    }
}

impl fmt::Display for WorkGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Uniform parameters bound before a dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    pub kernel_name: String,
    pub width: u32,
    pub height: u32,
    pub sample_param: i32,
}

impl KernelConfig {
    /// Config for dispatching over `buffer`.
    pub fn for_buffer<R: PixelRecord>(
        kernel_name: impl Into<String>,
        buffer: &RecordBuffer<R>,
        sample_param: i32,
    ) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            width: buffer.width(),
            height: buffer.height(),
            sample_param,
        }
    }
}

/// Uploads a record buffer, runs one kernel over it, and reads it back.
#[derive(Clone, Copy, Debug)]
pub struct DispatchCoordinator {
    group_size: u32,
}

impl Default for DispatchCoordinator {
    fn default() -> Self {
        Self::new(THREAD_GROUP_SIZE)
    }
}

impl DispatchCoordinator {
    /// `group_size` must equal the kernels' local workgroup size.
    pub fn new(group_size: u32) -> Self {
        Self {
            group_size: group_size.max(1),
        }
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    /// Grid this coordinator dispatches for a `width x height` image.
    pub fn grid_for(&self, width: u32, height: u32) -> WorkGrid {
        WorkGrid::covering(width, height, self.group_size)
    }

    /// Run `kernel` over `buffer` and return the records the device hands back.
    ///
    /// Blocks until the device has finished. The device buffer lives only inside this call and
    /// is released on every return path. Nothing is allocated when `config` names a different
    /// kernel than `kernel`, when the dimensions are rejected, or when the grid is empty.
    #[tracing::instrument(
        skip(self, device, buffer, config),
        fields(kernel = %kernel, width = buffer.width(), height = buffer.height())
    )]
    pub fn dispatch<R: PixelRecord, D: ComputeDevice + ?Sized>(
        &self,
        device: &mut D,
        kernel: &KernelHandle,
        buffer: RecordBuffer<R>,
        config: &KernelConfig,
    ) -> FilterResult<RecordBuffer<R>> {
        if config.kernel_name != kernel.name() {
            return Err(FilterError::kernel_not_found(config.kernel_name.as_str()));
        }
        let (width, height) = (buffer.width(), buffer.height());
        if width == 0 || height == 0 {
            return Err(FilterError::invalid_dimensions(
                width,
                height,
                "image must have non-zero width and height",
            ));
        }
        if (config.width, config.height) != (width, height) {
            return Err(FilterError::invalid_dimensions(
                config.width,
                config.height,
                format!("kernel config does not match the {width}x{height} record buffer"),
            ));
        }

        let grid = self.grid_for(width, height);
        if grid.is_empty() {
            return Err(FilterError::invalid_dimensions(
                width,
                height,
                format!(
                    "smaller than one {g}x{g} workgroup, kernel not dispatched",
                    g = self.group_size
                ),
            ));
        }
        if kernel.signature.local_size != self.group_size {
            tracing::warn!(
                declared = kernel.signature.local_size,
                group_size = self.group_size,
                "kernel local size differs from dispatch group size, coverage will not match"
            );
        }

        let names = kernel.signature.uniforms;
        let desc = BufferDesc {
            label: kernel.signature.buffer_binding,
            len: buffer.len(),
            stride: R::stride(),
        };

        let mut lease = BufferLease::create(device, &desc)?;
        let id = lease.id();
        let dev = lease.device();

        dev.write_buffer(id, buffer.as_bytes())?;
        dev.set_uniform(kernel, names.width, Uniform::U32(width))?;
        dev.set_uniform(kernel, names.height, Uniform::U32(height))?;
        dev.set_uniform(kernel, names.sample, Uniform::I32(config.sample_param))?;
        dev.bind_buffer(kernel, kernel.signature.buffer_binding, id)?;

        tracing::debug!(%grid, "dispatching");
        dev.dispatch(kernel, grid)?;

        let mut records = buffer.into_records();
        dev.read_buffer(id, bytemuck::cast_slice_mut(records.as_mut_slice()))?;
        drop(lease);

        RecordBuffer::new(width, height, records)
    }
}

#[cfg(test)]
#[path = "../tests/unit/dispatch.rs"]
mod tests;
