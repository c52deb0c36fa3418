use std::fmt;

use crate::codec::RecordLayout;
use crate::device::ComputeDevice;
use crate::foundation::error::{FilterError, FilterResult};

/// Kernel substituted when the configured name is empty.
pub const DEFAULT_KERNEL: &str = "FilterComputer";

/// Uniform names a kernel declares for its three scalar parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformNames {
    /// `u32` image width.
    pub width: &'static str,
    /// `u32` image height.
    pub height: &'static str,
    /// `i32` strength / sample-size parameter.
    pub sample: &'static str,
}

/// The host-visible contract of one compute kernel.
///
/// `record_stride` and `local_size` restate what the kernel source hard-codes. They are
/// declarations, not measurements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: &'static str,
    pub uniforms: UniformNames,
    /// Name of the single read-write record buffer.
    pub buffer_binding: &'static str,
    pub record: RecordLayout,
    /// Element stride in bytes the kernel indexes the buffer with.
    pub record_stride: u32,
    /// Local workgroup size, square.
    pub local_size: u32,
}

/// Kernel set every bundled device implements.
pub mod builtin {
    use super::{KernelSignature, UniformNames};
    use crate::codec::RecordLayout;

    const COLOR_UNIFORMS: UniformNames = UniformNames {
        width: "width",
        height: "height",
        sample: "sample_size",
    };

    /// Leaves every record untouched.
    pub const IDENTITY: KernelSignature = KernelSignature {
        name: "Identity",
        uniforms: COLOR_UNIFORMS,
        buffer_binding: "colorDataBuffer",
        record: RecordLayout::Color,
        record_stride: 12,
        local_size: 16,
    };

    /// `c -> 1 - c` per channel.
    pub const INVERT: KernelSignature = KernelSignature {
        name: "Invert",
        uniforms: COLOR_UNIFORMS,
        buffer_binding: "colorDataBuffer",
        record: RecordLayout::Color,
        record_stride: 12,
        local_size: 16,
    };

    /// Pixelates into `sample_size x sample_size` blocks, each taking its top-left color.
    pub const PIXELATE: KernelSignature = KernelSignature {
        name: "FilterComputer",
        uniforms: COLOR_UNIFORMS,
        buffer_binding: "colorDataBuffer",
        record: RecordLayout::Color,
        record_stride: 12,
        local_size: 16,
    };

    /// Posterizes color channels to `k` levels, alpha untouched.
    pub const POSTERIZE: KernelSignature = KernelSignature {
        name: "ImageFilter",
        uniforms: UniformNames {
            width: "size_x",
            height: "size_y",
            sample: "k",
        },
        buffer_binding: "dataBuffer",
        record: RecordLayout::Positioned,
        record_stride: 24,
        local_size: 16,
    };

    pub const ALL: [KernelSignature; 4] = [IDENTITY, INVERT, PIXELATE, POSTERIZE];
}

/// A kernel resolved against one device's kernel set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelHandle {
    /// Position in the device's [`ComputeDevice::signatures`].
    pub index: usize,
    pub signature: KernelSignature,
}

impl KernelHandle {
    pub fn name(&self) -> &'static str {
        self.signature.name
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.signature.name, self.index)
    }
}

/// Resolves kernel names against a device, with a single fallback for omitted names.
///
/// Only an empty (or whitespace-only) name falls back. A non-empty name that the device does
/// not know is an error, never silently replaced.
#[derive(Clone, Debug)]
pub struct KernelRegistry {
    default_name: String,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_KERNEL)
    }
}

impl KernelRegistry {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            default_name: default_name.into(),
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Look `name` up on `device`, substituting the default name when `name` is blank.
    pub fn resolve<D: ComputeDevice + ?Sized>(
        &self,
        device: &D,
        name: &str,
    ) -> FilterResult<KernelHandle> {
        let trimmed = name.trim();
        let effective = if trimmed.is_empty() {
            tracing::debug!(fallback = %self.default_name, "kernel name empty, using fallback");
            self.default_name.trim()
        } else {
            trimmed
        };

        device
            .signatures()
            .iter()
            .position(|sig| sig.name == effective)
            .map(|index| KernelHandle {
                index,
                signature: device.signatures()[index],
            })
            .ok_or_else(|| FilterError::kernel_not_found(effective))
    }

    /// Names of every kernel `device` can run, in device order.
    pub fn kernel_names<D: ComputeDevice + ?Sized>(device: &D) -> Vec<&'static str> {
        device.signatures().iter().map(|sig| sig.name).collect()
    }
}

#[cfg(test)]
#[path = "../tests/unit/kernel.rs"]
mod tests;
