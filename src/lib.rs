#![forbid(unsafe_code)]
//! `kernfilter` runs compute kernels over images.
//!
//! An image is encoded into a flat buffer of `#[repr(C)]` pixel records, uploaded to a
//! [`ComputeDevice`], processed by a named kernel over a 2D grid of thread groups, read back
//! and decoded into a new image. [`CpuDevice`] is a software reference that runs everywhere;
//! `GpuDevice` (feature `gpu`) runs the same kernels as WGSL through wgpu.

pub mod codec;
pub mod device;
pub mod dispatch;
pub mod foundation;
pub mod host;
pub mod kernel;
pub mod pipeline;
pub mod settings;

pub use codec::{
    ColorRecord, PixelRecord, PositionedColorRecord, RecordBuffer, RecordLayout, decode, encode,
};
#[cfg(feature = "gpu")]
pub use device::GpuDevice;
pub use device::{BufferLease, ComputeDevice, CpuDevice, DeviceFault, DeviceStats};
pub use dispatch::{DispatchCoordinator, KernelConfig, THREAD_GROUP_SIZE, WorkGrid};
pub use foundation::core::{Image, Pixel, coords_of, linear_index};
pub use foundation::error::{FilterError, FilterResult};
pub use host::{FilterHost, load_image, save_png};
pub use kernel::{DEFAULT_KERNEL, KernelHandle, KernelRegistry, KernelSignature};
pub use pipeline::FilterPipeline;
pub use settings::FilterSettings;
