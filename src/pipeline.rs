use std::borrow::Cow;

use crate::codec::{self, ColorRecord, PixelRecord, PositionedColorRecord, RecordLayout};
use crate::device::ComputeDevice;
use crate::dispatch::{DispatchCoordinator, KernelConfig};
use crate::foundation::core::Image;
use crate::foundation::error::FilterResult;
use crate::kernel::{KernelHandle, KernelRegistry};
use crate::settings::FilterSettings;

/// One-shot image filter: encode, dispatch, read back, decode.
///
/// The pipeline keeps no state between runs. Each [`FilterPipeline::run`] borrows the device
/// mutably for its whole duration, which is what serializes runs against one device; there is
/// no queuing or cancellation inside.
#[derive(Clone, Debug)]
pub struct FilterPipeline {
    settings: FilterSettings,
    registry: KernelRegistry,
    coordinator: DispatchCoordinator,
}

impl FilterPipeline {
    pub fn new(settings: FilterSettings) -> FilterResult<Self> {
        settings.validate()?;
        Ok(Self {
            registry: KernelRegistry::new(settings.fallback_kernel.clone()),
            coordinator: DispatchCoordinator::new(settings.thread_group_size),
            settings,
        })
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    /// Filter `source` on `device`.
    ///
    /// With filtering disabled the source comes back borrowed and the device is not touched at
    /// all. Otherwise the result is a new image; `source` is never modified. On error nothing
    /// is returned and no device buffer outlives the call.
    #[tracing::instrument(
        skip(self, device, source),
        fields(device = device.label(), width = source.width(), height = source.height())
    )]
    pub fn run<'a, D: ComputeDevice + ?Sized>(
        &self,
        device: &mut D,
        source: &'a Image,
    ) -> FilterResult<Cow<'a, Image>> {
        if !self.settings.enabled {
            tracing::debug!("filtering disabled, passing source through");
            return Ok(Cow::Borrowed(source));
        }

        let kernel = self.registry.resolve(device, &self.settings.kernel)?;
        if kernel.signature.record != self.settings.layout {
            tracing::warn!(
                kernel = kernel.name(),
                declared = %kernel.signature.record,
                layout = %self.settings.layout,
                "record layout differs from the kernel's declared layout"
            );
        }

        let out = match self.settings.layout {
            RecordLayout::Color => self.run_with::<ColorRecord, D>(device, &kernel, source)?,
            RecordLayout::Positioned => {
                self.run_with::<PositionedColorRecord, D>(device, &kernel, source)?
            }
        };

        tracing::info!(kernel = kernel.name(), layout = %self.settings.layout, "filter applied");
        Ok(Cow::Owned(out))
    }

    fn run_with<R: PixelRecord, D: ComputeDevice + ?Sized>(
        &self,
        device: &mut D,
        kernel: &KernelHandle,
        source: &Image,
    ) -> FilterResult<Image> {
        let encoded = codec::encode::<R>(source)?;
        tracing::debug!(records = encoded.len(), stride = R::stride(), "encoded");

        let config = KernelConfig::for_buffer(kernel.name(), &encoded, self.settings.sample_param);
        let filtered = self.coordinator.dispatch(device, kernel, encoded, &config)?;

        codec::decode(&filtered)
    }
}

#[cfg(test)]
#[path = "../tests/unit/pipeline.rs"]
mod tests;
