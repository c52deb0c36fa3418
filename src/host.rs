//! Host-side glue around [`FilterPipeline`]: a manual trigger, an optional per-tick re-run,
//! and saving the current output.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::device::ComputeDevice;
use crate::foundation::core::Image;
use crate::foundation::error::{FilterError, FilterResult};
use crate::pipeline::FilterPipeline;

/// Owns a device, a source image, and the last successfully produced output.
///
/// Runs are serialized by `&mut self`: a tick cannot start while the previous run's readback
/// is still blocking.
pub struct FilterHost<D: ComputeDevice> {
    pipeline: FilterPipeline,
    device: D,
    source: Image,
    output: Option<Image>,
    continuous: bool,
}

impl<D: ComputeDevice> FilterHost<D> {
    pub fn new(pipeline: FilterPipeline, device: D, source: Image) -> Self {
        let continuous = pipeline.settings().continuous;
        Self {
            pipeline,
            device,
            source,
            output: None,
            continuous,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn source(&self) -> &Image {
        &self.source
    }

    /// Replace the source image. The current output is kept until the next run.
    pub fn set_source(&mut self, source: Image) {
        self.source = source;
    }

    /// Image to display: the last output, or the source before the first successful run.
    pub fn output(&self) -> &Image {
        self.output.as_ref().unwrap_or(&self.source)
    }

    pub fn continuous(&self) -> bool {
        self.continuous
    }

    pub fn set_continuous(&mut self, on: bool) {
        self.continuous = on;
    }

    /// Run the pipeline once. On failure the previous output stays in place.
    pub fn execute(&mut self) -> FilterResult<&Image> {
        match self.pipeline.run(&mut self.device, &self.source) {
            Ok(out) => {
                self.output = Some(out.into_owned());
                Ok(self.output())
            }
            Err(err) => {
                tracing::warn!(error = %err, "filter run failed, keeping previous output");
                Err(err)
            }
        }
    }

    /// Per-tick entry point. Runs only in continuous mode; returns whether it ran.
    pub fn tick(&mut self) -> FilterResult<bool> {
        if !self.continuous {
            return Ok(false);
        }
        self.execute()?;
        Ok(true)
    }

    /// Write the current output to `dir/filtered_<unix millis>.png`.
    pub fn save_output(&self, dir: &Path) -> FilterResult<PathBuf> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| FilterError::Other(e.into()))?
            .as_millis();
        let path = dir.join(format!("filtered_{millis}.png"));
        save_png(self.output(), &path)?;
        Ok(path)
    }
}

/// Load any format the `image` crate decodes, as straight-alpha `f32` RGBA.
pub fn load_image(path: &Path) -> FilterResult<Image> {
    Ok(image::open(path)?.to_rgba32f())
}

/// Save `img` as 8-bit RGBA PNG, creating parent directories.
pub fn save_png(img: &Image, path: &Path) -> FilterResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let rgba8 = image::DynamicImage::ImageRgba32F(img.clone()).to_rgba8();
    rgba8.save_with_format(path, image::ImageFormat::Png)?;
    tracing::info!(path = %path.display(), "wrote image");
    Ok(())
}

#[cfg(test)]
#[path = "../tests/unit/host.rs"]
mod tests;
