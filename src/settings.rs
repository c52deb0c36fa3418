use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::codec::RecordLayout;
use crate::dispatch::THREAD_GROUP_SIZE;
use crate::foundation::error::{FilterError, FilterResult};
use crate::kernel::DEFAULT_KERNEL;

/// Filter configuration, loadable from JSON. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterSettings {
    /// When false, runs return the source image without touching the device.
    pub enabled: bool,
    /// Kernel to run. Empty selects `fallback_kernel`.
    pub kernel: String,
    pub fallback_kernel: String,
    /// Strength / sample-size parameter bound to the kernel.
    pub sample_param: i32,
    pub layout: RecordLayout,
    pub thread_group_size: u32,
    /// Whether a host re-runs the filter every tick.
    pub continuous: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            kernel: String::new(),
            fallback_kernel: DEFAULT_KERNEL.to_string(),
            sample_param: 8,
            layout: RecordLayout::Color,
            thread_group_size: THREAD_GROUP_SIZE,
            continuous: false,
        }
    }
}

impl FilterSettings {
    pub fn validate(&self) -> FilterResult<()> {
        if self.thread_group_size == 0 || !self.thread_group_size.is_power_of_two() {
            return Err(FilterError::config(format!(
                "thread_group_size must be a non-zero power of two, got {}",
                self.thread_group_size
            )));
        }
        if self.fallback_kernel.trim().is_empty() {
            return Err(FilterError::config("fallback_kernel must not be empty"));
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> FilterResult<Self> {
        let settings: Self = serde_json::from_str(s)
            .map_err(|e| FilterError::config(format!("parse settings JSON: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_path(path: &Path) -> FilterResult<Self> {
        let f = File::open(path)?;
        let settings: Self = serde_json::from_reader(BufReader::new(f)).map_err(|e| {
            FilterError::config(format!("parse settings '{}': {e}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
#[path = "../tests/unit/settings.rs"]
mod tests;
