/// Convenience result type used across kernfilter.
pub type FilterResult<T> = Result<T, FilterError>;

/// Top-level error type used across kernfilter.
///
/// Every variant aborts the current filter invocation. Device buffers leased for that
/// invocation are released before the error reaches the caller.
#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    /// Zero-sized image, mismatched dimensions, or an empty dispatch grid.
    #[error("invalid dimensions {width}x{height}: {reason}")]
    InvalidDimensions {
        /// Width that was rejected.
        width: u32,
        /// Height that was rejected.
        height: u32,
        /// What made the dimensions unusable.
        reason: String,
    },

    /// The kernel name, after blank-name fallback, is not in the device's kernel set.
    #[error("kernel not found: '{name}'")]
    KernelNotFound {
        /// Name that was looked up after fallback substitution.
        name: String,
    },

    /// A uniform or buffer name that the kernel does not declare.
    #[error("binding error: {0}")]
    Binding(String),

    /// Device creation, upload, dispatch or readback failure.
    #[error("device error: {0}")]
    Device(String),

    /// Host-side record buffer inconsistency.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid filter settings.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FilterError {
    /// Build a [`FilterError::InvalidDimensions`] value.
    pub fn invalid_dimensions(width: u32, height: u32, reason: impl Into<String>) -> Self {
        Self::InvalidDimensions {
            width,
            height,
            reason: reason.into(),
        }
    }

    /// Build a [`FilterError::KernelNotFound`] value.
    pub fn kernel_not_found(name: impl Into<String>) -> Self {
        Self::KernelNotFound { name: name.into() }
    }

    /// Build a [`FilterError::Binding`] value.
    pub fn binding(msg: impl Into<String>) -> Self {
        Self::Binding(msg.into())
    }

    /// Build a [`FilterError::Device`] value.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Build a [`FilterError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`FilterError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
