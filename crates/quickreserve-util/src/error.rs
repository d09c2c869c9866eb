//! Error types for reservation operations

use thiserror::Error;

use crate::ResourceId;

/// Errors observable by callers of the reservation engine.
///
/// Lost compare-and-swap races are absorbed inside the engine and never
/// appear here.
#[derive(Debug, Error)]
pub enum ReserveError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No available resource of type '{device_type}'")]
    NoAvailableResource { device_type: String },

    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ReserveError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn no_available(device_type: impl Into<String>) -> Self {
        Self::NoAvailableResource {
            device_type: device_type.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Whether a later, fresh attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoAvailableResource { .. } | Self::StoreUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReserveError>;
