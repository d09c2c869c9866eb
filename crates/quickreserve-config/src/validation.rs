//! Configuration validation

use crate::schema::{RawConfig, RawResource};
use quickreserve_api::DEVICE_TYPE_MAX_LEN;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Resource '{name}': {message}")]
    ResourceError { name: String, message: String },

    #[error("Duplicate resource name: {0}")]
    DuplicateResourceName(String),

    #[error("Reservations: {0}")]
    ReservationError(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_names = HashSet::new();
    for resource in &config.resources {
        if !seen_names.insert(resource.name.as_str()) {
            errors.push(ValidationError::DuplicateResourceName(resource.name.clone()));
        }
    }

    for resource in &config.resources {
        errors.extend(validate_resource(resource));
    }

    let reservations = &config.reservations;
    if reservations.max_duration_seconds == Some(0) {
        errors.push(ValidationError::ReservationError(
            "max_duration_seconds must be positive".into(),
        ));
    }
    if let Some(max) = reservations.max_duration_seconds
        && i64::try_from(max).is_err()
    {
        errors.push(ValidationError::ReservationError(format!(
            "max_duration_seconds {} is out of range",
            max
        )));
    }
    for label in &reservations.extra_device_types {
        if let Err(message) = check_device_type(label) {
            errors.push(ValidationError::ReservationError(format!(
                "extra device type '{}': {}",
                label, message
            )));
        }
    }

    if config.service.rate_limit_per_second == Some(0) {
        errors.push(ValidationError::GlobalError(
            "rate_limit_per_second must be positive".into(),
        ));
    }

    errors
}

fn validate_resource(resource: &RawResource) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if resource.name.trim().is_empty() {
        errors.push(ValidationError::ResourceError {
            name: resource.name.clone(),
            message: "name cannot be empty".into(),
        });
    }

    // An explicit empty label is allowed in storage, only the length is bounded
    if let Some(device_type) = &resource.device_type
        && device_type.chars().count() > DEVICE_TYPE_MAX_LEN
    {
        errors.push(ValidationError::ResourceError {
            name: resource.name.clone(),
            message: format!(
                "device_type is longer than {} characters",
                DEVICE_TYPE_MAX_LEN
            ),
        });
    }

    errors
}

/// Check a device type label offered as a suggestion
pub fn check_device_type(label: &str) -> Result<(), String> {
    if label.trim().is_empty() {
        return Err("label cannot be blank".into());
    }
    if label.chars().count() > DEVICE_TYPE_MAX_LEN {
        return Err(format!("label is longer than {} characters", DEVICE_TYPE_MAX_LEN));
    }
    Ok(())
}
