//! Validated configuration structures

use crate::schema::{RawConfig, RawReservationConfig, RawResource, RawServiceConfig};
use quickreserve_util::{data_dir_without_env, socket_path_without_env};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-client request budget
pub const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 30;

/// Validated configuration ready for use by the service
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub service: ServiceConfig,
    pub reservations: ReservationPolicy,
    /// Inventory to seed, in declaration order
    pub resources: Vec<ResourceSeed>,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            reservations: ReservationPolicy::from_raw(raw.reservations),
            resources: raw.resources.into_iter().map(ResourceSeed::from_raw).collect(),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub rate_limit_per_second: u32,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            rate_limit_per_second: raw
                .rate_limit_per_second
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_SECOND),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Limits applied to Quick Reserve requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// Longest accepted timed reservation. None means no cap.
    pub max_duration: Option<Duration>,
    /// Whether reservations without an end time are accepted
    pub allow_eternal: bool,
    /// Suggestions appended to the derived device type catalog
    pub extra_device_types: Vec<String>,
}

impl ReservationPolicy {
    fn from_raw(raw: RawReservationConfig) -> Self {
        Self {
            max_duration: raw.max_duration_seconds.map(Duration::from_secs),
            allow_eternal: raw.allow_eternal.unwrap_or(true),
            extra_device_types: raw.extra_device_types,
        }
    }
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            max_duration: None,
            allow_eternal: true,
            extra_device_types: Vec::new(),
        }
    }
}

/// A resource declared in the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSeed {
    pub name: String,
    pub device_type: Option<String>,
    pub custom_fields: Option<String>,
}

impl ResourceSeed {
    fn from_raw(raw: RawResource) -> Self {
        Self {
            name: raw.name,
            device_type: raw.device_type,
            custom_fields: raw.custom_fields,
        }
    }
}
