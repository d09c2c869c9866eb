//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Quick Reserve limits and suggestions
    #[serde(default)]
    pub reservations: RawReservationConfig,

    /// Resource inventory seeded into the store on startup
    #[serde(default)]
    pub resources: Vec<RawResource>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Requests per second allowed per client
    pub rate_limit_per_second: Option<u32>,
}

/// Reservation policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawReservationConfig {
    /// Upper bound for timed reservations, in seconds
    pub max_duration_seconds: Option<u64>,

    /// Whether reservations without an end time are accepted (default true)
    pub allow_eternal: Option<bool>,

    /// Labels always offered as suggestions, even with no resource using them
    #[serde(default)]
    pub extra_device_types: Vec<String>,
}

/// Raw resource definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawResource {
    /// Display name, unique across the inventory
    pub name: String,

    /// Device type label; omitted means "Other"
    pub device_type: Option<String>,

    /// Opaque free-form text
    pub custom_fields: Option<String>,
}
