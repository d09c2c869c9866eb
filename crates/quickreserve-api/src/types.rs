//! Shared types for the quickreserved API

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use quickreserve_util::ResourceId;

/// A reservable resource as stored by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    /// Free-form label. `None` and `""` are both filed under "Other".
    pub device_type: Option<String>,
    /// Opaque free-form text, never interpreted by the allocation logic
    pub custom_fields: Option<String>,
    pub reservation: Option<Reservation>,
}

/// A claim on one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub holder_name: String,
    pub reserved_at: DateTime<Local>,
    /// `None` means the reservation never expires
    pub reserved_until: Option<DateTime<Local>>,
}

impl Reservation {
    pub fn is_eternal(&self) -> bool {
        self.reserved_until.is_none()
    }
}

/// Quick Reserve request as sent by clients.
///
/// `duration_seconds` and `reserved_until` are mutually exclusive; when both
/// are absent the reservation is eternal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub device_type: String,
    pub holder_name: String,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub reserved_until: Option<DateTime<Local>>,
}

/// Successful Quick Reserve result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub resource_id: ResourceId,
    pub resource_name: String,
    pub holder_name: String,
    pub reserved_at: DateTime<Local>,
    pub reserved_until: Option<DateTime<Local>>,
}

/// Resource listing entry with reservation state evaluated at listing time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceView {
    pub id: ResourceId,
    pub name: String,
    pub device_type: Option<String>,
    pub custom_fields: Option<String>,
    pub reservation: Option<Reservation>,
    /// Whether `reservation` is currently in force
    pub reserved: bool,
}

/// One bucket of the device type grouping, in first-seen order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTypeGroup {
    pub device_type: String,
    pub resource_ids: Vec<ResourceId>,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub resource_count: usize,
}
