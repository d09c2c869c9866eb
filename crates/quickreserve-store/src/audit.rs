//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use quickreserve_util::ResourceId;

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Resource inserted from the configured inventory
    ResourceSeeded {
        resource_id: ResourceId,
        name: String,
    },

    /// Reservation claimed
    ReservationClaimed {
        resource_id: ResourceId,
        holder_name: String,
        reserved_until: Option<DateTime<Local>>,
    },

    /// Reservation cleared explicitly
    ReservationReleased {
        resource_id: ResourceId,
        previous_holder: Option<String>,
    },

    /// Quick Reserve found nothing free
    NoAvailableResource {
        device_type: String,
        holder_name: String,
    },

    /// Resource retagged
    DeviceTypeChanged {
        resource_id: ResourceId,
        device_type: Option<String>,
    },

    /// Client connected
    ClientConnected {
        client_id: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: quickreserve_util::now(),
            event,
        }
    }
}
