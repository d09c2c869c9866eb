//! Event types for quickreserved -> client streaming

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use quickreserve_util::ResourceId;

use crate::API_VERSION;

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: quickreserve_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A resource was claimed
    ResourceReserved {
        resource_id: ResourceId,
        resource_name: String,
        holder_name: String,
        /// None means eternal
        reserved_until: Option<DateTime<Local>>,
    },

    /// A reservation was cleared explicitly
    ResourceReleased {
        resource_id: ResourceId,
        previous_holder: Option<String>,
    },

    /// A resource was retagged
    DeviceTypeChanged {
        resource_id: ResourceId,
        device_type: Option<String>,
    },

    /// Service is shutting down
    Shutdown,
}
