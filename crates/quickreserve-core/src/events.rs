//! Core events emitted by the engine

use chrono::{DateTime, Local};
use quickreserve_util::ResourceId;

/// Events emitted by the core engine
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A resource was claimed
    ResourceReserved {
        resource_id: ResourceId,
        resource_name: String,
        holder_name: String,
        reserved_until: Option<DateTime<Local>>,
    },

    /// A reservation was cleared
    ResourceReleased {
        resource_id: ResourceId,
        previous_holder: Option<String>,
    },

    /// A resource was retagged
    DeviceTypeChanged {
        resource_id: ResourceId,
        device_type: Option<String>,
    },
}
