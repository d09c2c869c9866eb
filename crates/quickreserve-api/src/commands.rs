//! Command types for the quickreserved protocol

use serde::{Deserialize, Serialize};
use quickreserve_util::{ClientId, ReserveError, ResourceId};

use crate::{
    DeviceTypeGroup, HealthStatus, ReserveRequest, ReserveResponse, ResourceView, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&ReserveError> for ErrorInfo {
    fn from(e: &ReserveError) -> Self {
        let code = match e {
            ReserveError::ValidationError(_) => ErrorCode::InvalidRequest,
            ReserveError::NoAvailableResource { .. } => ErrorCode::NoAvailableResource,
            ReserveError::ResourceNotFound(_) => ErrorCode::ResourceNotFound,
            ReserveError::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
        };
        Self::new(code, e.to_string())
    }
}

/// Error codes for the protocol.
///
/// `NoAvailableResource` is deliberately separate from `InvalidRequest` so
/// clients can tell "try later" apart from "fix your request".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NoAvailableResource,
    ResourceNotFound,
    StoreUnavailable,
    RateLimited,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Claim the first free resource of a device type
    Reserve(ReserveRequest),

    /// Clear the reservation on a resource (idempotent)
    Release { resource_id: ResourceId },

    /// Known device type labels, sorted, plus configured extras
    ListDeviceTypes,

    /// All resources with evaluated reservation state
    ListResources,

    /// Resources bucketed by device type
    GroupByDeviceType,

    /// Retag a resource. `None` clears the label.
    SetDeviceType {
        resource_id: ResourceId,
        device_type: Option<String>,
    },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Reserved(ReserveResponse),
    Released {
        resource_id: ResourceId,
        /// Whether an active reservation was actually cleared
        was_reserved: bool,
    },
    DeviceTypes {
        device_types: Vec<String>,
    },
    Resources {
        resources: Vec<ResourceView>,
    },
    Groups {
        groups: Vec<DeviceTypeGroup>,
    },
    DeviceTypeSet {
        resource_id: ResourceId,
        device_type: Option<String>,
    },
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Health(HealthStatus),
    Pong,
}
