//! Protocol types for quickreserved IPC
//!
//! This crate defines the stable API between quickreserved and clients:
//! - Resource and reservation records
//! - Commands (requests from clients) and responses
//! - Events (service -> clients)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;

/// Label that resources without a device type are filed under
pub const OTHER_DEVICE_TYPE: &str = "Other";

/// Maximum length of a stored device type label (`resource.device_type`)
pub const DEVICE_TYPE_MAX_LEN: usize = 50;
