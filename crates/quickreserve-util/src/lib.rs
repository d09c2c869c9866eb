//! Shared utilities for quickreserved
//!
//! This crate provides:
//! - ID types (ResourceId, ClientId)
//! - The reservation error taxonomy
//! - Clock access with debug-build mock time, duration parsing/formatting
//! - Rate limiting helpers
//! - Default paths for socket, data, and config files

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
