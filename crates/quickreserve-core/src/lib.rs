//! Reservation logic for quickreserved
//!
//! This crate holds the parts of the service that decide who gets what:
//! - Device type catalog (derived labels, "Other" folding, grouping)
//! - Expiry evaluation (lazy, no background sweep)
//! - Allocation engine (first free resource of a type, claimed with
//!   per-resource compare-and-swap and bounded fallback)

mod catalog;
mod engine;
mod events;
mod expiry;

pub use catalog::*;
pub use engine::*;
pub use events::*;
pub use expiry::*;
