//! Store trait definitions

use quickreserve_api::{Reservation, Resource};
use quickreserve_util::ResourceId;

use crate::{AuditEvent, StoreResult};

/// Main store trait.
///
/// Reservation state is only ever changed through
/// [`compare_and_swap_reservation`](ReservationStore::compare_and_swap_reservation)
/// or [`clear_reservation`](ReservationStore::clear_reservation); each call is
/// atomic for its resource.
pub trait ReservationStore: Send + Sync {
    // Resources

    /// All resources in insertion order (ascending id)
    fn list_resources(&self) -> StoreResult<Vec<Resource>>;

    /// Get a resource by id
    fn get_resource(&self, id: ResourceId) -> StoreResult<Option<Resource>>;

    /// Find a resource by its display name
    fn find_resource_by_name(&self, name: &str) -> StoreResult<Option<Resource>>;

    /// Insert a resource and return its id
    fn insert_resource(&self, resource: &NewResource) -> StoreResult<ResourceId>;

    /// Replace the device type label, leaving every other field untouched
    fn set_device_type(&self, id: ResourceId, device_type: Option<&str>) -> StoreResult<()>;

    // Reservations

    /// Current stored reservation, active or not
    fn get_reservation(&self, id: ResourceId) -> StoreResult<Option<Reservation>>;

    /// Replace the stored reservation with `new` only if it still equals
    /// `expected`. Returns `false`, leaving the row untouched, otherwise.
    fn compare_and_swap_reservation(
        &self,
        id: ResourceId,
        expected: Option<&Reservation>,
        new: Option<&Reservation>,
    ) -> StoreResult<bool>;

    /// Clear the reservation unconditionally, returning what was stored
    fn clear_reservation(&self, id: ResourceId) -> StoreResult<Option<Reservation>>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Resource fields supplied on insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub name: String,
    /// `None` leaves the column default ("Other") in place
    pub device_type: Option<String>,
    pub custom_fields: Option<String>,
}

impl NewResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: None,
            custom_fields: None,
        }
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_custom_fields(mut self, custom_fields: impl Into<String>) -> Self {
        self.custom_fields = Some(custom_fields.into());
        self
    }
}
