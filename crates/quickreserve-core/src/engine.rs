//! Reservation allocation engine

use chrono::{DateTime, Local};
use quickreserve_api::{
    DeviceTypeGroup, HealthStatus, Reservation, ReserveRequest, ReserveResponse, Resource,
    ResourceView, DEVICE_TYPE_MAX_LEN,
};
use quickreserve_config::{ReservationPolicy, ResourceSeed};
use quickreserve_store::{AuditEvent, AuditEventType, NewResource, ReservationStore, StoreError};
use quickreserve_util::{ReserveError, ResourceId, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{add_type, group_by_device_type, is_active, list_types, matches_device_type, CoreEvent};

/// How long a new reservation lasts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationTerm {
    /// No end time
    Eternal,
    /// Ends this long after the claim
    For(Duration),
    /// Ends at a fixed instant
    Until(DateTime<Local>),
}

impl ReservationTerm {
    /// Build a term from the optional wire fields of a Quick Reserve request
    pub fn from_request(request: &ReserveRequest) -> Result<Self> {
        match (request.duration_seconds, request.reserved_until) {
            (Some(_), Some(_)) => Err(ReserveError::validation(
                "duration_seconds and reserved_until are mutually exclusive",
            )),
            (Some(secs), None) if secs <= 0 => Err(ReserveError::validation(format!(
                "duration must be positive, got {} seconds",
                secs
            ))),
            (Some(secs), None) => Ok(Self::For(Duration::from_secs(secs as u64))),
            (None, Some(until)) => Ok(Self::Until(until)),
            (None, None) => Ok(Self::Eternal),
        }
    }
}

/// A successful claim
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    /// The claimed resource, carrying its new reservation
    pub resource: Resource,
    pub reservation: Reservation,
}

impl Claim {
    pub fn to_response(&self) -> ReserveResponse {
        ReserveResponse {
            resource_id: self.resource.id,
            resource_name: self.resource.name.clone(),
            holder_name: self.reservation.holder_name.clone(),
            reserved_at: self.reservation.reserved_at,
            reserved_until: self.reservation.reserved_until,
        }
    }

    pub fn event(&self) -> CoreEvent {
        CoreEvent::ResourceReserved {
            resource_id: self.resource.id,
            resource_name: self.resource.name.clone(),
            holder_name: self.reservation.holder_name.clone(),
            reserved_until: self.reservation.reserved_until,
        }
    }
}

/// Result of a release request
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    /// An active reservation was cleared
    Released {
        resource_id: ResourceId,
        previous: Reservation,
    },
    /// Nothing active was held; any stale record has been cleared
    NotReserved { resource_id: ResourceId },
}

impl ReleaseOutcome {
    pub fn resource_id(&self) -> ResourceId {
        match self {
            Self::Released { resource_id, .. } | Self::NotReserved { resource_id } => *resource_id,
        }
    }

    pub fn was_reserved(&self) -> bool {
        matches!(self, Self::Released { .. })
    }

    /// Event to broadcast, if anything observable changed
    pub fn event(&self) -> Option<CoreEvent> {
        match self {
            Self::Released {
                resource_id,
                previous,
            } => Some(CoreEvent::ResourceReleased {
                resource_id: *resource_id,
                previous_holder: Some(previous.holder_name.clone()),
            }),
            Self::NotReserved { .. } => None,
        }
    }
}

/// Outcome of a single claim attempt
enum ClaimAttempt {
    Won,
    /// Someone else holds the resource now. Never leaves the engine.
    Conflict,
}

/// The reservation allocation engine.
///
/// Holds no mutable state of its own; every decision is made against the
/// store, so one engine can be shared freely across threads and tasks.
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
    policy: ReservationPolicy,
}

impl ReservationEngine {
    /// Create a new engine
    pub fn new(store: Arc<dyn ReservationStore>, policy: ReservationPolicy) -> Self {
        info!(
            max_duration_secs = ?policy.max_duration.map(|d| d.as_secs()),
            allow_eternal = policy.allow_eternal,
            "Reservation engine initialized"
        );

        Self { store, policy }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Insert configured resources whose name is not yet known to the store.
    /// Returns how many were inserted.
    pub fn seed_resources(&self, seeds: &[ResourceSeed]) -> Result<usize> {
        let mut inserted = 0;

        for seed in seeds {
            if self
                .store
                .find_resource_by_name(&seed.name)
                .map_err(store_error)?
                .is_some()
            {
                debug!(name = %seed.name, "Resource already present, not seeding");
                continue;
            }

            let mut new = NewResource::new(&seed.name);
            new.device_type = seed.device_type.clone();
            new.custom_fields = seed.custom_fields.clone();

            let resource_id = self.store.insert_resource(&new).map_err(store_error)?;
            info!(resource_id = %resource_id, name = %seed.name, "Resource seeded");
            self.audit(AuditEventType::ResourceSeeded {
                resource_id,
                name: seed.name.clone(),
            });
            inserted += 1;
        }

        Ok(inserted)
    }

    /// Claim the first free resource of `device_type` among `candidates`.
    ///
    /// Candidates are scanned in the given order. A candidate whose claim is
    /// lost to a concurrent caller is skipped, and candidates that looked
    /// reserved in the snapshot get a second look against live state. Each
    /// candidate is claimed at most once per call.
    pub fn reserve(
        &self,
        device_type: &str,
        holder_name: &str,
        term: ReservationTerm,
        candidates: &[Resource],
        now: DateTime<Local>,
    ) -> Result<Claim> {
        let reservation = self.prepare(device_type, holder_name, term, now)?;
        self.claim_first(device_type, reservation, candidates, now)
    }

    /// [`reserve`](Self::reserve) against every stored resource, oldest first
    pub fn reserve_available(&self, request: &ReserveRequest, now: DateTime<Local>) -> Result<Claim> {
        let term = ReservationTerm::from_request(request)?;
        let reservation = self.prepare(&request.device_type, &request.holder_name, term, now)?;
        let candidates = self.store.list_resources().map_err(store_error)?;
        self.claim_first(&request.device_type, reservation, &candidates, now)
    }

    /// Clear the reservation on a resource, active or not
    pub fn release(&self, resource_id: ResourceId, now: DateTime<Local>) -> Result<ReleaseOutcome> {
        let previous = self
            .store
            .clear_reservation(resource_id)
            .map_err(store_error)?;

        let outcome = match previous {
            Some(previous) if is_active(Some(&previous), now) => {
                info!(
                    resource_id = %resource_id,
                    previous_holder = %previous.holder_name,
                    "Reservation released"
                );
                self.audit(AuditEventType::ReservationReleased {
                    resource_id,
                    previous_holder: Some(previous.holder_name.clone()),
                });
                ReleaseOutcome::Released {
                    resource_id,
                    previous,
                }
            }
            stale => {
                debug!(
                    resource_id = %resource_id,
                    had_expired_record = stale.is_some(),
                    "Release on a resource with no active reservation"
                );
                ReleaseOutcome::NotReserved { resource_id }
            }
        };

        Ok(outcome)
    }

    /// Known labels followed by configured extras not already present
    pub fn list_device_types(&self) -> Result<Vec<String>> {
        let resources = self.store.list_resources().map_err(store_error)?;

        Ok(self
            .policy
            .extra_device_types
            .iter()
            .fold(list_types(&resources), |types, extra| add_type(types, extra)))
    }

    /// Every resource with its reservation evaluated at `now`
    pub fn list_resources(&self, now: DateTime<Local>) -> Result<Vec<ResourceView>> {
        let resources = self.store.list_resources().map_err(store_error)?;

        Ok(resources
            .into_iter()
            .map(|r| {
                let reserved = is_active(r.reservation.as_ref(), now);
                ResourceView {
                    id: r.id,
                    name: r.name,
                    device_type: r.device_type,
                    custom_fields: r.custom_fields,
                    reservation: r.reservation,
                    reserved,
                }
            })
            .collect())
    }

    /// Stored resources bucketed by device type
    pub fn group_resources(&self) -> Result<Vec<DeviceTypeGroup>> {
        let resources = self.store.list_resources().map_err(store_error)?;
        Ok(group_by_device_type(&resources))
    }

    /// Retag a resource. `None` clears the label.
    pub fn set_device_type(
        &self,
        resource_id: ResourceId,
        device_type: Option<&str>,
    ) -> Result<CoreEvent> {
        if let Some(label) = device_type
            && label.chars().count() > DEVICE_TYPE_MAX_LEN
        {
            return Err(ReserveError::validation(format!(
                "device type must be at most {} characters",
                DEVICE_TYPE_MAX_LEN
            )));
        }

        self.store
            .set_device_type(resource_id, device_type)
            .map_err(store_error)?;

        info!(resource_id = %resource_id, device_type = ?device_type, "Device type changed");
        self.audit(AuditEventType::DeviceTypeChanged {
            resource_id,
            device_type: device_type.map(str::to_owned),
        });

        Ok(CoreEvent::DeviceTypeChanged {
            resource_id,
            device_type: device_type.map(str::to_owned),
        })
    }

    /// Get health status
    pub fn health(&self) -> HealthStatus {
        let store_ok = self.store.is_healthy();
        let resource_count = self
            .store
            .list_resources()
            .map(|resources| resources.len())
            .unwrap_or(0);

        HealthStatus {
            live: true,
            ready: store_ok,
            store_ok,
            resource_count,
        }
    }

    /// Validate the request fields and build the reservation to write
    fn prepare(
        &self,
        device_type: &str,
        holder_name: &str,
        term: ReservationTerm,
        now: DateTime<Local>,
    ) -> Result<Reservation> {
        if device_type.trim().is_empty() {
            return Err(ReserveError::validation("device type is required"));
        }
        if holder_name.trim().is_empty() {
            return Err(ReserveError::validation("holder name is required"));
        }

        let reserved_until = match term {
            ReservationTerm::Eternal => {
                if !self.policy.allow_eternal {
                    return Err(ReserveError::validation(
                        "reservations without an end time are not allowed",
                    ));
                }
                None
            }
            ReservationTerm::For(duration) => {
                if duration.is_zero() {
                    return Err(ReserveError::validation("duration must be positive"));
                }
                self.check_max_duration(duration)?;
                let until = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| ReserveError::validation("duration is out of range"))?;
                Some(until)
            }
            ReservationTerm::Until(until) => {
                if until <= now {
                    return Err(ReserveError::validation("end time must be in the future"));
                }
                let duration = (until - now)
                    .to_std()
                    .map_err(|_| ReserveError::validation("end time is out of range"))?;
                self.check_max_duration(duration)?;
                Some(until)
            }
        };

        Ok(Reservation {
            holder_name: holder_name.to_owned(),
            reserved_at: now,
            reserved_until,
        })
    }

    fn check_max_duration(&self, duration: Duration) -> Result<()> {
        match self.policy.max_duration {
            Some(max) if duration > max => Err(ReserveError::validation(format!(
                "reservations may last at most {}",
                quickreserve_util::format_duration(max)
            ))),
            _ => Ok(()),
        }
    }

    fn claim_first(
        &self,
        device_type: &str,
        reservation: Reservation,
        candidates: &[Resource],
        now: DateTime<Local>,
    ) -> Result<Claim> {
        let matching = candidates
            .iter()
            .filter(|r| matches_device_type(r, device_type));

        let mut skipped = Vec::new();
        let mut lost_race = false;

        for resource in matching {
            if is_active(resource.reservation.as_ref(), now) {
                skipped.push(resource);
                continue;
            }

            match self.try_claim(resource.id, &reservation, now)? {
                ClaimAttempt::Won => return Ok(self.claimed(resource, reservation)),
                ClaimAttempt::Conflict => lost_race = true,
            }
        }

        // Losing a race means the snapshot is stale, so reservations it
        // showed as active may have been released since.
        if lost_race {
            for resource in skipped {
                if let ClaimAttempt::Won = self.try_claim(resource.id, &reservation, now)? {
                    return Ok(self.claimed(resource, reservation));
                }
            }
        }

        info!(
            device_type = %device_type,
            holder_name = %reservation.holder_name,
            "No available resource"
        );
        self.audit(AuditEventType::NoAvailableResource {
            device_type: device_type.to_owned(),
            holder_name: reservation.holder_name.clone(),
        });

        Err(ReserveError::no_available(device_type))
    }

    /// Re-read live state and swap in `reservation` if the resource is free
    fn try_claim(
        &self,
        resource_id: ResourceId,
        reservation: &Reservation,
        now: DateTime<Local>,
    ) -> Result<ClaimAttempt> {
        let live = match self.store.get_reservation(resource_id) {
            Ok(live) => live,
            // Removed since the snapshot was taken
            Err(StoreError::NotFound(_)) => return Ok(ClaimAttempt::Conflict),
            Err(e) => return Err(store_error(e)),
        };

        if is_active(live.as_ref(), now) {
            debug!(resource_id = %resource_id, "Resource taken since snapshot");
            return Ok(ClaimAttempt::Conflict);
        }

        match self
            .store
            .compare_and_swap_reservation(resource_id, live.as_ref(), Some(reservation))
        {
            Ok(true) => Ok(ClaimAttempt::Won),
            Ok(false) | Err(StoreError::NotFound(_)) => {
                debug!(resource_id = %resource_id, "Lost claim race");
                Ok(ClaimAttempt::Conflict)
            }
            Err(e) => Err(store_error(e)),
        }
    }

    fn claimed(&self, resource: &Resource, reservation: Reservation) -> Claim {
        info!(
            resource_id = %resource.id,
            resource_name = %resource.name,
            holder_name = %reservation.holder_name,
            reserved_until = ?reservation.reserved_until,
            "Resource reserved"
        );
        self.audit(AuditEventType::ReservationClaimed {
            resource_id: resource.id,
            holder_name: reservation.holder_name.clone(),
            reserved_until: reservation.reserved_until,
        });

        let mut resource = resource.clone();
        resource.reservation = Some(reservation.clone());
        Claim {
            resource,
            reservation,
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

fn store_error(e: StoreError) -> ReserveError {
    match e {
        StoreError::NotFound(id) => ReserveError::ResourceNotFound(id),
        other => ReserveError::store(other.to_string()),
    }
}
