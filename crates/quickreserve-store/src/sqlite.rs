//! SQLite-based store implementation

use chrono::{DateTime, Local};
use quickreserve_api::{Reservation, Resource};
use quickreserve_util::ResourceId;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{AuditEvent, NewResource, ReservationStore, StoreError, StoreResult};

const RESOURCE_COLUMNS: &str =
    "id, name, device_type, custom_fields, holder_name, reserved_at, reserved_until";

/// SQLite-based store
///
/// All access goes through one connection behind a mutex, so every
/// read-compare-write runs as a single serialized transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Resources with their (at most one) reservation
            CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                device_type TEXT DEFAULT 'Other'
                    CHECK (device_type IS NULL OR length(device_type) <= 50),
                custom_fields TEXT,
                holder_name TEXT,
                reserved_at TEXT,
                reserved_until TEXT,
                CHECK (holder_name IS NOT NULL OR (reserved_at IS NULL AND reserved_until IS NULL))
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_resources_device_type ON resources(device_type);
            CREATE INDEX IF NOT EXISTS idx_resources_name ON resources(name);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// Reservation columns exactly as stored
struct ReservationRow {
    holder_name: Option<String>,
    reserved_at: Option<String>,
    reserved_until: Option<String>,
}

impl ReservationRow {
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            holder_name: row.get(offset)?,
            reserved_at: row.get(offset + 1)?,
            reserved_until: row.get(offset + 2)?,
        })
    }

    fn into_reservation(self) -> StoreResult<Option<Reservation>> {
        let Some(holder_name) = self.holder_name else {
            return Ok(None);
        };
        let reserved_at = self.reserved_at.ok_or_else(|| {
            StoreError::Serialization("reservation without reserved_at".into())
        })?;

        Ok(Some(Reservation {
            holder_name,
            reserved_at: parse_timestamp(&reserved_at)?,
            reserved_until: self
                .reserved_until
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        }))
    }
}

struct ResourceRow {
    id: i64,
    name: String,
    device_type: Option<String>,
    custom_fields: Option<String>,
    reservation: ReservationRow,
}

impl ResourceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            device_type: row.get(2)?,
            custom_fields: row.get(3)?,
            reservation: ReservationRow::from_row(row, 4)?,
        })
    }

    fn into_resource(self) -> StoreResult<Resource> {
        Ok(Resource {
            id: ResourceId::new(self.id),
            name: self.name,
            device_type: self.device_type,
            custom_fields: self.custom_fields,
            reservation: self.reservation.into_reservation()?,
        })
    }
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| StoreError::Serialization(format!("invalid timestamp '{}': {}", s, e)))
}

/// Outer `None`: no such resource. Inner `None`: not reserved.
fn read_reservation(
    conn: &Connection,
    id: ResourceId,
) -> StoreResult<Option<Option<Reservation>>> {
    let row = conn
        .query_row(
            "SELECT holder_name, reserved_at, reserved_until FROM resources WHERE id = ?",
            [id.get()],
            |row| ReservationRow::from_row(row, 0),
        )
        .optional()?;

    row.map(ReservationRow::into_reservation).transpose()
}

fn write_reservation(
    conn: &Connection,
    id: ResourceId,
    reservation: Option<&Reservation>,
) -> StoreResult<()> {
    let (holder, at, until) = match reservation {
        Some(r) => (
            Some(r.holder_name.as_str()),
            Some(r.reserved_at.to_rfc3339()),
            r.reserved_until.map(|u| u.to_rfc3339()),
        ),
        None => (None, None, None),
    };

    conn.execute(
        "UPDATE resources SET holder_name = ?, reserved_at = ?, reserved_until = ? WHERE id = ?",
        params![holder, at, until, id.get()],
    )?;
    Ok(())
}

impl ReservationStore for SqliteStore {
    fn list_resources(&self) -> StoreResult<Vec<Resource>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM resources ORDER BY id ASC",
            RESOURCE_COLUMNS
        ))?;

        let rows = stmt.query_map([], ResourceRow::from_row)?;

        let mut resources = Vec::new();
        for row in rows {
            resources.push(row?.into_resource()?);
        }
        Ok(resources)
    }

    fn get_resource(&self, id: ResourceId) -> StoreResult<Option<Resource>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM resources WHERE id = ?", RESOURCE_COLUMNS),
                [id.get()],
                ResourceRow::from_row,
            )
            .optional()?;

        row.map(ResourceRow::into_resource).transpose()
    }

    fn find_resource_by_name(&self, name: &str) -> StoreResult<Option<Resource>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM resources WHERE name = ? ORDER BY id ASC LIMIT 1",
                    RESOURCE_COLUMNS
                ),
                [name],
                ResourceRow::from_row,
            )
            .optional()?;

        row.map(ResourceRow::into_resource).transpose()
    }

    fn insert_resource(&self, resource: &NewResource) -> StoreResult<ResourceId> {
        let conn = self.conn()?;

        match &resource.device_type {
            Some(device_type) => conn.execute(
                "INSERT INTO resources (name, device_type, custom_fields) VALUES (?, ?, ?)",
                params![resource.name, device_type, resource.custom_fields],
            )?,
            None => conn.execute(
                "INSERT INTO resources (name, custom_fields) VALUES (?, ?)",
                params![resource.name, resource.custom_fields],
            )?,
        };

        let id = ResourceId::new(conn.last_insert_rowid());
        debug!(resource_id = %id, name = %resource.name, "Resource inserted");
        Ok(id)
    }

    fn set_device_type(&self, id: ResourceId, device_type: Option<&str>) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE resources SET device_type = ? WHERE id = ?",
            params![device_type, id.get()],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }

        debug!(resource_id = %id, device_type = ?device_type, "Device type updated");
        Ok(())
    }

    fn get_reservation(&self, id: ResourceId) -> StoreResult<Option<Reservation>> {
        let conn = self.conn()?;
        read_reservation(&conn, id)?.ok_or(StoreError::NotFound(id))
    }

    fn compare_and_swap_reservation(
        &self,
        id: ResourceId,
        expected: Option<&Reservation>,
        new: Option<&Reservation>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current = read_reservation(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        if current.as_ref() != expected {
            debug!(resource_id = %id, "Reservation changed since read, swap refused");
            return Ok(false);
        }

        write_reservation(&tx, id, new)?;
        tx.commit()?;

        debug!(resource_id = %id, reserved = new.is_some(), "Reservation swapped");
        Ok(true)
    }

    fn clear_reservation(&self, id: ResourceId) -> StoreResult<Option<Reservation>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let previous = read_reservation(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        if previous.is_some() {
            write_reservation(&tx, id, None)?;
            tx.commit()?;
            debug!(resource_id = %id, "Reservation cleared");
        }

        Ok(previous)
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, event_json) = row?;
            events.push(AuditEvent {
                id,
                timestamp: parse_timestamp(&timestamp)?,
                event: serde_json::from_str(&event_json)?,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 11, 14, hour, 0, 0).unwrap()
    }

    fn reservation(holder: &str, until: Option<DateTime<Local>>) -> Reservation {
        Reservation {
            holder_name: holder.into(),
            reserved_at: at(9),
            reserved_until: until,
        }
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
        assert!(store.list_resources().unwrap().is_empty());
    }

    #[test]
    fn test_missing_device_type_defaults_to_other() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.insert_resource(&NewResource::new("No Type")).unwrap();

        let resource = store.get_resource(id).unwrap().unwrap();
        assert_eq!(resource.device_type.as_deref(), Some("Other"));
        assert!(resource.reservation.is_none());
    }

    #[test]
    fn test_device_type_round_trips_verbatim() {
        let store = SqliteStore::in_memory().unwrap();
        let special = store
            .insert_resource(&NewResource::new("Edge").with_device_type("Router/Switch (L3) #1"))
            .unwrap();
        let blank = store
            .insert_resource(&NewResource::new("Blank").with_device_type(""))
            .unwrap();

        let special = store.get_resource(special).unwrap().unwrap();
        assert_eq!(special.device_type.as_deref(), Some("Router/Switch (L3) #1"));
        let blank = store.get_resource(blank).unwrap().unwrap();
        assert_eq!(blank.device_type.as_deref(), Some(""));
    }

    #[test]
    fn test_device_type_length_enforced_by_schema() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store
            .insert_resource(&NewResource::new("Long").with_device_type("A".repeat(51)));
        assert!(matches!(result, Err(StoreError::Database(_))));

        let ok = store.insert_resource(&NewResource::new("Max").with_device_type("A".repeat(50)));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_set_device_type_preserves_other_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store
            .insert_resource(
                &NewResource::new("Server 1")
                    .with_device_type("Server")
                    .with_custom_fields("rack=4"),
            )
            .unwrap();
        let r = reservation("Test User", None);
        assert!(store.compare_and_swap_reservation(id, None, Some(&r)).unwrap());

        store.set_device_type(id, Some("Router")).unwrap();

        let resource = store.get_resource(id).unwrap().unwrap();
        assert_eq!(resource.device_type.as_deref(), Some("Router"));
        assert_eq!(resource.name, "Server 1");
        assert_eq!(resource.custom_fields.as_deref(), Some("rack=4"));
        assert_eq!(resource.reservation, Some(r));

        store.set_device_type(id, None).unwrap();
        assert!(store.get_resource(id).unwrap().unwrap().device_type.is_none());
    }

    #[test]
    fn test_set_device_type_unknown_resource() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store.set_device_type(ResourceId::new(99), Some("Server"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_list_is_in_insertion_order() {
        let store = SqliteStore::in_memory().unwrap();
        let a = store.insert_resource(&NewResource::new("b-second")).unwrap();
        let b = store.insert_resource(&NewResource::new("a-first")).unwrap();

        let ids: Vec<_> = store.list_resources().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(store.find_resource_by_name("a-first").unwrap().unwrap().id, b);
        assert!(store.find_resource_by_name("missing").unwrap().is_none());
    }

    #[test]
    fn test_compare_and_swap() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.insert_resource(&NewResource::new("Server 1")).unwrap();

        let first = reservation("alice", Some(at(10)));
        let second = reservation("bob", None);

        // Expected state matches: swap applies
        assert!(store.compare_and_swap_reservation(id, None, Some(&first)).unwrap());
        assert_eq!(store.get_reservation(id).unwrap(), Some(first.clone()));

        // Stale expectation: refused, row untouched
        assert!(!store.compare_and_swap_reservation(id, None, Some(&second)).unwrap());
        assert_eq!(store.get_reservation(id).unwrap(), Some(first.clone()));

        // Fresh expectation: applies
        assert!(store
            .compare_and_swap_reservation(id, Some(&first), Some(&second))
            .unwrap());
        assert_eq!(store.get_reservation(id).unwrap(), Some(second));
    }

    #[test]
    fn test_compare_and_swap_unknown_resource() {
        let store = SqliteStore::in_memory().unwrap();
        let r = reservation("alice", None);
        let result = store.compare_and_swap_reservation(ResourceId::new(5), None, Some(&r));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_concurrent_swaps_only_one_wins() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let id = store.insert_resource(&NewResource::new("Server 1")).unwrap();

        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = store.clone();
                    s.spawn(move || {
                        let r = reservation(&format!("user-{}", i), None);
                        store.compare_and_swap_reservation(id, None, Some(&r)).unwrap()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });

        assert_eq!(wins, 1);
    }

    #[test]
    fn test_clear_reservation() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.insert_resource(&NewResource::new("Server 1")).unwrap();
        let r = reservation("alice", Some(at(10)));
        store.compare_and_swap_reservation(id, None, Some(&r)).unwrap();

        assert_eq!(store.clear_reservation(id).unwrap(), Some(r));
        assert_eq!(store.clear_reservation(id).unwrap(), None);
        assert!(store.get_reservation(id).unwrap().is_none());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quickreserved.db");

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            let id = store
                .insert_resource(&NewResource::new("Router 1").with_device_type("Router"))
                .unwrap();
            let r = reservation("alice", None);
            store.compare_and_swap_reservation(id, None, Some(&r)).unwrap();
            id
        };

        let store = SqliteStore::open(&path).unwrap();
        let resource = store.get_resource(id).unwrap().unwrap();
        assert_eq!(resource.reservation.unwrap().holder_name, "alice");
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::NoAvailableResource {
                device_type: "Server".into(),
                holder_name: "Test User".into(),
            }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::NoAvailableResource { .. }
        ));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));
    }
}
