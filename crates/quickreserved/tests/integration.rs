//! Integration tests for quickreserved
//!
//! These tests drive configuration, the SQLite store and the reservation
//! engine together, the way the service wires them.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use quickreserve_api::{Command, ErrorCode, ErrorInfo, ReserveRequest, Response, ResponsePayload};
use quickreserve_config::parse_config;
use quickreserve_core::{CoreEvent, ReservationEngine};
use quickreserve_ipc::{IpcClient, IpcError, IpcServer, ServerMessage};
use quickreserve_store::{AuditEventType, ReservationStore, SqliteStore};
use quickreserve_util::ReserveError;
use std::sync::Arc;

const CONFIG: &str = r#"
config_version = 1

[reservations]
max_duration_seconds = 86400
extra_device_types = ["Switch"]

[[resources]]
name = "Server 1"
device_type = "Server"
custom_fields = "rack=4"

[[resources]]
name = "Router 1"
device_type = "Router"

[[resources]]
name = "Server 2"
device_type = "Server"

[[resources]]
name = "Bench Box"
"#;

fn nine_am() -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 11, 14, 9, 0, 0).unwrap()
}

fn request(holder: &str, duration_seconds: Option<i64>) -> ReserveRequest {
    ReserveRequest {
        device_type: "Server".into(),
        holder_name: holder.into(),
        duration_seconds,
        reserved_until: None,
    }
}

fn setup(store: Arc<dyn ReservationStore>) -> ReservationEngine {
    let config = parse_config(CONFIG).unwrap();
    let engine = ReservationEngine::new(store, config.reservations.clone());
    engine.seed_resources(&config.resources).unwrap();
    engine
}

#[test]
fn test_quick_reserve_lifecycle() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = setup(store.clone());

    assert_eq!(
        engine.list_device_types().unwrap(),
        vec!["Other", "Router", "Server", "Switch"]
    );

    let first = engine
        .reserve_available(&request("alice", Some(3600)), nine_am())
        .unwrap();
    assert_eq!(first.resource.name, "Server 1");
    assert_eq!(first.resource.custom_fields.as_deref(), Some("rack=4"));

    let second = engine
        .reserve_available(&request("bob", Some(7200)), nine_am())
        .unwrap();
    assert_eq!(second.resource.name, "Server 2");

    let third = engine.reserve_available(&request("carol", Some(3600)), nine_am());
    assert!(matches!(third, Err(ReserveError::NoAvailableResource { .. })));

    // alice's hour is up
    let later = nine_am() + ChronoDuration::hours(1);
    let reclaimed = engine
        .reserve_available(&request("carol", Some(600)), later)
        .unwrap();
    assert_eq!(reclaimed.resource.id, first.resource.id);

    // bob releases early
    let released = engine.release(second.resource.id, later).unwrap();
    assert_eq!(
        released.event(),
        Some(CoreEvent::ResourceReleased {
            resource_id: second.resource.id,
            previous_holder: Some("bob".into()),
        })
    );

    let views = engine.list_resources(later).unwrap();
    let reserved: Vec<_> = views.iter().filter(|v| v.reserved).map(|v| v.name.as_str()).collect();
    assert_eq!(reserved, vec!["Server 1"]);
}

#[test]
fn test_retag_moves_resource_between_groups() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = setup(store.clone());

    let bench = store.find_resource_by_name("Bench Box").unwrap().unwrap();
    assert_eq!(bench.device_type.as_deref(), Some("Other"));

    engine.set_device_type(bench.id, Some("Server")).unwrap();

    let groups = engine.group_resources().unwrap();
    let server = groups.iter().find(|g| g.device_type == "Server").unwrap();
    assert_eq!(server.resource_ids.len(), 3);
    assert!(groups.iter().all(|g| g.device_type != "Other"));

    // A clear puts it under "Other" again
    engine.set_device_type(bench.id, None).unwrap();
    let groups = engine.group_resources().unwrap();
    assert!(groups.iter().any(|g| g.device_type == "Other"));
}

#[test]
fn test_reservations_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("quickreserved.db");

    let claimed = {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let engine = setup(store);
        engine
            .reserve_available(&request("alice", None), nine_am())
            .unwrap()
    };

    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let engine = setup(store.clone());

    // Seeding again must not duplicate the inventory
    assert_eq!(store.list_resources().unwrap().len(), 4);

    let stored = store.get_reservation(claimed.resource.id).unwrap().unwrap();
    assert_eq!(stored.holder_name, "alice");
    assert!(stored.is_eternal());

    let next = engine
        .reserve_available(&request("bob", Some(60)), nine_am() + ChronoDuration::days(30))
        .unwrap();
    assert_ne!(next.resource.id, claimed.resource.id);
}

#[test]
fn test_concurrent_quick_reserve_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("quickreserved.db")).unwrap());
    let engine = setup(store.clone());

    // Two servers, six callers: exactly two win, on distinct servers
    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let engine = &engine;
                s.spawn(move || {
                    engine.reserve_available(&request(&format!("user-{}", i), Some(600)), nine_am())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut won: Vec<_> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|claim| claim.resource.id)
        .collect();
    won.sort();
    won.dedup();
    assert_eq!(won.len(), 2);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(ReserveError::NoAvailableResource { .. })))
            .count(),
        4
    );

    let audits = store.get_recent_audits(100).unwrap();
    let claims = audits
        .iter()
        .filter(|a| matches!(a.event, AuditEventType::ReservationClaimed { .. }))
        .count();
    assert_eq!(claims, 2);
}

#[tokio::test]
async fn test_no_available_resource_over_ipc() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("quickreserved.sock");

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = Arc::new(setup(store));

    let mut server = IpcServer::new(&socket_path);
    server.start().await.unwrap();
    let server = Arc::new(server);
    let mut messages = server.take_message_receiver().await.unwrap();

    let accept = server.clone();
    tokio::spawn(async move {
        let _ = accept.run().await;
    });

    // Minimal dispatcher for Reserve only
    let dispatcher = server.clone();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            let ServerMessage::Request { client_id, request } = msg else {
                continue;
            };
            let response = match request.command {
                Command::Reserve(req) => match engine.reserve_available(&req, nine_am()) {
                    Ok(claim) => Response::success(
                        request.request_id,
                        ResponsePayload::Reserved(claim.to_response()),
                    ),
                    Err(e) => Response::error(request.request_id, ErrorInfo::from(&e)),
                },
                _ => continue,
            };
            let _ = dispatcher.send_response(&client_id, response).await;
        }
    });

    let mut client = IpcClient::connect(&socket_path).await.unwrap();

    let reserve = |holder: &str, duration_seconds: i64| {
        Command::Reserve(ReserveRequest {
            device_type: "Router".into(),
            holder_name: holder.into(),
            duration_seconds: Some(duration_seconds),
            reserved_until: None,
        })
    };

    // A bad request is not reported as "nothing free"
    match client.call(reserve("alice", 0)).await {
        Err(IpcError::Rejected { code, .. }) => assert_eq!(code, ErrorCode::InvalidRequest),
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }

    match client.call(reserve("alice", 60)).await.unwrap() {
        ResponsePayload::Reserved(r) => assert_eq!(r.resource_name, "Router 1"),
        other => panic!("unexpected payload: {:?}", other),
    }

    match client.call(reserve("bob", 60)).await {
        Err(IpcError::Rejected { code, .. }) => assert_eq!(code, ErrorCode::NoAvailableResource),
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }
}
