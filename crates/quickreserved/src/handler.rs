//! Command dispatch for IPC requests

use quickreserve_api::{Command, ErrorInfo, Event, EventPayload, Response, ResponsePayload};
use quickreserve_core::{CoreEvent, ReservationEngine};
use quickreserve_ipc::IpcServer;
use quickreserve_util::ClientId;
use tracing::debug;

/// Run one command against the engine. Blocks on the store.
pub fn handle_command(
    engine: &ReservationEngine,
    ipc: &IpcServer,
    client_id: &ClientId,
    request_id: u64,
    command: Command,
) -> Response {
    let now = quickreserve_util::now();

    let result = match command {
        Command::Reserve(req) => engine.reserve_available(&req, now).map(|claim| {
            broadcast_core_event(ipc, claim.event());
            ResponsePayload::Reserved(claim.to_response())
        }),

        Command::Release { resource_id } => engine.release(resource_id, now).map(|outcome| {
            if let Some(event) = outcome.event() {
                broadcast_core_event(ipc, event);
            }
            ResponsePayload::Released {
                resource_id,
                was_reserved: outcome.was_reserved(),
            }
        }),

        Command::ListDeviceTypes => engine
            .list_device_types()
            .map(|device_types| ResponsePayload::DeviceTypes { device_types }),

        Command::ListResources => engine
            .list_resources(now)
            .map(|resources| ResponsePayload::Resources { resources }),

        Command::GroupByDeviceType => engine
            .group_resources()
            .map(|groups| ResponsePayload::Groups { groups }),

        Command::SetDeviceType {
            resource_id,
            device_type,
        } => engine
            .set_device_type(resource_id, device_type.as_deref())
            .map(|event| {
                broadcast_core_event(ipc, event);
                ResponsePayload::DeviceTypeSet {
                    resource_id,
                    device_type,
                }
            }),

        Command::SubscribeEvents => Ok(ResponsePayload::Subscribed {
            client_id: client_id.clone(),
        }),

        Command::UnsubscribeEvents => Ok(ResponsePayload::Unsubscribed),

        Command::GetHealth => Ok(ResponsePayload::Health(engine.health())),

        Command::Ping => Ok(ResponsePayload::Pong),
    };

    match result {
        Ok(payload) => Response::success(request_id, payload),
        Err(e) => {
            debug!(
                request_id,
                error = %e,
                retryable = e.is_retryable(),
                "Command failed"
            );
            Response::error(request_id, ErrorInfo::from(&e))
        }
    }
}

fn broadcast_core_event(ipc: &IpcServer, event: CoreEvent) {
    let payload = match event {
        CoreEvent::ResourceReserved {
            resource_id,
            resource_name,
            holder_name,
            reserved_until,
        } => EventPayload::ResourceReserved {
            resource_id,
            resource_name,
            holder_name,
            reserved_until,
        },
        CoreEvent::ResourceReleased {
            resource_id,
            previous_holder,
        } => EventPayload::ResourceReleased {
            resource_id,
            previous_holder,
        },
        CoreEvent::DeviceTypeChanged {
            resource_id,
            device_type,
        } => EventPayload::DeviceTypeChanged {
            resource_id,
            device_type,
        },
    };

    ipc.broadcast_event(Event::new(payload));
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickreserve_api::{ErrorCode, ReserveRequest, ResponseResult};
    use quickreserve_config::ReservationPolicy;
    use quickreserve_store::{NewResource, ReservationStore, SqliteStore};
    use quickreserve_util::ResourceId;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn engine_with_router() -> ReservationEngine {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store
            .insert_resource(&NewResource::new("Router 1").with_device_type("Router"))
            .unwrap();
        ReservationEngine::new(store, ReservationPolicy::default())
    }

    fn reserve(holder: &str, duration_seconds: Option<i64>) -> Command {
        Command::Reserve(ReserveRequest {
            device_type: "Router".into(),
            holder_name: holder.into(),
            duration_seconds,
            reserved_until: None,
        })
    }

    fn error_code(response: Response) -> ErrorCode {
        match response.result {
            ResponseResult::Err(e) => e.code,
            ResponseResult::Ok(payload) => panic!("expected error, got {:?}", payload),
        }
    }

    #[test]
    fn test_failures_map_to_distinct_codes() {
        let dir = tempdir().unwrap();
        let ipc = IpcServer::new(dir.path().join("handler.sock"));
        let engine = engine_with_router();
        let client = ClientId::new();

        // Bad input is rejected before any resource is looked at
        let response = handle_command(&engine, &ipc, &client, 1, reserve("alice", Some(0)));
        assert_eq!(response.request_id, 1);
        assert_eq!(error_code(response), ErrorCode::InvalidRequest);

        let response = handle_command(&engine, &ipc, &client, 2, reserve("alice", Some(3600)));
        assert!(matches!(
            response.result,
            ResponseResult::Ok(ResponsePayload::Reserved(_))
        ));

        let response = handle_command(&engine, &ipc, &client, 3, reserve("bob", Some(3600)));
        assert_eq!(error_code(response), ErrorCode::NoAvailableResource);

        let response = handle_command(
            &engine,
            &ipc,
            &client,
            4,
            Command::Release {
                resource_id: ResourceId::new(99),
            },
        );
        assert_eq!(error_code(response), ErrorCode::ResourceNotFound);
    }

    #[test]
    fn test_release_reports_previous_state() {
        let dir = tempdir().unwrap();
        let ipc = IpcServer::new(dir.path().join("handler.sock"));
        let engine = engine_with_router();
        let client = ClientId::new();

        let reserved = handle_command(&engine, &ipc, &client, 1, reserve("alice", None));
        let resource_id = match reserved.result {
            ResponseResult::Ok(ResponsePayload::Reserved(r)) => r.resource_id,
            other => panic!("unexpected result: {:?}", other),
        };

        for (request_id, expected) in [(2, true), (3, false)] {
            let response =
                handle_command(&engine, &ipc, &client, request_id, Command::Release { resource_id });
            match response.result {
                ResponseResult::Ok(ResponsePayload::Released { was_reserved, .. }) => {
                    assert_eq!(was_reserved, expected)
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }
}
