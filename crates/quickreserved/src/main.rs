//! quickreserved - The Quick Reserve background service
//!
//! This is the main entry point for the quickreserved service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization and inventory seeding
//! - Reservation engine
//! - IPC server

mod handler;

use anyhow::{Context, Result};
use clap::Parser;
use quickreserve_api::{ErrorCode, ErrorInfo, Event, EventPayload, Response, API_VERSION};
use quickreserve_config::{load_config, Config};
use quickreserve_core::ReservationEngine;
use quickreserve_ipc::{IpcServer, ServerMessage};
use quickreserve_store::{AuditEvent, AuditEventType, ReservationStore, SqliteStore};
use quickreserve_util::{default_config_path, RateLimiter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::handler::handle_command;

/// How often idle rate limiter entries are dropped
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// quickreserved - device type tagging and Quick Reserve allocation
#[derive(Parser, Debug)]
#[command(name = "quickreserved")]
#[command(about = "Quick Reserve service: claim any free resource of a device type", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/quickreserve/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set QUICKRESERVE_SOCKET env var)
    #[arg(short, long, env = "QUICKRESERVE_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set QUICKRESERVE_DATA_DIR env var)
    #[arg(short, long, env = "QUICKRESERVE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// Main service state
struct Service {
    engine: Arc<ReservationEngine>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn ReservationStore>,
    rate_limiter: RateLimiter,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let config = if args.config.exists() {
            let config = load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?;
            info!(
                config_path = %args.config.display(),
                resource_count = config.resources.len(),
                "Configuration loaded"
            );
            config
        } else {
            info!(
                config_path = %args.config.display(),
                "No configuration file, using defaults"
            );
            Config::default()
        };

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| config.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("quickreserved.db");
        let store: Arc<dyn ReservationStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let engine = ReservationEngine::new(store.clone(), config.reservations.clone());
        let seeded = engine
            .seed_resources(&config.resources)
            .context("Failed to seed configured resources")?;
        if seeded > 0 {
            info!(seeded, "Seeded resources from configuration");
        }

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        let rate_limiter =
            RateLimiter::new(config.service.rate_limit_per_second, Duration::from_secs(1));

        Ok(Self {
            engine: Arc::new(engine),
            ipc: Arc::new(ipc),
            store,
            rate_limiter,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc = self.ipc.clone();
        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let engine = self.engine.clone();
        let rate_limiter = Arc::new(Mutex::new(self.rate_limiter));
        let store = self.store.clone();

        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        let mut cleanup_timer = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                _ = cleanup_timer.tick() => {
                    rate_limiter
                        .lock()
                        .await
                        .cleanup(RATE_LIMIT_CLEANUP_INTERVAL * 5);
                }

                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&engine, &ipc, &store, &rate_limiter, msg).await;
                }
            }
        }

        info!("Shutting down quickreserved");

        ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    async fn handle_ipc_message(
        engine: &Arc<ReservationEngine>,
        ipc: &Arc<IpcServer>,
        store: &Arc<dyn ReservationStore>,
        rate_limiter: &Arc<Mutex<RateLimiter>>,
        msg: ServerMessage,
    ) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.check(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                if request.api_version != API_VERSION {
                    let response = Response::error(
                        request.request_id,
                        ErrorInfo::new(
                            ErrorCode::InvalidRequest,
                            format!(
                                "Unsupported API version {} (expected {})",
                                request.api_version, API_VERSION
                            ),
                        ),
                    );
                    let _ = ipc.send_response(&client_id, response).await;
                    return;
                }

                // Store calls block, and requests must not wait on each other
                // beyond the per-resource claim.
                let engine = engine.clone();
                let ipc = ipc.clone();
                tokio::spawn(async move {
                    let request_id = request.request_id;
                    let command = request.command;
                    let handler_ipc = ipc.clone();
                    let handler_client = client_id.clone();

                    let response = tokio::task::spawn_blocking(move || {
                        handle_command(&engine, &handler_ipc, &handler_client, request_id, command)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "Command handler panicked");
                        Response::error(
                            request_id,
                            ErrorInfo::new(ErrorCode::InternalError, "Internal error"),
                        )
                    });

                    let _ = ipc.send_response(&client_id, response).await;
                });
            }

            ServerMessage::ClientConnected { client_id, uid } => {
                info!(
                    client_id = %client_id,
                    uid = ?uid,
                    clients = ipc.client_count().await,
                    "Client connected"
                );

                let _ = store.append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                    client_id: client_id.to_string(),
                    uid,
                }));
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                let _ = store.append_audit(AuditEvent::new(AuditEventType::ClientDisconnected {
                    client_id: client_id.to_string(),
                }));

                rate_limiter.lock().await.remove_client(&client_id);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mock_time = quickreserve_util::is_mock_time_active(),
        "quickreserved starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}
