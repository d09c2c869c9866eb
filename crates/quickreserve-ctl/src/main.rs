//! quickreserve-ctl - command-line client for quickreserved
//!
//! Quick Reserve from a terminal: claim any free resource of a device type,
//! release it, and inspect or retag the inventory.

mod client;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use clap::{Parser, Subcommand};
use quickreserve_api::{ErrorCode, EventPayload, ResourceView, ResponsePayload};
use quickreserve_ipc::IpcError;
use quickreserve_util::{
    default_socket_path, format_datetime_full, parse_duration, ResourceId,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::client::CommandClient;

/// Format accepted by `--until`
const UNTIL_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Exit status when no resource of the requested type is free
const EXIT_NO_AVAILABLE: u8 = 3;

/// quickreserve-ctl - talk to quickreserved
#[derive(Parser, Debug)]
#[command(name = "quickreserve-ctl")]
#[command(about = "Command-line client for quickreserved", long_about = None)]
struct Args {
    /// Socket path for quickreserved connection (or set QUICKRESERVE_SOCKET env var)
    #[arg(short, long, env = "QUICKRESERVE_SOCKET")]
    socket: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: CtlCommand,
}

#[derive(Subcommand, Debug)]
enum CtlCommand {
    /// Claim the first free resource of a device type
    Reserve {
        /// Device type to reserve ("Other" also matches unlabelled resources)
        #[arg(short = 't', long = "type")]
        device_type: String,

        /// Who is holding the reservation
        #[arg(short = 'n', long = "name")]
        holder_name: String,

        /// How long to hold it, e.g. 30m, 2h, 1d. Omit for no end time.
        #[arg(long = "for", value_parser = parse_duration_arg, conflicts_with = "until")]
        duration: Option<Duration>,

        /// Hold it until a local time, e.g. "2025-11-14 18:00"
        #[arg(long, value_parser = parse_until_arg)]
        until: Option<DateTime<Local>>,
    },

    /// Release a resource
    Release { resource_id: ResourceId },

    /// List known device types
    Types,

    /// List resources with their reservation state
    List,

    /// Show resources grouped by device type
    Groups,

    /// Set or clear a resource's device type
    SetType {
        resource_id: ResourceId,
        /// New label; omit to clear
        device_type: Option<String>,
    },

    /// Show service health
    Health,

    /// Print events as they happen
    Watch,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    match parse_duration(s) {
        Some(d) if !d.is_zero() => Ok(d),
        Some(_) => Err("duration must be positive".into()),
        None => Err(format!("invalid duration '{}', expected e.g. 90, 45m, 1h30m, 2d", s)),
    }
}

fn parse_until_arg(s: &str) -> Result<DateTime<Local>, String> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), UNTIL_FORMAT)
        .map_err(|e| format!("invalid time '{}' (expected YYYY-MM-DD HH:MM): {}", s, e))?;
    Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| format!("'{}' is ambiguous or skipped in the local timezone", s))
}

fn print_resources(resources: &[ResourceView]) {
    for r in resources {
        let device_type = r.device_type.as_deref().unwrap_or("-");
        let state = match (&r.reservation, r.reserved) {
            (Some(res), true) => match res.reserved_until {
                Some(until) => format!(
                    "reserved by {} until {}",
                    res.holder_name,
                    format_datetime_full(&until)
                ),
                None => format!("reserved by {} (no end)", res.holder_name),
            },
            _ => "free".to_string(),
        };
        println!("{:>4}  {:<24} {:<16} {}", r.id, r.name, device_type, state);
    }
}

fn print_payload(payload: ResponsePayload) {
    match payload {
        ResponsePayload::Reserved(r) => {
            let until = r
                .reserved_until
                .map(|u| format_datetime_full(&u))
                .unwrap_or_else(|| "no end time".into());
            println!(
                "Reserved {} (id {}) for {} until {}",
                r.resource_name, r.resource_id, r.holder_name, until
            );
        }
        ResponsePayload::Released {
            resource_id,
            was_reserved,
        } => {
            if was_reserved {
                println!("Released resource {}", resource_id);
            } else {
                println!("Resource {} was not reserved", resource_id);
            }
        }
        ResponsePayload::DeviceTypes { device_types } => {
            for device_type in device_types {
                println!("{}", device_type);
            }
        }
        ResponsePayload::Resources { resources } => print_resources(&resources),
        ResponsePayload::Groups { groups } => {
            for group in groups {
                let ids: Vec<String> = group.resource_ids.iter().map(|id| id.to_string()).collect();
                println!("{} ({}): {}", group.device_type, ids.len(), ids.join(", "));
            }
        }
        ResponsePayload::DeviceTypeSet {
            resource_id,
            device_type,
        } => match device_type {
            Some(label) => println!("Resource {} is now '{}'", resource_id, label),
            None => println!("Resource {} device type cleared", resource_id),
        },
        ResponsePayload::Health(health) => {
            println!("live: {}", health.live);
            println!("ready: {}", health.ready);
            println!("store: {}", if health.store_ok { "ok" } else { "unavailable" });
            println!("resources: {}", health.resource_count);
        }
        other => println!("{:?}", other),
    }
}

fn print_event(payload: &EventPayload) {
    match payload {
        EventPayload::ResourceReserved {
            resource_id,
            resource_name,
            holder_name,
            reserved_until,
        } => {
            let until = reserved_until
                .map(|u| format_datetime_full(&u))
                .unwrap_or_else(|| "no end time".into());
            println!(
                "reserved: {} (id {}) by {} until {}",
                resource_name, resource_id, holder_name, until
            );
        }
        EventPayload::ResourceReleased {
            resource_id,
            previous_holder,
        } => println!(
            "released: id {} (was {})",
            resource_id,
            previous_holder.as_deref().unwrap_or("unknown")
        ),
        EventPayload::DeviceTypeChanged {
            resource_id,
            device_type,
        } => println!(
            "retagged: id {} -> {}",
            resource_id,
            device_type.as_deref().unwrap_or("(none)")
        ),
        EventPayload::Shutdown => println!("service shutting down"),
    }
}

async fn run(args: Args) -> Result<()> {
    let socket_path = args.socket.unwrap_or_else(default_socket_path);
    let client = CommandClient::new(&socket_path);

    let payload = match args.command {
        CtlCommand::Reserve {
            device_type,
            holder_name,
            duration,
            until,
        } => {
            if let Some(until) = until
                && until <= quickreserve_util::now()
            {
                bail!("--until must be in the future");
            }
            client
                .reserve(&device_type, &holder_name, duration, until)
                .await?
        }
        CtlCommand::Release { resource_id } => client.release(resource_id).await?,
        CtlCommand::Types => client.list_device_types().await?,
        CtlCommand::List => client.list_resources().await?,
        CtlCommand::Groups => client.groups().await?,
        CtlCommand::SetType {
            resource_id,
            device_type,
        } => client.set_device_type(resource_id, device_type).await?,
        CtlCommand::Health => client.health().await?,
        CtlCommand::Watch => {
            let mut events = client
                .watch()
                .await
                .with_context(|| format!("Failed to subscribe via {:?}", socket_path))?;
            loop {
                match events.next().await {
                    Ok(event) => print_event(&event.payload),
                    Err(IpcError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }
        }
    };

    print_payload(payload);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<IpcError>() {
                Some(IpcError::Rejected {
                    code: ErrorCode::NoAvailableResource,
                    ..
                }) => ExitCode::from(EXIT_NO_AVAILABLE),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
