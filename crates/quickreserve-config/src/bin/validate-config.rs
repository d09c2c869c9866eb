//! Config validation CLI tool
//!
//! Validates a quickreserved configuration file and reports any errors.

use quickreserve_api::OTHER_DEVICE_TYPE;
use quickreserve_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a quickreserved configuration file.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match quickreserve_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", quickreserve_config::CURRENT_CONFIG_VERSION);
            println!("  Resources: {}", config.resources.len());
            match config.reservations.max_duration {
                Some(max) => println!("  Max reservation: {}", format_duration(max)),
                None => println!("  Max reservation: unlimited"),
            }
            println!(
                "  Eternal reservations: {}",
                if config.reservations.allow_eternal { "allowed" } else { "rejected" }
            );

            if !config.resources.is_empty() {
                println!();
                println!("Resources:");
                for resource in &config.resources {
                    let device_type = match resource.device_type.as_deref() {
                        Some(t) if !t.is_empty() => t,
                        _ => OTHER_DEVICE_TYPE,
                    };
                    println!("  - {} [{}]", resource.name, device_type);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                quickreserve_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                quickreserve_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                quickreserve_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                quickreserve_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        quickreserve_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
