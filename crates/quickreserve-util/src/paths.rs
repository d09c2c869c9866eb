//! Default paths for quickreserved components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/quickreserved/quickreserved.sock` or `/tmp/quickreserved-$USER/quickreserved.sock`
//! - Data: `$XDG_DATA_HOME/quickreserved` or `~/.local/share/quickreserved`
//! - Config: `$XDG_CONFIG_HOME/quickreserve/config.toml` or `~/.config/quickreserve/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const QUICKRESERVE_SOCKET_ENV: &str = "QUICKRESERVE_SOCKET";

/// Environment variable for overriding the data directory
pub const QUICKRESERVE_DATA_DIR_ENV: &str = "QUICKRESERVE_DATA_DIR";

const SOCKET_FILENAME: &str = "quickreserved.sock";
const APP_DIR: &str = "quickreserved";
const CONFIG_DIR: &str = "quickreserve";
const CONFIG_FILENAME: &str = "config.toml";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$QUICKRESERVE_SOCKET`
/// 2. `$XDG_RUNTIME_DIR/quickreserved/quickreserved.sock`
/// 3. `/tmp/quickreserved-$USER/quickreserved.sock`
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(QUICKRESERVE_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Socket path ignoring `$QUICKRESERVE_SOCKET`, for config defaults where
/// the env var is handled by the CLI layer.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory (holds the SQLite database).
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(QUICKRESERVE_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Data directory ignoring `$QUICKRESERVE_DATA_DIR`.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share").join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default configuration file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(CONFIG_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(CONFIG_DIR).join(CONFIG_FILENAME)
}
