mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, MeetingConfig, ProximityConfig, TrackingConfig};
pub use database::{Database, LocationLogEntry};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/visitrack[-dev]/` based on VISITRACK_ENV.
///
/// Set VISITRACK_ENV=dev to use the development data directory, or
/// VISITRACK_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("VISITRACK_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("VISITRACK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("visitrack-dev")
            } else {
                base_dir.join("visitrack")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
