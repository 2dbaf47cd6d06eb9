//! Configuration loading and root folder resolution
//!
//! Bootstrap settings only: where the root folder lives, which port the
//! service listens on, and logging. Runtime policy values live in the
//! `settings` table (see [`crate::db::settings`]).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable consulted for the root folder
pub const ROOT_FOLDER_ENV: &str = "UA_ROOT_FOLDER";

/// Database file created inside the root folder
pub const DATABASE_FILE: &str = "ua.db";

/// Bootstrap configuration loaded from TOML
///
/// Every field is optional; missing values fall through to the next tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding `ua.db`
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP port for the ua-at service
    #[serde(default)]
    pub port: Option<u16>,

    /// Campus civil time offset, overrides the `settings` table value
    #[serde(default)]
    pub campus_utc_offset_minutes: Option<i32>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root folder resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: Option<&TomlConfig>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        debug!("Root folder from command line: {}", path.display());
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            debug!("Root folder from {}: {}", env_var_name, path);
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root) = toml_config.and_then(|c| c.root_folder.as_ref()) {
        debug!("Root folder from TOML: {}", root.display());
        return root.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Locate the TOML config file for this platform
///
/// Linux checks `~/.config/ua/config.toml` first, then `/etc/ua/config.toml`.
pub fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("ua").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/ua/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the platform TOML config if one exists
///
/// A malformed file is logged and ignored so the service still starts
/// on compiled defaults.
pub fn load_default_toml() -> TomlConfig {
    match find_config_file() {
        Some(path) => match load_toml_config(&path) {
            Ok(config) => {
                debug!("Loaded config file {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring config file: {}", e);
                TomlConfig::default()
            }
        },
        None => TomlConfig::default(),
    }
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/ua (or /var/lib/ua for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("ua"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/ua"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("ua"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/ua"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("ua"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\ua"))
    } else {
        PathBuf::from("./ua_data")
    }
}

/// Create the root folder if missing and return the database path inside it
pub fn prepare_root_folder(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    Ok(root.join(DATABASE_FILE))
}
