//! Default paths for toolwarden components
//!
//! Paths are user-writable by default:
//! - Config: `$XDG_CONFIG_HOME/toolwarden/config.toml` or `~/.config/toolwarden/config.toml`
//! - Data: `$XDG_DATA_HOME/toolwarden` or `~/.local/share/toolwarden`
//!
//! `WARDEN_CONFIG` and `WARDEN_DATA_DIR` overrides are applied by the
//! command line layer.

use std::path::PathBuf;

/// Application subdirectory name
const APP_DIR: &str = "toolwarden";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/toolwarden/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/toolwarden/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory, used when the config names none.
///
/// Order of precedence:
/// 1. `$XDG_DATA_HOME/toolwarden` (if XDG_DATA_HOME is set)
/// 2. `~/.local/share/toolwarden` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}
