//! Configuration parsing and validation for toolwarden
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - A declared tool universe with optional executor endpoints
//! - Sequential, parallel, conditional and approval policy tables
//! - Workflow templates with intra-template dependencies
//! - Validation with clear error messages

mod policy;
mod schema;
mod template;
mod validation;

pub use policy::*;
pub use schema::*;
pub use template::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    let config = Config::from_raw(raw);
    for rule in config.templates.unenforced_rules(&config.policy) {
        warn!(%rule, "Template rule is not enforced by policy");
    }
    debug!(
        tools = config.tools.len(),
        templates = config.templates.len(),
        "Configuration parsed"
    );

    Ok(config)
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;
