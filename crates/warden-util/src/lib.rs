//! Shared utilities for toolwarden
//!
//! This crate provides:
//! - ID types (ToolName, SessionId, CallId)
//! - Time utilities (wall clock with mock support, monotonic instants)
//! - Error types
//! - Default paths for configuration and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
