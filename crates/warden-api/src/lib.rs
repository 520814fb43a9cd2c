//! Shared value types for toolwarden
//!
//! This crate defines the types that cross component boundaries:
//! - Verdicts and structured block reasons
//! - Call outcomes and per-tool call records
//! - Session snapshots
//! - Compliance reports, windowed metrics and template progress

mod report;
mod types;

pub use report::*;
pub use types::*;
