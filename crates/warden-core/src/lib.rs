//! Core policy engine and orchestration for toolwarden
//!
//! This crate is the heart of toolwarden, containing:
//! - Policy evaluation (approval, sequential, conditional, parallel rules)
//! - Per-session state (call history, in-flight calls, approvals)
//! - The audit monitor and its derived reports
//! - The orchestrator that evaluates, dispatches and records every call

mod audit;
mod engine;
mod orchestrator;
mod session;

pub use audit::*;
pub use engine::*;
pub use orchestrator::*;
pub use session::*;
