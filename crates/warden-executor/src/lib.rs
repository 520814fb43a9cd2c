//! Tool executor interfaces for toolwarden
//!
//! This crate defines the boundary between the orchestrator and whatever
//! actually runs tools, plus an HTTP forwarder and a mock for tests.

mod http;
mod mock;
mod traits;

pub use http::*;
pub use mock::*;
pub use traits::*;
