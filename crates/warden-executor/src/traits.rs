//! Tool executor traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use warden_util::ToolName;

/// Errors reaching or talking to a downstream executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("No executor endpoint for tool: {0}")]
    UnknownTool(ToolName),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Executor returned HTTP {0}")]
    Status(u16),

    #[error("Malformed executor response: {0}")]
    Decode(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// What a downstream executor reported for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, rename = "result")]
    pub payload: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Runs tools on behalf of the orchestrator.
///
/// An `Err` means the executor could not be asked; a reported tool failure is
/// `Ok` with `success == false`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, tool: &ToolName, arguments: &Value) -> ExecutorResult<ToolResult>;
}
