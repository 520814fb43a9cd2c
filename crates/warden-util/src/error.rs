//! Error types for toolwarden

use thiserror::Error;

use crate::{SessionId, ToolName};

/// Errors for orchestrator requests that cannot be interpreted.
///
/// Policy outcomes (blocks, pending approvals) and executor failures are
/// ordinary results and never travel through this type.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Workflow template not found: {0}")]
    TemplateNotFound(String),

    #[error("Tool '{0}' is not subject to an approval gate")]
    ApprovalNotRequired(ToolName),
}

pub type Result<T> = std::result::Result<T, WardenError>;
