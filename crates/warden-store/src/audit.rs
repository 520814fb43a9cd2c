//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_api::ViolationKind;
use warden_util::{CallId, SessionId, ToolName};

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// First request or approval action seen for a session
    SessionStarted,

    /// A call was requested, whatever the verdict
    Attempt { arguments: Value },

    /// A dispatched call finished
    Completion {
        call_id: CallId,
        success: bool,
        duration_ms: u64,
        error: Option<String>,
    },

    /// A call was blocked by a policy rule
    Violation { rule: ViolationKind, detail: String },

    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    ApprovalRevoked,
}

impl AuditEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEventKind::SessionStarted => "session_started",
            AuditEventKind::Attempt { .. } => "attempt",
            AuditEventKind::Completion { .. } => "completion",
            AuditEventKind::Violation { .. } => "violation",
            AuditEventKind::ApprovalRequested => "approval_requested",
            AuditEventKind::ApprovalGranted => "approval_granted",
            AuditEventKind::ApprovalDenied => "approval_denied",
            AuditEventKind::ApprovalRevoked => "approval_revoked",
        }
    }
}

/// Full audit event with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the log, strictly increasing
    pub id: u64,

    pub timestamp: DateTime<Local>,

    pub session_id: SessionId,

    pub tool: ToolName,

    pub kind: AuditEventKind,
}

impl AuditEvent {
    pub fn new(session_id: SessionId, tool: ToolName, kind: AuditEventKind) -> Self {
        Self {
            id: 0, // Assigned by the monitor
            timestamp: warden_util::now(),
            session_id,
            tool,
            kind,
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self.kind, AuditEventKind::Violation { .. })
    }

    /// Completion with `success == false`
    pub fn is_failure(&self) -> bool {
        matches!(self.kind, AuditEventKind::Completion { success: false, .. })
    }
}
