//! Shared types for the toolwarden API

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use warden_util::{CallId, SessionId, ToolName};

/// Category of policy rule that produced a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingDependency,
    ConditionalCriteriaNotMet,
    ParallelConflict,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::MissingDependency => "missing_dependency",
            ViolationKind::ConditionalCriteriaNotMet => "conditional_criteria_not_met",
            ViolationKind::ParallelConflict => "parallel_conflict",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reason for a blocked call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum BlockReason {
    /// A sequential dependency has not succeeded yet
    MissingDependency { dependency: ToolName },

    /// The conditional prerequisite has not succeeded, or its payload lacks
    /// some success criteria. `missing` is empty in the first case.
    ConditionalCriteriaNotMet {
        prerequisite: ToolName,
        missing: Vec<String>,
    },

    /// A restricted tool is currently in flight
    ParallelConflict { conflicting: ToolName },
}

impl BlockReason {
    pub fn kind(&self) -> ViolationKind {
        match self {
            BlockReason::MissingDependency { .. } => ViolationKind::MissingDependency,
            BlockReason::ConditionalCriteriaNotMet { .. } => {
                ViolationKind::ConditionalCriteriaNotMet
            }
            BlockReason::ParallelConflict { .. } => ViolationKind::ParallelConflict,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::MissingDependency { dependency } => {
                write!(f, "missing required dependency: {}", dependency)
            }
            BlockReason::ConditionalCriteriaNotMet {
                prerequisite,
                missing,
            } if missing.is_empty() => {
                write!(f, "requires successful completion of {}", prerequisite)
            }
            BlockReason::ConditionalCriteriaNotMet {
                prerequisite,
                missing,
            } => write!(
                f,
                "{} did not meet success criteria (missing: {})",
                prerequisite,
                missing.join(", ")
            ),
            BlockReason::ParallelConflict { conflicting } => {
                write!(f, "cannot run while {} is in flight", conflicting)
            }
        }
    }
}

/// Decision of one policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block(BlockReason),
    PendingApproval,
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Why a dispatched call did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallFailure {
    /// The executor ran the tool and reported failure
    Executor { message: String },
    /// The executor could not be reached or answered garbage
    Transport { message: String },
    /// The executor did not answer within the configured timeout
    TimedOut { after_ms: u64 },
    /// The caller abandoned the call while it was in flight
    Cancelled,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Executor { message } => write!(f, "tool failed: {}", message),
            CallFailure::Transport { message } => write!(f, "transport error: {}", message),
            CallFailure::TimedOut { after_ms } => write!(f, "timed out after {}ms", after_ms),
            CallFailure::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal outcome of a dispatched call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Success { payload: Value },
    Failure { failure: CallFailure },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    /// Payload of a successful outcome
    pub fn payload(&self) -> Option<&Value> {
        match self {
            CallOutcome::Success { payload } => Some(payload),
            CallOutcome::Failure { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&CallFailure> {
        match self {
            CallOutcome::Success { .. } => None,
            CallOutcome::Failure { failure } => Some(failure),
        }
    }
}

/// Record of one dispatched call. Immutable once finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call_id: CallId,
    pub tool: ToolName,
    pub arguments: Value,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub duration_ms: Option<u64>,
    pub outcome: Option<CallOutcome>,
}

impl ToolCallRecord {
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().is_some_and(CallOutcome::is_success)
    }
}

/// Result of `evaluate_and_maybe_execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallResponse {
    /// Policy allowed the call and the executor was invoked
    Allowed {
        call_id: CallId,
        outcome: CallOutcome,
        duration_ms: u64,
    },
    /// Policy blocked the call; the executor was not invoked
    Blocked { reason: BlockReason },
    /// The tool waits for an external approval decision
    PendingApproval { tool: ToolName },
}

impl CallResponse {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CallResponse::Allowed { .. })
    }

    /// Allowed and the executor reported success
    pub fn is_success(&self) -> bool {
        matches!(self, CallResponse::Allowed { outcome, .. } if outcome.is_success())
    }

    pub fn block_reason(&self) -> Option<&BlockReason> {
        match self {
            CallResponse::Blocked { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Read-only snapshot of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub created_at: DateTime<Local>,
    /// Calls attempted in this session, whatever their verdict
    pub total_calls: u64,
    /// Last finished record per tool
    pub completed: BTreeMap<ToolName, ToolCallRecord>,
    pub in_flight: BTreeSet<ToolName>,
    pub pending_approvals: BTreeSet<ToolName>,
    pub granted_approvals: BTreeSet<ToolName>,
    pub denied_approvals: BTreeSet<ToolName>,
}

impl SessionStatus {
    /// Tools whose last record is a success
    pub fn succeeded_tools(&self) -> BTreeSet<ToolName> {
        self.completed
            .values()
            .filter(|r| r.is_success())
            .map(|r| r.tool.clone())
            .collect()
    }

    /// Tools whose last record is a failure
    pub fn failed_tools(&self) -> BTreeSet<ToolName> {
        self.completed
            .values()
            .filter(|r| r.is_finished() && !r.is_success())
            .map(|r| r.tool.clone())
            .collect()
    }
}
