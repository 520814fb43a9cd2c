//! Derived views: compliance reports, windowed metrics, template progress

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use warden_util::{SessionId, ToolName};

use crate::{CallResponse, ViolationKind};

/// One policy violation as listed in a compliance report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationEntry {
    pub tool: ToolName,
    pub rule: ViolationKind,
    pub detail: String,
    pub timestamp: DateTime<Local>,
}

/// Per-session compliance summary derived from the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub session_id: SessionId,
    pub generated_at: DateTime<Local>,
    /// Attempts, whatever their verdict
    pub total_calls: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub violation_count: usize,
    pub approval_requests: usize,
    /// Successes over attempts, 0.0 when nothing was attempted
    pub success_rate: f64,
    /// Mean duration of finished calls, 0.0 when none finished
    pub avg_duration_ms: f64,
    /// 100 minus 10 per violation, floored at 0
    pub compliance_score: u32,
    pub violations: Vec<ViolationEntry>,
}

/// Metric compared against an alert threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    ViolationsPerHour,
    FailuresPerHour,
}

/// A configured threshold exceeded inside the metrics window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdAlert {
    pub metric: AlertMetric,
    pub observed_per_hour: f64,
    pub threshold_per_hour: f64,
}

/// Violation and failure rates over a time window, across all sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub window_start: DateTime<Local>,
    pub window_end: DateTime<Local>,
    pub violations: usize,
    pub failures: usize,
    pub violations_per_hour: f64,
    pub failures_per_hour: f64,
    pub alerts: Vec<ThresholdAlert>,
}

impl AggregateMetrics {
    pub fn has_alerts(&self) -> bool {
        !self.alerts.is_empty()
    }
}

/// Duration statistics for one tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPerformance {
    pub calls: usize,
    pub failures: usize,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
    pub total_ms: u64,
}

/// Progress of a session through a workflow template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateProgress {
    pub template: String,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub remaining_steps: usize,
    pub progress_percent: f64,
    pub is_complete: bool,
    pub has_failures: bool,
    /// Steps whose template dependencies have all succeeded
    pub next_steps: Vec<ToolName>,
}

/// Outcome of one template step during `execute_template`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub tool: ToolName,
    /// `None` when the step had already succeeded and was skipped
    pub response: Option<CallResponse>,
}

/// Result of walking a workflow template for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRun {
    pub template: String,
    pub session_id: SessionId,
    pub steps: Vec<StepReport>,
    /// Step that was blocked, pending approval or failed
    pub stopped_at: Option<ToolName>,
    pub completed: bool,
}
