//! Audit monitor: append-only event log with derived reports

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use warden_api::{
    AggregateMetrics, AlertMetric, ComplianceReport, ThresholdAlert, ToolPerformance,
    ViolationEntry,
};
use warden_config::AuditThresholds;
use warden_store::{AuditEvent, AuditEventKind, AuditSink};
use warden_util::{SessionId, ToolName};

use crate::session::lock;

/// Longest window honoured by `aggregate_metrics`
const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Backlogged events forwarded by one `record`; `flush` drains the rest
pub const MAX_DRAIN_PER_RECORD: usize = 32;

#[derive(Debug, Default)]
struct AuditLog {
    events: Vec<AuditEvent>,
    last_id: u64,
}

/// Records every attempt, completion, violation and approval action
pub struct AuditMonitor {
    log: Mutex<AuditLog>,
    sink: Option<Arc<dyn AuditSink>>,
    /// Events the sink has not accepted yet, oldest first
    backlog: Mutex<VecDeque<AuditEvent>>,
    thresholds: AuditThresholds,
}

impl AuditMonitor {
    pub fn new(thresholds: AuditThresholds) -> Self {
        Self {
            log: Mutex::new(AuditLog::default()),
            sink: None,
            backlog: Mutex::new(VecDeque::new()),
            thresholds,
        }
    }

    /// Forward every recorded event to `sink`.
    ///
    /// Ids continue after the highest one the sink already holds.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        match sink.last_seq() {
            Ok(last) => {
                let mut log = lock(&self.log);
                log.last_id = log.last_id.max(last);
                debug!(last_seq = log.last_id, "Audit sequence resumed from sink");
            }
            Err(e) => warn!(error = %e, "Could not read last audit id from sink"),
        }
        self.sink = Some(sink);
        self
    }

    pub fn thresholds(&self) -> &AuditThresholds {
        &self.thresholds
    }

    /// Append an event and forward it to the sink.
    ///
    /// Never fails: if the sink rejects the event it stays in the backlog and
    /// is retried ahead of the next event. At most `MAX_DRAIN_PER_RECORD`
    /// events are forwarded per call.
    pub fn record(&self, session_id: &SessionId, tool: &ToolName, kind: AuditEventKind) -> AuditEvent {
        let event = {
            let mut log = lock(&self.log);
            log.last_id += 1;
            let mut event = AuditEvent::new(session_id.clone(), tool.clone(), kind);
            event.id = log.last_id;
            log.events.push(event.clone());
            event
        };

        if let Some(sink) = &self.sink {
            let mut backlog = lock(&self.backlog);
            backlog.push_back(event.clone());
            drain(sink.as_ref(), &mut backlog, MAX_DRAIN_PER_RECORD);
        }

        event
    }

    /// Retry backlogged events. Returns how many are still waiting.
    pub fn flush(&self) -> usize {
        let Some(sink) = &self.sink else {
            return 0;
        };
        let mut backlog = lock(&self.backlog);
        let pending = backlog.len();
        drain(sink.as_ref(), &mut backlog, pending);
        backlog.len()
    }

    pub fn backlog_len(&self) -> usize {
        lock(&self.backlog).len()
    }

    /// Number of events recorded since startup
    pub fn len(&self) -> usize {
        lock(&self.log).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events of one session in arrival order
    pub fn events(&self, session_id: &SessionId) -> Vec<AuditEvent> {
        lock(&self.log)
            .events
            .iter()
            .filter(|e| &e.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Most recent events across all sessions, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        lock(&self.log)
            .events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn compliance_report(&self, session_id: &SessionId) -> ComplianceReport {
        let events = self.events(session_id);

        let mut total_calls = 0;
        let mut success_count = 0;
        let mut failure_count = 0;
        let mut approval_requests = 0;
        let mut total_duration_ms = 0u64;
        let mut finished = 0usize;
        let mut violations = Vec::new();

        for event in &events {
            match &event.kind {
                AuditEventKind::Attempt { .. } => total_calls += 1,
                AuditEventKind::Completion {
                    success,
                    duration_ms,
                    ..
                } => {
                    if *success {
                        success_count += 1;
                    } else {
                        failure_count += 1;
                    }
                    finished += 1;
                    total_duration_ms = total_duration_ms.saturating_add(*duration_ms);
                }
                AuditEventKind::Violation { rule, detail } => violations.push(ViolationEntry {
                    tool: event.tool.clone(),
                    rule: *rule,
                    detail: detail.clone(),
                    timestamp: event.timestamp,
                }),
                AuditEventKind::ApprovalRequested => approval_requests += 1,
                AuditEventKind::SessionStarted
                | AuditEventKind::ApprovalGranted
                | AuditEventKind::ApprovalDenied
                | AuditEventKind::ApprovalRevoked => {}
            }
        }

        let violation_count = violations.len();
        let penalty = u32::try_from(violation_count)
            .unwrap_or(u32::MAX)
            .saturating_mul(10);

        ComplianceReport {
            session_id: session_id.clone(),
            generated_at: warden_util::now(),
            total_calls,
            success_count,
            failure_count,
            violation_count,
            approval_requests,
            success_rate: ratio(success_count, total_calls),
            avg_duration_ms: if finished == 0 {
                0.0
            } else {
                total_duration_ms as f64 / finished as f64
            },
            compliance_score: 100u32.saturating_sub(penalty),
            violations,
        }
    }

    pub fn aggregate_metrics(&self, window: Duration) -> AggregateMetrics {
        self.aggregate_metrics_at(window, warden_util::now())
    }

    /// Violation and failure rates in `(now - window, now]`, with alerts
    /// for every configured threshold that is exceeded
    pub fn aggregate_metrics_at(&self, window: Duration, now: DateTime<Local>) -> AggregateMetrics {
        let window = window.min(MAX_WINDOW);
        let span = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let window_start = now - span;

        let (violations, failures) = {
            let log = lock(&self.log);
            let in_window = log
                .events
                .iter()
                .filter(|e| e.timestamp > window_start && e.timestamp <= now);
            in_window.fold((0usize, 0usize), |(v, f), e| {
                (v + e.is_violation() as usize, f + e.is_failure() as usize)
            })
        };

        let hours = window.as_secs_f64() / 3600.0;
        let per_hour = |count: usize| if hours > 0.0 { count as f64 / hours } else { 0.0 };
        let violations_per_hour = per_hour(violations);
        let failures_per_hour = per_hour(failures);

        let mut alerts = Vec::new();
        let checks = [
            (
                AlertMetric::ViolationsPerHour,
                violations_per_hour,
                self.thresholds.violations_per_hour,
            ),
            (
                AlertMetric::FailuresPerHour,
                failures_per_hour,
                self.thresholds.failures_per_hour,
            ),
        ];
        for (metric, observed, threshold) in checks {
            if let Some(threshold) = threshold
                && observed > threshold
            {
                warn!(
                    metric = ?metric,
                    observed_per_hour = observed,
                    threshold_per_hour = threshold,
                    "Audit threshold exceeded"
                );
                alerts.push(ThresholdAlert {
                    metric,
                    observed_per_hour: observed,
                    threshold_per_hour: threshold,
                });
            }
        }

        AggregateMetrics {
            window_start,
            window_end: now,
            violations,
            failures,
            violations_per_hour,
            failures_per_hour,
            alerts,
        }
    }

    /// Call count, failures and duration statistics per tool, from completions
    pub fn tool_performance(&self) -> BTreeMap<ToolName, ToolPerformance> {
        let mut stats: BTreeMap<ToolName, ToolPerformance> = BTreeMap::new();

        for event in lock(&self.log).events.iter() {
            let AuditEventKind::Completion {
                success,
                duration_ms,
                ..
            } = &event.kind
            else {
                continue;
            };

            let entry = stats.entry(event.tool.clone()).or_default();
            if entry.calls == 0 {
                entry.min_ms = *duration_ms;
                entry.max_ms = *duration_ms;
            } else {
                entry.min_ms = entry.min_ms.min(*duration_ms);
                entry.max_ms = entry.max_ms.max(*duration_ms);
            }
            entry.calls += 1;
            entry.failures += usize::from(!*success);
            entry.total_ms = entry.total_ms.saturating_add(*duration_ms);
        }

        for perf in stats.values_mut() {
            perf.avg_ms = perf.total_ms as f64 / perf.calls as f64;
        }
        stats
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn drain(sink: &dyn AuditSink, backlog: &mut VecDeque<AuditEvent>, limit: usize) {
    for _ in 0..limit {
        let Some(event) = backlog.front() else {
            break;
        };
        match sink.append(event) {
            Ok(()) => {
                debug!(event_id = event.id, "Audit event forwarded");
                backlog.pop_front();
            }
            Err(e) => {
                warn!(
                    error = %e,
                    backlog = backlog.len(),
                    "Audit sink append failed, keeping event for retry"
                );
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_api::ViolationKind;
    use warden_store::MemorySink;

    fn completion(success: bool, duration_ms: u64) -> AuditEventKind {
        AuditEventKind::Completion {
            call_id: warden_util::CallId::new(),
            success,
            duration_ms,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    fn violation() -> AuditEventKind {
        AuditEventKind::Violation {
            rule: ViolationKind::MissingDependency,
            detail: "missing required dependency: validate_data".into(),
        }
    }

    #[test]
    fn ids_follow_arrival_order() {
        let monitor = AuditMonitor::new(AuditThresholds::default());
        let s = SessionId::new("s1");
        let t = ToolName::new("validate_data");

        let a = monitor.record(&s, &t, AuditEventKind::Attempt { arguments: json!({}) });
        let b = monitor.record(&s, &t, completion(true, 10));
        assert!(a.id < b.id);
        assert_eq!(monitor.recent(1)[0].id, b.id);
        assert_eq!(monitor.len(), 2);
    }

    #[test]
    fn compliance_report_counts() {
        let monitor = AuditMonitor::new(AuditThresholds::default());
        let s = SessionId::new("s1");
        let other = SessionId::new("s2");
        let t = ToolName::new("process_data");

        for _ in 0..4 {
            monitor.record(&s, &t, AuditEventKind::Attempt { arguments: json!({}) });
        }
        monitor.record(&s, &t, completion(true, 100));
        monitor.record(&s, &t, completion(false, 300));
        monitor.record(&s, &t, violation());
        monitor.record(&s, &t, AuditEventKind::ApprovalRequested);
        monitor.record(&other, &t, violation());

        let report = monitor.compliance_report(&s);
        assert_eq!(report.total_calls, 4);
        assert_eq!(report.success_count, 1);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.violation_count, 1);
        assert_eq!(report.approval_requests, 1);
        assert_eq!(report.success_rate, 0.25);
        assert_eq!(report.avg_duration_ms, 200.0);
        assert_eq!(report.compliance_score, 90);
        assert_eq!(report.violations[0].rule, ViolationKind::MissingDependency);
    }

    #[test]
    fn compliance_score_floors_at_zero() {
        let monitor = AuditMonitor::new(AuditThresholds::default());
        let s = SessionId::new("s1");
        let t = ToolName::new("process_data");
        for _ in 0..12 {
            monitor.record(&s, &t, violation());
        }

        let report = monitor.compliance_report(&s);
        assert_eq!(report.compliance_score, 0);
        assert_eq!(report.success_rate, 0.0);
    }

    #[test]
    fn aggregate_metrics_raise_alerts() {
        let thresholds = AuditThresholds {
            window: Duration::from_secs(3600),
            violations_per_hour: Some(1.0),
            failures_per_hour: Some(5.0),
        };
        let monitor = AuditMonitor::new(thresholds);
        let s = SessionId::new("s1");
        let t = ToolName::new("process_data");
        monitor.record(&s, &t, violation());
        monitor.record(&s, &t, violation());
        monitor.record(&s, &t, completion(false, 5));

        let now = warden_util::now();
        let metrics = monitor.aggregate_metrics_at(Duration::from_secs(3600), now);
        assert_eq!(metrics.violations, 2);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.violations_per_hour, 2.0);
        assert_eq!(metrics.alerts.len(), 1);
        assert_eq!(metrics.alerts[0].metric, AlertMetric::ViolationsPerHour);

        // Window that ends before anything was recorded
        let earlier = now - chrono::Duration::hours(2);
        let metrics = monitor.aggregate_metrics_at(Duration::from_secs(3600), earlier);
        assert_eq!(metrics.violations, 0);
        assert!(!metrics.has_alerts());
    }

    #[test]
    fn sink_failures_are_buffered_and_flushed() {
        let sink = Arc::new(MemorySink::new());
        let monitor = AuditMonitor::new(AuditThresholds::default()).with_sink(sink.clone());
        let s = SessionId::new("s1");
        let t = ToolName::new("backup_data");

        sink.set_fail_appends(true);
        monitor.record(&s, &t, AuditEventKind::ApprovalRequested);
        monitor.record(&s, &t, AuditEventKind::ApprovalGranted);
        assert_eq!(monitor.backlog_len(), 2);
        assert_eq!(monitor.len(), 2);
        assert!(sink.events().is_empty());

        sink.set_fail_appends(false);
        monitor.record(&s, &t, AuditEventKind::ApprovalRevoked);
        assert_eq!(monitor.backlog_len(), 0);

        let ids: Vec<u64> = sink.events().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(monitor.flush(), 0);
    }

    #[test]
    fn recovered_sink_is_caught_up_in_bounded_steps() {
        let sink = Arc::new(MemorySink::new());
        let monitor = AuditMonitor::new(AuditThresholds::default()).with_sink(sink.clone());
        let s = SessionId::new("s1");
        let t = ToolName::new("backup_data");

        sink.set_fail_appends(true);
        for _ in 0..MAX_DRAIN_PER_RECORD + 10 {
            monitor.record(&s, &t, AuditEventKind::ApprovalRequested);
        }
        assert_eq!(monitor.backlog_len(), MAX_DRAIN_PER_RECORD + 10);

        // One record forwards a bounded batch, oldest first
        sink.set_fail_appends(false);
        monitor.record(&s, &t, AuditEventKind::ApprovalGranted);
        assert_eq!(sink.events().len(), MAX_DRAIN_PER_RECORD);
        assert_eq!(monitor.backlog_len(), 11);
        assert_eq!(sink.events()[0].id, 1);

        assert_eq!(monitor.flush(), 0);
        let ids: Vec<u64> = sink.events().iter().map(|e| e.id).collect();
        let expected: Vec<u64> = (1..=(MAX_DRAIN_PER_RECORD as u64 + 11)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn ids_resume_after_sink_contents() {
        let sink = Arc::new(MemorySink::new());
        let s = SessionId::new("s1");
        let t = ToolName::new("validate_data");

        let first = AuditMonitor::new(AuditThresholds::default()).with_sink(sink.clone());
        first.record(&s, &t, AuditEventKind::SessionStarted);
        first.record(&s, &t, AuditEventKind::Attempt { arguments: json!({}) });

        let second = AuditMonitor::new(AuditThresholds::default()).with_sink(sink.clone());
        let event = second.record(&s, &t, AuditEventKind::Attempt { arguments: json!({}) });
        assert_eq!(event.id, 3);
        assert_eq!(second.len(), 1);

        let ids: Vec<u64> = sink.events().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn tool_performance_from_completions() {
        let monitor = AuditMonitor::new(AuditThresholds::default());
        let s = SessionId::new("s1");
        let t = ToolName::new("validate_data");
        monitor.record(&s, &t, completion(true, 10));
        monitor.record(&s, &t, completion(false, 30));
        monitor.record(&s, &t, AuditEventKind::Attempt { arguments: json!({}) });

        let perf = monitor.tool_performance();
        let stats = &perf[&t];
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.min_ms, 10);
        assert_eq!(stats.max_ms, 30);
        assert_eq!(stats.avg_ms, 20.0);
    }
}
