//! Per-session state: call history, in-flight calls, approvals

use chrono::{DateTime, Local};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use warden_api::{CallOutcome, SessionStatus, ToolCallRecord};
use warden_util::{CallId, MonotonicInstant, SessionId, ToolName};

use crate::StateDelta;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Session and audit mutations never leave partial state behind, so the data
/// is still consistent after a poisoning panic.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ticket for a dispatched call, handed back to `finish_call`
#[derive(Debug, Clone)]
pub struct InFlightCall {
    pub call_id: CallId,
    pub tool: ToolName,
    pub arguments: Value,
    pub started_at: DateTime<Local>,
    pub started_mono: MonotonicInstant,
}

/// Mutable state of one session
#[derive(Debug)]
pub struct SessionState {
    session_id: SessionId,
    created_at: DateTime<Local>,
    /// Last finished record per tool
    completed: HashMap<ToolName, ToolCallRecord>,
    /// Outstanding calls per tool
    in_flight: HashMap<ToolName, usize>,
    pending_approvals: BTreeSet<ToolName>,
    granted_approvals: BTreeSet<ToolName>,
    denied_approvals: BTreeSet<ToolName>,
    total_calls: u64,
}

impl SessionState {
    pub fn new(session_id: SessionId, created_at: DateTime<Local>) -> Self {
        Self {
            session_id,
            created_at,
            completed: HashMap::new(),
            in_flight: HashMap::new(),
            pending_approvals: BTreeSet::new(),
            granted_approvals: BTreeSet::new(),
            denied_approvals: BTreeSet::new(),
            total_calls: 0,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn last_record(&self, tool: &ToolName) -> Option<&ToolCallRecord> {
        self.completed.get(tool)
    }

    pub fn has_succeeded(&self, tool: &ToolName) -> bool {
        self.completed.get(tool).is_some_and(ToolCallRecord::is_success)
    }

    pub fn is_in_flight(&self, tool: &ToolName) -> bool {
        self.in_flight_count(tool) > 0
    }

    pub fn in_flight_count(&self, tool: &ToolName) -> usize {
        self.in_flight.get(tool).copied().unwrap_or(0)
    }

    pub fn is_granted(&self, tool: &ToolName) -> bool {
        self.granted_approvals.contains(tool)
    }

    pub fn is_pending(&self, tool: &ToolName) -> bool {
        self.pending_approvals.contains(tool)
    }

    pub fn is_denied(&self, tool: &ToolName) -> bool {
        self.denied_approvals.contains(tool)
    }

    /// Count a requested call, whatever its verdict
    pub fn note_attempt(&mut self) {
        self.total_calls += 1;
    }

    pub fn apply(&mut self, delta: StateDelta) {
        match delta {
            StateDelta::MarkPending(tool) => {
                self.pending_approvals.insert(tool);
            }
        }
    }

    /// Mark `tool` in flight and return the ticket for its completion
    pub fn begin_call(
        &mut self,
        tool: ToolName,
        arguments: Value,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> InFlightCall {
        *self.in_flight.entry(tool.clone()).or_insert(0) += 1;

        InFlightCall {
            call_id: CallId::new(),
            tool,
            arguments,
            started_at: now,
            started_mono: now_mono,
        }
    }

    /// Store the finished record and clear one in-flight mark for its tool
    pub fn finish_call(
        &mut self,
        call: InFlightCall,
        outcome: CallOutcome,
        now: DateTime<Local>,
        now_mono: MonotonicInstant,
    ) -> ToolCallRecord {
        match self.in_flight.get_mut(&call.tool) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.in_flight.remove(&call.tool);
            }
            None => debug_assert!(false, "finished call for {} was not in flight", call.tool),
        }

        let duration = now_mono.duration_since(call.started_mono);
        let record = ToolCallRecord {
            call_id: call.call_id,
            tool: call.tool,
            arguments: call.arguments,
            started_at: call.started_at,
            finished_at: Some(now),
            duration_ms: Some(warden_util::duration_millis(duration)),
            outcome: Some(outcome),
        };

        self.completed.insert(record.tool.clone(), record.clone());
        record
    }

    /// Returns true if the tool was not already granted
    pub fn grant(&mut self, tool: &ToolName) -> bool {
        self.pending_approvals.remove(tool);
        self.denied_approvals.remove(tool);
        self.granted_approvals.insert(tool.clone())
    }

    /// Denial clears the pending request and withdraws any earlier grant.
    /// The tool stays gated and may be requested again.
    pub fn deny(&mut self, tool: &ToolName) -> bool {
        self.pending_approvals.remove(tool);
        self.granted_approvals.remove(tool);
        self.denied_approvals.insert(tool.clone())
    }

    /// Returns true if the tool had been granted
    pub fn revoke(&mut self, tool: &ToolName) -> bool {
        self.granted_approvals.remove(tool)
    }

    pub fn succeeded_tools(&self) -> BTreeSet<ToolName> {
        self.completed
            .values()
            .filter(|r| r.is_success())
            .map(|r| r.tool.clone())
            .collect()
    }

    pub fn failed_tools(&self) -> BTreeSet<ToolName> {
        self.completed
            .values()
            .filter(|r| r.is_finished() && !r.is_success())
            .map(|r| r.tool.clone())
            .collect()
    }

    pub fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            total_calls: self.total_calls,
            completed: self
                .completed
                .iter()
                .map(|(tool, record)| (tool.clone(), record.clone()))
                .collect::<BTreeMap<_, _>>(),
            in_flight: self.in_flight.keys().cloned().collect(),
            pending_approvals: self.pending_approvals.clone(),
            granted_approvals: self.granted_approvals.clone(),
            denied_approvals: self.denied_approvals.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use warden_api::CallFailure;

    fn state() -> SessionState {
        SessionState::new(SessionId::new("s1"), warden_util::now())
    }

    #[test]
    fn call_lifecycle() {
        let mut state = state();
        let tool = ToolName::new("validate_data");
        let start = MonotonicInstant::now();

        let call = state.begin_call(tool.clone(), json!({}), warden_util::now(), start);
        assert!(state.is_in_flight(&tool));
        assert!(state.snapshot().in_flight.contains(&tool));

        let record = state.finish_call(
            call,
            CallOutcome::Success {
                payload: json!({"valid": true}),
            },
            warden_util::now(),
            start + Duration::from_millis(250),
        );

        assert_eq!(record.duration_ms, Some(250));
        assert!(!state.is_in_flight(&tool));
        assert!(state.has_succeeded(&tool));
        assert_eq!(state.succeeded_tools().len(), 1);
    }

    #[test]
    fn concurrent_calls_of_one_tool_tracked_independently() {
        let mut state = state();
        let tool = ToolName::new("backup_data");
        let now = MonotonicInstant::now();

        let first = state.begin_call(tool.clone(), json!({}), warden_util::now(), now);
        let second = state.begin_call(tool.clone(), json!({}), warden_util::now(), now);
        assert_eq!(state.in_flight_count(&tool), 2);

        state.finish_call(
            first,
            CallOutcome::Failure {
                failure: CallFailure::Cancelled,
            },
            warden_util::now(),
            now,
        );
        assert!(state.is_in_flight(&tool));

        state.finish_call(
            second,
            CallOutcome::Success { payload: json!({}) },
            warden_util::now(),
            now,
        );
        assert!(!state.is_in_flight(&tool));
        assert!(state.has_succeeded(&tool));
    }

    #[test]
    fn rerun_overwrites_last_record() {
        let mut state = state();
        let tool = ToolName::new("process_data");
        let now = MonotonicInstant::now();

        let call = state.begin_call(tool.clone(), json!({}), warden_util::now(), now);
        state.finish_call(call, CallOutcome::Success { payload: json!(1) }, warden_util::now(), now);

        let call = state.begin_call(tool.clone(), json!({}), warden_util::now(), now);
        state.finish_call(
            call,
            CallOutcome::Failure {
                failure: CallFailure::Executor {
                    message: "boom".into(),
                },
            },
            warden_util::now(),
            now,
        );

        assert!(!state.has_succeeded(&tool));
        assert!(state.failed_tools().contains(&tool));
    }

    #[test]
    fn approval_transitions() {
        let mut state = state();
        let tool = ToolName::new("require_approval");

        state.apply(StateDelta::MarkPending(tool.clone()));
        assert!(state.is_pending(&tool));

        assert!(state.deny(&tool));
        assert!(!state.is_pending(&tool));
        assert!(state.is_denied(&tool));

        state.apply(StateDelta::MarkPending(tool.clone()));
        assert!(state.grant(&tool));
        assert!(!state.grant(&tool));
        assert!(state.is_granted(&tool));
        assert!(!state.is_pending(&tool));
        assert!(!state.is_denied(&tool));

        assert!(state.revoke(&tool));
        assert!(!state.is_granted(&tool));
        assert!(!state.revoke(&tool));
    }

    #[test]
    fn deny_withdraws_an_earlier_grant() {
        let mut state = state();
        let tool = ToolName::new("require_approval");

        state.grant(&tool);
        assert!(state.deny(&tool));
        assert!(!state.is_granted(&tool));
        assert!(state.is_denied(&tool));

        let status = state.snapshot();
        assert!(status.granted_approvals.is_empty());
        assert!(status.denied_approvals.contains(&tool));
    }
}
