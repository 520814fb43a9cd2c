//! Core policy engine

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use warden_api::{BlockReason, CallOutcome, Verdict};
use warden_config::PolicyRegistry;
use warden_util::ToolName;

use crate::SessionState;

/// Session change requested by an evaluation.
///
/// The engine never mutates the session; the caller applies the delta under
/// the same lock it records the audit event with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateDelta {
    MarkPending(ToolName),
}

/// Result of evaluating one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub delta: Option<StateDelta>,
}

impl Evaluation {
    fn allow() -> Self {
        Self {
            verdict: Verdict::Allow,
            delta: None,
        }
    }

    fn block(reason: BlockReason) -> Self {
        Self {
            verdict: Verdict::Block(reason),
            delta: None,
        }
    }
}

/// Text that success criteria are matched against.
///
/// A JSON string is its raw contents, anything else is compact JSON.
pub fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decides whether a call may run given the registry and a session
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    registry: Arc<PolicyRegistry>,
}

impl PolicyEngine {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Evaluate `tool` for `session`. The first failing check wins:
    /// approval, sequential dependencies, conditional criteria, parallel restrictions.
    pub fn evaluate(&self, session: &SessionState, tool: &ToolName) -> Evaluation {
        if !self.registry.is_known(tool) {
            debug!(session_id = %session.session_id(), tool = %tool, "Tool has no policy entry");
        }

        if self.registry.requires_approval(tool) && !session.is_granted(tool) {
            debug!(session_id = %session.session_id(), tool = %tool, "Awaiting approval");
            return Evaluation {
                verdict: Verdict::PendingApproval,
                delta: Some(StateDelta::MarkPending(tool.clone())),
            };
        }

        // BTreeSet iteration gives a stable order across runs
        for dependency in self.registry.dependencies(tool) {
            if !session.has_succeeded(dependency) {
                return Evaluation::block(BlockReason::MissingDependency {
                    dependency: dependency.clone(),
                });
            }
        }

        if let Some(rule) = self.registry.conditional_rule(tool) {
            let payload = session
                .last_record(&rule.requires_success_of)
                .and_then(|r| r.outcome.as_ref())
                .and_then(CallOutcome::payload);

            let Some(payload) = payload else {
                return Evaluation::block(BlockReason::ConditionalCriteriaNotMet {
                    prerequisite: rule.requires_success_of.clone(),
                    missing: Vec::new(),
                });
            };

            let text = payload_text(payload);
            let missing: Vec<String> = rule
                .success_criteria
                .iter()
                .filter(|criterion| !text.contains(criterion.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Evaluation::block(BlockReason::ConditionalCriteriaNotMet {
                    prerequisite: rule.requires_success_of.clone(),
                    missing,
                });
            }
        }

        for other in self.registry.parallel_restrictions(tool) {
            if session.is_in_flight(other) {
                return Evaluation::block(BlockReason::ParallelConflict {
                    conflicting: other.clone(),
                });
            }
        }

        Evaluation::allow()
    }

    /// Known tools that have not succeeded yet and would be allowed right now
    pub fn allowed_tools(&self, session: &SessionState) -> Vec<ToolName> {
        self.registry
            .tools()
            .filter(|tool| !session.has_succeeded(tool))
            .filter(|tool| self.evaluate(session, tool).verdict.is_allow())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_util::{MonotonicInstant, SessionId};

    fn registry() -> Arc<PolicyRegistry> {
        Arc::new(
            PolicyRegistry::builder()
                .tools([
                    "validate_data",
                    "process_data",
                    "backup_data",
                    "send_notification",
                    "require_approval",
                ])
                .depends_on("process_data", "validate_data")
                .depends_on("send_notification", "process_data")
                .conditional("process_data", "validate_data", ["valid", "validated_data"])
                .restrict_parallel("process_data", "backup_data")
                .require_approval("require_approval")
                .build()
                .unwrap(),
        )
    }

    fn session() -> SessionState {
        SessionState::new(SessionId::new("s1"), warden_util::now())
    }

    fn complete(state: &mut SessionState, tool: &str, outcome: CallOutcome) {
        let now = MonotonicInstant::now();
        let call = state.begin_call(ToolName::new(tool), json!({}), warden_util::now(), now);
        state.finish_call(call, outcome, warden_util::now(), now);
    }

    fn succeed(state: &mut SessionState, tool: &str, payload: Value) {
        complete(state, tool, CallOutcome::Success { payload });
    }

    #[test]
    fn unruled_tool_is_allowed() {
        let engine = PolicyEngine::new(registry());
        let eval = engine.evaluate(&session(), &ToolName::new("validate_data"));
        assert_eq!(eval, Evaluation::allow());

        // Unknown tools have no rules either
        let eval = engine.evaluate(&session(), &ToolName::new("unlisted_tool"));
        assert!(eval.verdict.is_allow());
    }

    #[test]
    fn missing_dependency_blocks() {
        let engine = PolicyEngine::new(registry());
        let eval = engine.evaluate(&session(), &ToolName::new("process_data"));
        assert_eq!(
            eval.verdict,
            Verdict::Block(BlockReason::MissingDependency {
                dependency: ToolName::new("validate_data"),
            })
        );
    }

    #[test]
    fn failed_dependency_still_blocks() {
        let engine = PolicyEngine::new(registry());
        let mut state = session();
        complete(
            &mut state,
            "validate_data",
            CallOutcome::Failure {
                failure: warden_api::CallFailure::Executor {
                    message: "bad input".into(),
                },
            },
        );

        let eval = engine.evaluate(&state, &ToolName::new("process_data"));
        assert!(matches!(
            eval.verdict,
            Verdict::Block(BlockReason::MissingDependency { .. })
        ));
    }

    #[test]
    fn conditional_criteria_report_missing_substrings() {
        let engine = PolicyEngine::new(registry());
        let mut state = session();
        succeed(&mut state, "validate_data", json!({"valid": true}));

        let eval = engine.evaluate(&state, &ToolName::new("process_data"));
        assert_eq!(
            eval.verdict,
            Verdict::Block(BlockReason::ConditionalCriteriaNotMet {
                prerequisite: ToolName::new("validate_data"),
                missing: vec!["validated_data".into()],
            })
        );

        succeed(
            &mut state,
            "validate_data",
            json!({"valid": true, "validated_data": {"id": 1}}),
        );
        let eval = engine.evaluate(&state, &ToolName::new("process_data"));
        assert!(eval.verdict.is_allow());
    }

    #[test]
    fn string_payload_matches_raw_contents() {
        assert_eq!(payload_text(&json!("valid \"x\"")), "valid \"x\"");
        assert_eq!(payload_text(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn parallel_restriction_is_directional() {
        let engine = PolicyEngine::new(registry());
        let mut state = session();
        succeed(
            &mut state,
            "validate_data",
            json!({"valid": true, "validated_data": []}),
        );

        let backup = ToolName::new("backup_data");
        let _call = state.begin_call(
            backup.clone(),
            json!({}),
            warden_util::now(),
            MonotonicInstant::now(),
        );
        let eval = engine.evaluate(&state, &ToolName::new("process_data"));
        assert_eq!(
            eval.verdict,
            Verdict::Block(BlockReason::ParallelConflict { conflicting: backup })
        );

        let mut state = session();
        let _call = state.begin_call(
            ToolName::new("process_data"),
            json!({}),
            warden_util::now(),
            MonotonicInstant::now(),
        );
        let eval = engine.evaluate(&state, &ToolName::new("backup_data"));
        assert!(eval.verdict.is_allow());
    }

    #[test]
    fn approval_gate_comes_first_and_requests_pending() {
        let engine = PolicyEngine::new(registry());
        let mut state = session();
        let tool = ToolName::new("require_approval");

        let eval = engine.evaluate(&state, &tool);
        assert_eq!(eval.verdict, Verdict::PendingApproval);
        assert_eq!(eval.delta, Some(StateDelta::MarkPending(tool.clone())));

        state.grant(&tool);
        for _ in 0..3 {
            let eval = engine.evaluate(&state, &tool);
            assert!(eval.verdict.is_allow());
            assert_eq!(eval.delta, None);
        }
    }

    #[test]
    fn allowed_tools_excludes_succeeded_and_blocked() {
        let engine = PolicyEngine::new(registry());
        let mut state = session();

        let allowed = engine.allowed_tools(&state);
        assert_eq!(
            allowed,
            vec![ToolName::new("backup_data"), ToolName::new("validate_data")]
        );

        succeed(
            &mut state,
            "validate_data",
            json!({"valid": true, "validated_data": []}),
        );
        let allowed = engine.allowed_tools(&state);
        assert_eq!(
            allowed,
            vec![ToolName::new("backup_data"), ToolName::new("process_data")]
        );
    }
}
