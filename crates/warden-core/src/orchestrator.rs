//! Orchestrator: evaluate, dispatch, record

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_api::{
    AggregateMetrics, CallFailure, CallOutcome, CallResponse, ComplianceReport, SessionStatus,
    StepReport, TemplateProgress, TemplateRun, ToolCallRecord, Verdict,
};
use warden_config::{Config, PolicyRegistry, WorkflowTemplate, WorkflowTemplateRegistry};
use warden_executor::ToolExecutor;
use warden_store::AuditEventKind;
use warden_util::{MonotonicInstant, SessionId, ToolName, WardenError};

use crate::session::lock;
use crate::{AuditMonitor, InFlightCall, PolicyEngine, SessionState};

type SharedSession = Arc<Mutex<SessionState>>;

/// Entry point for governed tool calls
pub struct Orchestrator {
    engine: PolicyEngine,
    templates: Arc<WorkflowTemplateRegistry>,
    executor: Arc<dyn ToolExecutor>,
    audit: Arc<AuditMonitor>,
    sessions: Mutex<HashMap<SessionId, SharedSession>>,
    executor_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        policy: Arc<PolicyRegistry>,
        templates: Arc<WorkflowTemplateRegistry>,
        executor: Arc<dyn ToolExecutor>,
        audit: Arc<AuditMonitor>,
    ) -> Self {
        info!(
            tools = policy.tools().count(),
            templates = templates.len(),
            "Orchestrator initialized"
        );

        Self {
            engine: PolicyEngine::new(policy),
            templates,
            executor,
            audit,
            sessions: Mutex::new(HashMap::new()),
            executor_timeout: None,
        }
    }

    /// Build from a loaded configuration
    pub fn from_config(config: Config, executor: Arc<dyn ToolExecutor>, audit: Arc<AuditMonitor>) -> Self {
        Self::new(
            Arc::new(config.policy),
            Arc::new(config.templates),
            executor,
            audit,
        )
        .with_executor_timeout(config.service.executor_timeout)
    }

    /// Bound every executor call. `None` waits indefinitely.
    pub fn with_executor_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.executor_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &PolicyRegistry {
        self.engine.registry()
    }

    pub fn audit(&self) -> &Arc<AuditMonitor> {
        &self.audit
    }

    /// Get or create a session. Creation is audited against `tool`, the tool
    /// whose request or approval opened it.
    fn session(&self, session_id: &SessionId, tool: &ToolName) -> SharedSession {
        let mut created = false;
        let session = lock(&self.sessions)
            .entry(session_id.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(SessionState::new(
                    session_id.clone(),
                    warden_util::now(),
                )))
            })
            .clone();

        if created {
            info!(session_id = %session_id, tool = %tool, "Session created");
            self.audit
                .record(session_id, tool, AuditEventKind::SessionStarted);
        }
        session
    }

    fn existing_session(&self, session_id: &SessionId) -> Option<SharedSession> {
        lock(&self.sessions).get(session_id).cloned()
    }

    /// Evaluate `tool` for the session and, if allowed, run it.
    ///
    /// Every branch is audited. Dropping the returned future while the
    /// executor is running records the call as cancelled.
    pub async fn evaluate_and_maybe_execute(
        &self,
        session_id: &SessionId,
        tool: &ToolName,
        arguments: Value,
    ) -> CallResponse {
        self.dispatch(session_id, tool, arguments, self.executor_timeout)
            .await
    }

    async fn dispatch(
        &self,
        session_id: &SessionId,
        tool: &ToolName,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> CallResponse {
        let session = self.session(session_id, tool);

        let call = {
            let mut state = lock(&session);
            state.note_attempt();
            self.audit.record(
                session_id,
                tool,
                AuditEventKind::Attempt {
                    arguments: arguments.clone(),
                },
            );

            let evaluation = self.engine.evaluate(&state, tool);
            match evaluation.verdict {
                Verdict::Block(reason) => {
                    warn!(
                        session_id = %session_id,
                        tool = %tool,
                        rule = %reason.kind(),
                        reason = %reason,
                        "Tool call blocked"
                    );
                    self.audit.record(
                        session_id,
                        tool,
                        AuditEventKind::Violation {
                            rule: reason.kind(),
                            detail: reason.to_string(),
                        },
                    );
                    return CallResponse::Blocked { reason };
                }
                Verdict::PendingApproval => {
                    if let Some(delta) = evaluation.delta {
                        state.apply(delta);
                    }
                    info!(session_id = %session_id, tool = %tool, "Approval requested");
                    self.audit
                        .record(session_id, tool, AuditEventKind::ApprovalRequested);
                    return CallResponse::PendingApproval { tool: tool.clone() };
                }
                Verdict::Allow => state.begin_call(
                    tool.clone(),
                    arguments.clone(),
                    warden_util::now(),
                    MonotonicInstant::now(),
                ),
            }
        };

        debug!(session_id = %session_id, tool = %tool, call_id = %call.call_id, "Dispatching tool call");
        let guard = CallGuard {
            session,
            session_id: session_id.clone(),
            audit: self.audit.clone(),
            call,
            armed: true,
        };

        let invocation = self.executor.invoke(tool, &arguments);
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, invocation)
                .await
                .map_err(|_| limit),
            None => Ok(invocation.await),
        };

        let outcome = match result {
            Ok(Ok(reply)) if reply.success => CallOutcome::Success {
                payload: reply.payload,
            },
            Ok(Ok(reply)) => CallOutcome::Failure {
                failure: CallFailure::Executor {
                    message: reply
                        .error
                        .unwrap_or_else(|| "tool reported failure".to_string()),
                },
            },
            Ok(Err(e)) => CallOutcome::Failure {
                failure: CallFailure::Transport {
                    message: e.to_string(),
                },
            },
            Err(limit) => CallOutcome::Failure {
                failure: CallFailure::TimedOut {
                    after_ms: warden_util::duration_millis(limit),
                },
            },
        };

        let record = guard.complete(outcome);
        CallResponse::Allowed {
            call_id: record.call_id,
            duration_ms: record.duration_ms.unwrap_or_default(),
            outcome: record.outcome.unwrap_or(CallOutcome::Failure {
                failure: CallFailure::Cancelled,
            }),
        }
    }

    /// Approve a gated tool for the session. Allowed before any request.
    pub fn grant_approval(&self, session_id: &SessionId, tool: &ToolName) -> warden_util::Result<()> {
        self.require_gate(tool)?;
        let session = self.session(session_id, tool);
        let mut state = lock(&session);
        let newly = state.grant(tool);
        info!(session_id = %session_id, tool = %tool, newly, "Approval granted");
        self.audit
            .record(session_id, tool, AuditEventKind::ApprovalGranted);
        Ok(())
    }

    /// Reject a pending request. The tool stays gated; a later call asks again.
    pub fn deny_approval(&self, session_id: &SessionId, tool: &ToolName) -> warden_util::Result<()> {
        self.require_gate(tool)?;
        let session = self.session(session_id, tool);
        let mut state = lock(&session);
        state.deny(tool);
        info!(session_id = %session_id, tool = %tool, "Approval denied");
        self.audit
            .record(session_id, tool, AuditEventKind::ApprovalDenied);
        Ok(())
    }

    /// Withdraw a granted approval so the next call is gated again
    pub fn revoke_approval(&self, session_id: &SessionId, tool: &ToolName) -> warden_util::Result<()> {
        self.require_gate(tool)?;
        let session = self.session(session_id, tool);
        let mut state = lock(&session);
        let was_granted = state.revoke(tool);
        info!(session_id = %session_id, tool = %tool, was_granted, "Approval revoked");
        self.audit
            .record(session_id, tool, AuditEventKind::ApprovalRevoked);
        Ok(())
    }

    fn require_gate(&self, tool: &ToolName) -> warden_util::Result<()> {
        if self.policy().requires_approval(tool) {
            Ok(())
        } else {
            Err(WardenError::ApprovalNotRequired(tool.clone()))
        }
    }

    pub fn session_status(&self, session_id: &SessionId) -> warden_util::Result<SessionStatus> {
        let session = self
            .existing_session(session_id)
            .ok_or_else(|| WardenError::SessionNotFound(session_id.clone()))?;
        let status = lock(&session).snapshot();
        Ok(status)
    }

    /// Known session ids, sorted
    pub fn list_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = lock(&self.sessions).keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub fn list_templates(&self) -> &[WorkflowTemplate] {
        self.templates.list()
    }

    pub fn compliance_report(&self, session_id: &SessionId) -> warden_util::Result<ComplianceReport> {
        if self.existing_session(session_id).is_none() {
            return Err(WardenError::SessionNotFound(session_id.clone()));
        }
        Ok(self.audit.compliance_report(session_id))
    }

    /// Metrics over the configured audit window
    pub fn aggregate_metrics(&self) -> AggregateMetrics {
        self.audit.aggregate_metrics(self.audit.thresholds().window)
    }

    /// Tools that would be allowed right now and have not succeeded yet.
    /// An unknown session is treated as empty.
    pub fn next_allowed_tools(&self, session_id: &SessionId) -> Vec<ToolName> {
        match self.existing_session(session_id) {
            Some(session) => {
                let state = lock(&session);
                self.engine.allowed_tools(&state)
            }
            None => self.engine.allowed_tools(&SessionState::new(
                session_id.clone(),
                warden_util::now(),
            )),
        }
    }

    pub fn template_progress(
        &self,
        session_id: &SessionId,
        template: &str,
    ) -> warden_util::Result<TemplateProgress> {
        let template = self
            .templates
            .get(template)
            .ok_or_else(|| WardenError::TemplateNotFound(template.to_string()))?;

        let (succeeded, failed) = match self.existing_session(session_id) {
            Some(session) => {
                let state = lock(&session);
                (state.succeeded_tools(), state.failed_tools())
            }
            None => Default::default(),
        };
        Ok(template.progress(&succeeded, &failed))
    }

    /// Walk a template in execution order with the same arguments for every step.
    ///
    /// Steps that already succeeded in the session are skipped. The walk stops
    /// at the first step that is blocked, pending approval, or fails.
    pub async fn execute_template(
        &self,
        session_id: &SessionId,
        template: &str,
        arguments: Value,
    ) -> warden_util::Result<TemplateRun> {
        let template = self
            .templates
            .get(template)
            .ok_or_else(|| WardenError::TemplateNotFound(template.to_string()))?;

        info!(session_id = %session_id, template = %template.name, "Executing template");

        let mut steps = Vec::new();
        let mut stopped_at = None;

        for tool in template.execution_order() {
            let already_succeeded = match self.existing_session(session_id) {
                Some(session) => {
                    let state = lock(&session);
                    state.has_succeeded(&tool)
                }
                None => false,
            };
            if already_succeeded {
                debug!(session_id = %session_id, tool = %tool, "Step already succeeded");
                steps.push(StepReport { tool, response: None });
                continue;
            }

            let timeout = template
                .get_step(&tool)
                .and_then(|s| s.timeout)
                .or(self.executor_timeout);
            let response = self
                .dispatch(session_id, &tool, arguments.clone(), timeout)
                .await;
            let succeeded = response.is_success();
            steps.push(StepReport {
                tool: tool.clone(),
                response: Some(response),
            });

            if !succeeded {
                info!(session_id = %session_id, template = %template.name, tool = %tool, "Template stopped");
                stopped_at = Some(tool);
                break;
            }
        }

        let completed = stopped_at.is_none();
        if completed {
            info!(session_id = %session_id, template = %template.name, "Template completed");
        }

        Ok(TemplateRun {
            template: template.name.clone(),
            session_id: session_id.clone(),
            steps,
            stopped_at,
            completed,
        })
    }
}

/// Finishes an in-flight call exactly once.
///
/// If dropped before `complete` (the caller abandoned the future), the call
/// is stored as cancelled so the tool does not stay in flight.
struct CallGuard {
    session: SharedSession,
    session_id: SessionId,
    audit: Arc<AuditMonitor>,
    call: InFlightCall,
    armed: bool,
}

impl CallGuard {
    fn complete(mut self, outcome: CallOutcome) -> ToolCallRecord {
        self.armed = false;
        self.finish(outcome)
    }

    fn finish(&self, outcome: CallOutcome) -> ToolCallRecord {
        let mut state = lock(&self.session);
        let record = state.finish_call(
            self.call.clone(),
            outcome,
            warden_util::now(),
            MonotonicInstant::now(),
        );

        let failure = record
            .outcome
            .as_ref()
            .and_then(CallOutcome::failure)
            .map(ToString::to_string);
        let success = record.is_success();
        let duration_ms = record.duration_ms.unwrap_or_default();

        if let Some(error) = &failure {
            warn!(
                session_id = %self.session_id,
                tool = %record.tool,
                error = %error,
                duration_ms,
                "Tool call failed"
            );
        } else {
            debug!(session_id = %self.session_id, tool = %record.tool, duration_ms, "Tool call succeeded");
        }

        self.audit.record(
            &self.session_id,
            &record.tool,
            AuditEventKind::Completion {
                call_id: record.call_id,
                success,
                duration_ms,
                error: failure,
            },
        );
        record
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            self.finish(CallOutcome::Failure {
                failure: CallFailure::Cancelled,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_config::{AuditThresholds, WorkflowStep};
    use warden_executor::MockExecutor;

    fn orchestrator(executor: Arc<MockExecutor>) -> Orchestrator {
        let policy = PolicyRegistry::builder()
            .tools(["validate_data", "process_data", "backup_data", "require_approval"])
            .depends_on("process_data", "validate_data")
            .restrict_parallel("process_data", "backup_data")
            .require_approval("require_approval")
            .build()
            .unwrap();
        let template = WorkflowTemplate::new("pipeline", "")
            .step(WorkflowStep::new("validate_data"))
            .step(WorkflowStep::new("process_data").after("validate_data"))
            .step(WorkflowStep::new("backup_data").after("process_data"));
        let templates = WorkflowTemplateRegistry::new(&policy, vec![template]).unwrap();

        Orchestrator::new(
            Arc::new(policy),
            Arc::new(templates),
            executor,
            Arc::new(AuditMonitor::new(AuditThresholds::default())),
        )
    }

    #[tokio::test]
    async fn blocked_call_is_audited_and_not_dispatched() {
        let executor = Arc::new(MockExecutor::new());
        let orch = orchestrator(executor.clone());
        let s = SessionId::new("s1");
        let tool = ToolName::new("process_data");

        let response = orch.evaluate_and_maybe_execute(&s, &tool, json!({})).await;
        assert!(response.block_reason().is_some());
        assert_eq!(executor.call_count(&tool), 0);

        let kinds: Vec<&str> = orch
            .audit()
            .events(&s)
            .iter()
            .map(|e| e.kind.name())
            .collect();
        assert_eq!(kinds, vec!["session_started", "attempt", "violation"]);
        assert_eq!(orch.session_status(&s).unwrap().total_calls, 1);
    }

    #[tokio::test]
    async fn session_start_is_audited_once() {
        let executor = Arc::new(MockExecutor::new());
        let orch = orchestrator(executor);
        let s = SessionId::new("s1");
        let gated = ToolName::new("require_approval");

        orch.grant_approval(&s, &gated).unwrap();
        orch.evaluate_and_maybe_execute(&s, &ToolName::new("validate_data"), json!({}))
            .await;

        let started: Vec<_> = orch
            .audit()
            .events(&s)
            .into_iter()
            .filter(|e| e.kind == AuditEventKind::SessionStarted)
            .collect();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].tool, gated);
        assert_eq!(orch.audit().events(&s)[0].kind, AuditEventKind::SessionStarted);
    }

    #[tokio::test]
    async fn executor_failure_is_recorded_and_retry_allowed() {
        let executor = Arc::new(MockExecutor::new());
        executor.fail_with("validate_data", "schema mismatch");
        let orch = orchestrator(executor.clone());
        let s = SessionId::new("s1");
        let tool = ToolName::new("validate_data");

        let response = orch.evaluate_and_maybe_execute(&s, &tool, json!({})).await;
        assert!(response.is_allowed());
        assert!(!response.is_success());

        executor.succeed_with("validate_data", json!({"valid": true}));
        let response = orch.evaluate_and_maybe_execute(&s, &tool, json!({})).await;
        assert!(response.is_success());

        let status = orch.session_status(&s).unwrap();
        assert!(status.succeeded_tools().contains(&tool));
        assert!(status.in_flight.is_empty());
    }

    #[tokio::test]
    async fn approval_operations_require_gated_tool() {
        let orch = orchestrator(Arc::new(MockExecutor::new()));
        let s = SessionId::new("s1");

        let result = orch.grant_approval(&s, &ToolName::new("validate_data"));
        assert!(matches!(result, Err(WardenError::ApprovalNotRequired(_))));

        let gated = ToolName::new("require_approval");
        let response = orch.evaluate_and_maybe_execute(&s, &gated, json!({})).await;
        assert!(matches!(response, CallResponse::PendingApproval { .. }));
        assert!(orch.session_status(&s).unwrap().pending_approvals.contains(&gated));

        orch.deny_approval(&s, &gated).unwrap();
        let status = orch.session_status(&s).unwrap();
        assert!(status.pending_approvals.is_empty());
        assert!(status.denied_approvals.contains(&gated));

        // Denial is not final
        let response = orch.evaluate_and_maybe_execute(&s, &gated, json!({})).await;
        assert!(matches!(response, CallResponse::PendingApproval { .. }));

        orch.grant_approval(&s, &gated).unwrap();
        let response = orch.evaluate_and_maybe_execute(&s, &gated, json!({})).await;
        assert!(response.is_success());

        orch.revoke_approval(&s, &gated).unwrap();
        let response = orch.evaluate_and_maybe_execute(&s, &gated, json!({})).await;
        assert!(matches!(response, CallResponse::PendingApproval { .. }));
    }

    #[tokio::test]
    async fn timeout_records_failure_and_clears_in_flight() {
        let executor = Arc::new(MockExecutor::new());
        executor.hold(ToolName::new("backup_data"));
        let orch = orchestrator(executor).with_executor_timeout(Some(Duration::from_millis(20)));
        let s = SessionId::new("s1");

        let response = orch
            .evaluate_and_maybe_execute(&s, &ToolName::new("backup_data"), json!({}))
            .await;
        match response {
            CallResponse::Allowed { outcome, .. } => assert_eq!(
                outcome.failure(),
                Some(&CallFailure::TimedOut { after_ms: 20 })
            ),
            other => panic!("expected allowed, got {:?}", other),
        }
        assert!(orch.session_status(&s).unwrap().in_flight.is_empty());
    }

    #[tokio::test]
    async fn execute_template_skips_succeeded_steps() {
        let executor = Arc::new(MockExecutor::new());
        let orch = orchestrator(executor.clone());
        let s = SessionId::new("s1");

        orch.evaluate_and_maybe_execute(&s, &ToolName::new("validate_data"), json!({}))
            .await;

        let run = orch.execute_template(&s, "pipeline", json!({"data": 1})).await.unwrap();
        assert!(run.completed);
        assert_eq!(run.steps.len(), 3);
        assert!(run.steps[0].response.is_none());
        assert_eq!(executor.call_count(&ToolName::new("validate_data")), 1);

        let progress = orch.template_progress(&s, "pipeline").unwrap();
        assert!(progress.is_complete);

        let missing = orch.execute_template(&s, "nope", json!({})).await;
        assert!(matches!(missing, Err(WardenError::TemplateNotFound(_))));
    }

    #[tokio::test]
    async fn unknown_session_queries() {
        let orch = orchestrator(Arc::new(MockExecutor::new()));
        let s = SessionId::new("ghost");

        assert!(matches!(
            orch.session_status(&s),
            Err(WardenError::SessionNotFound(_))
        ));
        assert_eq!(
            orch.next_allowed_tools(&s),
            vec![ToolName::new("backup_data"), ToolName::new("validate_data")]
        );
        assert!(orch.list_sessions().is_empty());
    }
}
