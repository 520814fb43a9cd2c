//! Mock tool executor for testing

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use warden_util::ToolName;

use crate::{ExecutorError, ExecutorResult, ToolExecutor, ToolResult};

/// Canned behavior for one tool
#[derive(Debug, Clone)]
pub enum MockResponse {
    Success(Value),
    Failure(String),
    TransportError(String),
}

/// A call the mock received
#[derive(Debug, Clone)]
pub struct MockCall {
    pub tool: ToolName,
    pub arguments: Value,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock executor for unit/integration testing.
///
/// Tools without a configured response succeed with `{"status": "ok"}`.
/// A held tool blocks inside `invoke` until released, which keeps it in flight.
pub struct MockExecutor {
    responses: Mutex<HashMap<ToolName, MockResponse>>,
    delays: Mutex<HashMap<ToolName, Duration>>,
    gates: Mutex<HashMap<ToolName, Arc<Semaphore>>>,
    calls: Mutex<Vec<MockCall>>,

    /// Configure every call to fail at the transport level
    pub fail_transport: Arc<Mutex<bool>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_transport: Arc::new(Mutex::new(false)),
        }
    }

    pub fn respond(&self, tool: impl Into<ToolName>, response: MockResponse) {
        lock(&self.responses).insert(tool.into(), response);
    }

    pub fn succeed_with(&self, tool: impl Into<ToolName>, payload: Value) {
        self.respond(tool, MockResponse::Success(payload));
    }

    pub fn fail_with(&self, tool: impl Into<ToolName>, error: impl Into<String>) {
        self.respond(tool, MockResponse::Failure(error.into()));
    }

    /// Sleep this long before answering calls to `tool`
    pub fn set_delay(&self, tool: impl Into<ToolName>, delay: Duration) {
        lock(&self.delays).insert(tool.into(), delay);
    }

    /// Block calls to `tool` until `release` is called
    pub fn hold(&self, tool: impl Into<ToolName>) {
        lock(&self.gates).insert(tool.into(), Arc::new(Semaphore::new(0)));
    }

    /// Let one held call to `tool` proceed
    pub fn release(&self, tool: &ToolName) {
        if let Some(gate) = lock(&self.gates).get(tool) {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, tool: &ToolName) -> usize {
        lock(&self.calls).iter().filter(|c| &c.tool == tool).count()
    }

    /// Wait until `tool` has been invoked at least `n` times
    pub async fn wait_for_calls(&self, tool: &ToolName, n: usize) {
        while self.call_count(tool) < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for MockExecutor {
    async fn invoke(&self, tool: &ToolName, arguments: &Value) -> ExecutorResult<ToolResult> {
        lock(&self.calls).push(MockCall {
            tool: tool.clone(),
            arguments: arguments.clone(),
        });

        let gate = lock(&self.gates).get(tool).cloned();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ExecutorError::Transport(e.to_string()))?;
            permit.forget();
        }

        let delay = lock(&self.delays).get(tool).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *lock(&self.fail_transport) {
            return Err(ExecutorError::Transport("Mock transport failure".into()));
        }

        let response = lock(&self.responses).get(tool).cloned();
        match response {
            Some(MockResponse::Success(payload)) => Ok(ToolResult::success(payload)),
            Some(MockResponse::Failure(error)) => Ok(ToolResult::failure(error)),
            Some(MockResponse::TransportError(error)) => Err(ExecutorError::Transport(error)),
            None => Ok(ToolResult::success(json!({"status": "ok"}))),
        }
    }
}
