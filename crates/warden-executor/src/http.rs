//! HTTP executor: forwards calls to `POST {endpoint}/call_tool`

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use warden_util::ToolName;

use crate::{ExecutorError, ExecutorResult, ToolExecutor, ToolResult};

#[derive(Serialize)]
struct CallToolRequest<'a> {
    tool_name: &'a str,
    arguments: &'a Value,
}

/// Forwards each call to the endpoint configured for its tool
pub struct HttpExecutor {
    client: Client,
    endpoints: HashMap<ToolName, String>,
}

impl HttpExecutor {
    pub fn new(endpoints: HashMap<ToolName, String>, connect_timeout: Duration) -> ExecutorResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        Ok(Self { client, endpoints })
    }

    fn url_for(&self, tool: &ToolName) -> ExecutorResult<String> {
        let base = self
            .endpoints
            .get(tool)
            .ok_or_else(|| ExecutorError::UnknownTool(tool.clone()))?;
        Ok(format!("{}/call_tool", base.trim_end_matches('/')))
    }
}

#[async_trait]
impl ToolExecutor for HttpExecutor {
    async fn invoke(&self, tool: &ToolName, arguments: &Value) -> ExecutorResult<ToolResult> {
        let url = self.url_for(tool)?;
        debug!(tool = %tool, url = %url, "Forwarding tool call");

        let response = self
            .client
            .post(&url)
            .json(&CallToolRequest {
                tool_name: tool.as_str(),
                arguments,
            })
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!(tool = %tool, status = %status, "Executor returned error status");
            return Err(ExecutorError::Status(status.as_u16()));
        }

        response
            .json::<ToolResult>()
            .await
            .map_err(|e| ExecutorError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> HttpExecutor {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            ToolName::new("validate_data"),
            "http://localhost:8001/".to_string(),
        );
        HttpExecutor::new(endpoints, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn url_joins_call_tool() {
        let url = executor().url_for(&ToolName::new("validate_data")).unwrap();
        assert_eq!(url, "http://localhost:8001/call_tool");
    }

    #[tokio::test]
    async fn tool_without_endpoint() {
        let result = executor()
            .invoke(&ToolName::new("backup_data"), &Value::Null)
            .await;
        assert!(matches!(result, Err(ExecutorError::UnknownTool(_))));
    }
}
