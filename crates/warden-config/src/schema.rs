//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// The known tool universe
    #[serde(default)]
    pub tools: Vec<RawTool>,

    /// Ordering, exclusion, conditional and approval rules
    #[serde(default)]
    pub policies: RawPolicies,

    /// Workflow templates
    #[serde(default)]
    pub templates: Vec<RawTemplate>,

    /// Audit alert thresholds
    #[serde(default)]
    pub audit: RawAuditConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the audit database
    pub data_dir: Option<PathBuf>,

    /// Executor call timeout in seconds (0 = no timeout, default 30)
    pub executor_timeout_seconds: Option<u64>,
}

/// Tool declaration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTool {
    /// Unique tool name
    pub name: String,

    /// Human-readable description
    pub description: Option<String>,

    /// Base URL of the downstream executor for this tool
    pub endpoint: Option<String>,
}

/// Policy tables, keyed by tool name
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPolicies {
    /// tool -> tools that must have succeeded first
    #[serde(default)]
    pub sequential_dependencies: BTreeMap<String, Vec<String>>,

    /// tool -> tools that must not be in flight when it starts
    #[serde(default)]
    pub parallel_restrictions: BTreeMap<String, Vec<String>>,

    /// tool -> payload predicate on a prerequisite
    #[serde(default)]
    pub conditional_execution: BTreeMap<String, RawConditionalRule>,

    /// Tools gated behind an external approval
    #[serde(default)]
    pub approval_required: Vec<String>,
}

/// Conditional execution rule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConditionalRule {
    /// Prerequisite tool that must have succeeded
    pub requires_success: String,

    /// Substrings that must all appear in the prerequisite's payload
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Workflow template
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTemplate {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub steps: Vec<RawStep>,
}

/// Workflow template step
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawStep {
    pub tool: String,

    /// Other step tools in the same template that come first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Advisory flag; enforcement comes from `policies.approval_required`
    #[serde(default)]
    pub approval_required: bool,

    pub timeout_seconds: Option<u64>,
}

/// Audit alert configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAuditConfig {
    /// Window for aggregate metrics in seconds (default 3600)
    pub window_seconds: Option<u64>,

    /// Alert when violations per hour exceed this value
    pub violations_per_hour: Option<f64>,

    /// Alert when failures per hour exceed this value
    pub failures_per_hour: Option<f64>,
}
