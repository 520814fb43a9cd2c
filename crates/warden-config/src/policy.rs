//! Validated policy structures

use crate::schema::{RawAuditConfig, RawConditionalRule, RawConfig, RawPolicies, RawServiceConfig, RawTool};
use crate::template::{WorkflowTemplate, WorkflowTemplateRegistry};
use crate::validation::{validate_policies, validate_tools};
use crate::{ConfigError, ConfigResult};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use warden_util::ToolName;

static NO_TOOLS: BTreeSet<ToolName> = BTreeSet::new();

/// Validated configuration ready for use by the orchestrator
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub tools: Vec<ToolSpec>,
    pub policy: PolicyRegistry,
    pub templates: WorkflowTemplateRegistry,
    pub audit: AuditThresholds,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let policy = PolicyRegistry::from_raw(&raw.tools, raw.policies);
        let templates = WorkflowTemplateRegistry::from_validated(
            raw.templates
                .into_iter()
                .map(WorkflowTemplate::from_raw)
                .collect(),
        );
        let tools = raw
            .tools
            .into_iter()
            .map(|t| ToolSpec {
                name: ToolName::new(t.name),
                description: t.description,
                endpoint: t.endpoint,
            })
            .collect();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            tools,
            policy,
            templates,
            audit: AuditThresholds::from_raw(raw.audit),
        }
    }

    /// Executor endpoint per tool, for tools that declare one
    pub fn endpoints(&self) -> HashMap<ToolName, String> {
        self.tools
            .iter()
            .filter_map(|t| t.endpoint.clone().map(|e| (t.name.clone(), e)))
            .collect()
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    /// Executor call timeout. None means unlimited.
    pub executor_timeout: Option<Duration>,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw
                .data_dir
                .unwrap_or_else(warden_util::default_data_dir),
            // 0 means unlimited, None means use the 30 second default
            executor_timeout: raw
                .executor_timeout_seconds
                .map(seconds_to_duration_or_unlimited)
                .unwrap_or(Some(DEFAULT_EXECUTOR_TIMEOUT)),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

const DEFAULT_EXECUTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// A declared tool
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: Option<String>,
    pub endpoint: Option<String>,
}

/// Alert thresholds for aggregate metrics
#[derive(Debug, Clone, PartialEq)]
pub struct AuditThresholds {
    pub window: Duration,
    pub violations_per_hour: Option<f64>,
    pub failures_per_hour: Option<f64>,
}

impl AuditThresholds {
    fn from_raw(raw: RawAuditConfig) -> Self {
        Self {
            window: Duration::from_secs(raw.window_seconds.unwrap_or(3600)),
            violations_per_hour: raw.violations_per_hour,
            failures_per_hour: raw.failures_per_hour,
        }
    }
}

impl Default for AuditThresholds {
    fn default() -> Self {
        Self::from_raw(RawAuditConfig::default())
    }
}

/// Payload predicate on a prerequisite tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalRule {
    pub requires_success_of: ToolName,
    /// Substrings that must all appear in the prerequisite's payload text
    pub success_criteria: Vec<String>,
}

/// Static rule tables consulted by the policy engine. Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    tools: BTreeSet<ToolName>,
    sequential_dependencies: HashMap<ToolName, BTreeSet<ToolName>>,
    parallel_restrictions: HashMap<ToolName, BTreeSet<ToolName>>,
    conditional_rules: HashMap<ToolName, ConditionalRule>,
    approval_required: BTreeSet<ToolName>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Convert from raw tables (after validation)
    pub fn from_raw(tools: &[RawTool], raw: RawPolicies) -> Self {
        fn to_sets(
            table: std::collections::BTreeMap<String, Vec<String>>,
        ) -> HashMap<ToolName, BTreeSet<ToolName>> {
            table
                .into_iter()
                .map(|(tool, others)| {
                    (
                        ToolName::new(tool),
                        others.into_iter().map(ToolName::new).collect(),
                    )
                })
                .collect()
        }

        Self {
            tools: tools.iter().map(|t| ToolName::new(t.name.clone())).collect(),
            sequential_dependencies: to_sets(raw.sequential_dependencies),
            parallel_restrictions: to_sets(raw.parallel_restrictions),
            conditional_rules: raw
                .conditional_execution
                .into_iter()
                .map(|(tool, rule)| {
                    (
                        ToolName::new(tool),
                        ConditionalRule {
                            requires_success_of: ToolName::new(rule.requires_success),
                            success_criteria: rule.success_criteria,
                        },
                    )
                })
                .collect(),
            approval_required: raw.approval_required.into_iter().map(ToolName::new).collect(),
        }
    }

    /// Every declared tool
    pub fn tools(&self) -> impl Iterator<Item = &ToolName> {
        self.tools.iter()
    }

    pub fn is_known(&self, tool: &ToolName) -> bool {
        self.tools.contains(tool)
    }

    /// Tools that must have succeeded before `tool` may run
    pub fn dependencies(&self, tool: &ToolName) -> &BTreeSet<ToolName> {
        self.sequential_dependencies.get(tool).unwrap_or(&NO_TOOLS)
    }

    /// Tools that must not be in flight when `tool` starts
    pub fn parallel_restrictions(&self, tool: &ToolName) -> &BTreeSet<ToolName> {
        self.parallel_restrictions.get(tool).unwrap_or(&NO_TOOLS)
    }

    pub fn conditional_rule(&self, tool: &ToolName) -> Option<&ConditionalRule> {
        self.conditional_rules.get(tool)
    }

    pub fn requires_approval(&self, tool: &ToolName) -> bool {
        self.approval_required.contains(tool)
    }
}

/// Programmatic construction of a [`PolicyRegistry`].
///
/// `build` applies the same validation as a TOML file.
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    tools: Vec<RawTool>,
    policies: RawPolicies,
}

impl PolicyRegistryBuilder {
    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(RawTool {
            name: name.into(),
            description: None,
            endpoint: None,
        });
        self
    }

    pub fn tools<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |b, name| b.tool(name))
    }

    /// `tool` may only run after `dependency` has succeeded
    pub fn depends_on(mut self, tool: impl Into<String>, dependency: impl Into<String>) -> Self {
        self.policies
            .sequential_dependencies
            .entry(tool.into())
            .or_default()
            .push(dependency.into());
        self
    }

    /// `tool` may not start while `other` is in flight
    pub fn restrict_parallel(mut self, tool: impl Into<String>, other: impl Into<String>) -> Self {
        self.policies
            .parallel_restrictions
            .entry(tool.into())
            .or_default()
            .push(other.into());
        self
    }

    /// `tool` requires `prerequisite` to have succeeded with a payload containing every criterion
    pub fn conditional<I, S>(
        mut self,
        tool: impl Into<String>,
        prerequisite: impl Into<String>,
        criteria: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies.conditional_execution.insert(
            tool.into(),
            RawConditionalRule {
                requires_success: prerequisite.into(),
                success_criteria: criteria.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn require_approval(mut self, tool: impl Into<String>) -> Self {
        self.policies.approval_required.push(tool.into());
        self
    }

    pub fn build(self) -> ConfigResult<PolicyRegistry> {
        let mut errors = Vec::new();
        let known = validate_tools(&self.tools, &mut errors);
        errors.extend(validate_policies(&known, &self.policies));
        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed { errors });
        }
        Ok(PolicyRegistry::from_raw(&self.tools, self.policies))
    }
}

fn seconds_to_duration_or_unlimited(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}
