//! Workflow templates: named, ordered step lists with intra-template dependencies

use crate::policy::PolicyRegistry;
use crate::schema::RawTemplate;
use crate::validation::validate_templates;
use crate::{ConfigError, ConfigResult};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Duration;
use warden_api::TemplateProgress;
use warden_util::ToolName;

/// One step of a workflow template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    pub tool: ToolName,
    /// Steps of the same template that must have succeeded first
    pub dependencies: BTreeSet<ToolName>,
    /// Advisory; the policy registry decides whether approval is enforced
    pub approval_required: bool,
    pub timeout: Option<Duration>,
}

impl WorkflowStep {
    pub fn new(tool: impl Into<ToolName>) -> Self {
        Self {
            tool: tool.into(),
            dependencies: BTreeSet::new(),
            approval_required: false,
            timeout: None,
        }
    }

    pub fn after(mut self, dependency: impl Into<ToolName>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.approval_required = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A named workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTemplate {
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub(crate) fn from_raw(raw: RawTemplate) -> Self {
        let steps = raw
            .steps
            .into_iter()
            .map(|s| WorkflowStep {
                tool: ToolName::new(s.tool),
                dependencies: s.dependencies.into_iter().map(ToolName::new).collect(),
                approval_required: s.approval_required,
                timeout: s.timeout_seconds.map(Duration::from_secs),
            })
            .collect();

        Self {
            name: raw.name,
            description: raw.description,
            steps,
        }
    }

    pub fn get_step(&self, tool: &ToolName) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| &s.tool == tool)
    }

    /// Step tools ordered so every step follows its dependencies.
    ///
    /// Among steps that are ready at the same time, declared order wins.
    pub fn execution_order(&self) -> Vec<ToolName> {
        let mut pending: Vec<&WorkflowStep> = self.steps.iter().collect();
        let mut placed: HashSet<&ToolName> = HashSet::new();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(pos) = pending
            .iter()
            .position(|s| s.dependencies.iter().all(|d| placed.contains(d)))
        {
            let step = pending.remove(pos);
            placed.insert(&step.tool);
            order.push(step.tool.clone());
        }

        debug_assert!(pending.is_empty(), "template '{}' has a cycle", self.name);
        order
    }

    /// Progress given the tools that succeeded and failed in a session
    pub fn progress(
        &self,
        succeeded: &BTreeSet<ToolName>,
        failed: &BTreeSet<ToolName>,
    ) -> TemplateProgress {
        let total_steps = self.steps.len();
        let completed_steps = self
            .steps
            .iter()
            .filter(|s| succeeded.contains(&s.tool))
            .count();
        let failed_steps = self
            .steps
            .iter()
            .filter(|s| !succeeded.contains(&s.tool) && failed.contains(&s.tool))
            .count();

        // Failed steps stay eligible; a retry is up to the caller
        let next_steps = self
            .execution_order()
            .into_iter()
            .filter(|tool| !succeeded.contains(tool))
            .filter(|tool| {
                self.get_step(tool)
                    .is_some_and(|s| s.dependencies.iter().all(|d| succeeded.contains(d)))
            })
            .collect();

        let progress_percent = if total_steps == 0 {
            100.0
        } else {
            completed_steps as f64 * 100.0 / total_steps as f64
        };

        TemplateProgress {
            template: self.name.clone(),
            total_steps,
            completed_steps,
            failed_steps,
            remaining_steps: total_steps - completed_steps - failed_steps,
            progress_percent,
            is_complete: completed_steps == total_steps,
            has_failures: failed_steps > 0,
            next_steps,
        }
    }
}

/// A template rule that the policy registry does not enforce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnenforcedRule {
    /// Template orders `step` after `dependency`, the registry does not
    Dependency {
        template: String,
        step: ToolName,
        dependency: ToolName,
    },
    /// Template marks `step` as needing approval, the registry does not
    Approval { template: String, step: ToolName },
}

impl fmt::Display for UnenforcedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnenforcedRule::Dependency {
                template,
                step,
                dependency,
            } => write!(
                f,
                "template '{}': {} after {} is not a sequential dependency",
                template, step, dependency
            ),
            UnenforcedRule::Approval { template, step } => write!(
                f,
                "template '{}': {} is marked for approval but not gated",
                template, step
            ),
        }
    }
}

/// Validated set of workflow templates, in declared order
#[derive(Debug, Clone, Default)]
pub struct WorkflowTemplateRegistry {
    templates: Vec<WorkflowTemplate>,
}

impl WorkflowTemplateRegistry {
    /// Validate templates against the tools known to `policy`
    pub fn new(policy: &PolicyRegistry, templates: Vec<WorkflowTemplate>) -> ConfigResult<Self> {
        let known: HashSet<&str> = policy.tools().map(ToolName::as_str).collect();
        let errors = validate_templates(&known, &templates);
        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed { errors });
        }
        Ok(Self { templates })
    }

    pub(crate) fn from_validated(templates: Vec<WorkflowTemplate>) -> Self {
        Self { templates }
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn list(&self) -> &[WorkflowTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template dependencies and approval flags the policy registry does not back.
    ///
    /// The orchestrator only enforces registry rules, so these are advisory.
    pub fn unenforced_rules(&self, policy: &PolicyRegistry) -> Vec<UnenforcedRule> {
        let mut rules = Vec::new();
        for template in &self.templates {
            for step in &template.steps {
                for dep in &step.dependencies {
                    if !policy.dependencies(&step.tool).contains(dep) {
                        rules.push(UnenforcedRule::Dependency {
                            template: template.name.clone(),
                            step: step.tool.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
                if step.approval_required && !policy.requires_approval(&step.tool) {
                    rules.push(UnenforcedRule::Approval {
                        template: template.name.clone(),
                        step: step.tool.clone(),
                    });
                }
            }
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PolicyRegistry {
        PolicyRegistry::builder()
            .tools([
                "validate_data",
                "process_data",
                "backup_data",
                "send_notification",
            ])
            .depends_on("process_data", "validate_data")
            .build()
            .unwrap()
    }

    fn pipeline() -> WorkflowTemplate {
        WorkflowTemplate::new("data_pipeline", "ETL")
            .step(WorkflowStep::new("send_notification").after("process_data"))
            .step(WorkflowStep::new("validate_data"))
            .step(WorkflowStep::new("backup_data"))
            .step(WorkflowStep::new("process_data").after("validate_data"))
    }

    #[test]
    fn execution_order_respects_dependencies_then_declaration() {
        let order = pipeline().execution_order();
        let names: Vec<&str> = order.iter().map(ToolName::as_str).collect();
        assert_eq!(
            names,
            vec![
                "validate_data",
                "backup_data",
                "process_data",
                "send_notification"
            ]
        );
    }

    #[test]
    fn progress_tracks_succeeded_and_failed() {
        let template = pipeline();
        let succeeded: BTreeSet<ToolName> = [ToolName::new("validate_data")].into();
        let failed: BTreeSet<ToolName> = [ToolName::new("backup_data")].into();

        let progress = template.progress(&succeeded, &failed);
        assert_eq!(progress.total_steps, 4);
        assert_eq!(progress.completed_steps, 1);
        assert_eq!(progress.failed_steps, 1);
        assert_eq!(progress.remaining_steps, 2);
        assert_eq!(progress.progress_percent, 25.0);
        assert!(!progress.is_complete);
        assert!(progress.has_failures);
        assert_eq!(
            progress.next_steps,
            vec![ToolName::new("backup_data"), ToolName::new("process_data")]
        );
    }

    #[test]
    fn registry_rejects_unknown_tools() {
        let template =
            WorkflowTemplate::new("bad", "").step(WorkflowStep::new("launch_missiles"));
        let result = WorkflowTemplateRegistry::new(&policy(), vec![template]);
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn registry_lookup() {
        let registry = WorkflowTemplateRegistry::new(&policy(), vec![pipeline()]).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("data_pipeline").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.list()[0].name, "data_pipeline");
    }

    #[test]
    fn unenforced_rules_are_reported() {
        let template = WorkflowTemplate::new("notify", "")
            .step(WorkflowStep::new("validate_data"))
            .step(WorkflowStep::new("process_data").after("validate_data"))
            .step(
                WorkflowStep::new("send_notification")
                    .after("process_data")
                    .with_approval(),
            );
        let policy = policy();
        let registry = WorkflowTemplateRegistry::new(&policy, vec![template]).unwrap();

        let rules = registry.unenforced_rules(&policy);
        assert_eq!(rules.len(), 2);
        assert!(rules.contains(&UnenforcedRule::Dependency {
            template: "notify".into(),
            step: ToolName::new("send_notification"),
            dependency: ToolName::new("process_data"),
        }));
        assert!(rules.contains(&UnenforcedRule::Approval {
            template: "notify".into(),
            step: ToolName::new("send_notification"),
        }));
    }
}
