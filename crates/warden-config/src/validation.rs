//! Configuration validation

use crate::schema::{RawAuditConfig, RawConfig, RawPolicies, RawTool};
use crate::template::WorkflowTemplate;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Tool name cannot be empty")]
    EmptyToolName,

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Tool '{tool}': endpoint '{endpoint}' must be an http(s) URL")]
    InvalidEndpoint { tool: String, endpoint: String },

    #[error("{context}: unknown tool '{tool}'")]
    UnknownTool { context: String, tool: String },

    #[error("{rule} for '{tool}' refers to the tool itself")]
    SelfReference { rule: &'static str, tool: String },

    #[error("Sequential dependency cycle: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Duplicate template: {0}")]
    DuplicateTemplate(String),

    #[error("Template '{template}': duplicate step '{tool}'")]
    DuplicateStep { template: String, tool: String },

    #[error("Template '{template}': step '{step}' depends on '{dependency}', which is not a step")]
    UnknownStepDependency {
        template: String,
        step: String,
        dependency: String,
    },

    #[error("Template '{template}': dependency cycle: {}", cycle.join(" -> "))]
    TemplateCycle { template: String, cycle: Vec<String> },

    #[error("Audit {name} must be a positive number, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Audit window_seconds must be greater than zero")]
    InvalidWindow,
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let known = validate_tools(&config.tools, &mut errors);
    errors.extend(validate_policies(&known, &config.policies));

    let templates: Vec<WorkflowTemplate> = config
        .templates
        .iter()
        .cloned()
        .map(WorkflowTemplate::from_raw)
        .collect();
    errors.extend(validate_templates(&known, &templates));

    errors.extend(validate_audit(&config.audit));

    errors
}

/// Check tool declarations and return the set of known names
pub fn validate_tools<'a>(
    tools: &'a [RawTool],
    errors: &mut Vec<ValidationError>,
) -> HashSet<&'a str> {
    let mut known = HashSet::new();
    for tool in tools {
        if tool.name.trim().is_empty() {
            errors.push(ValidationError::EmptyToolName);
            continue;
        }
        if !known.insert(tool.name.as_str()) {
            errors.push(ValidationError::DuplicateTool(tool.name.clone()));
        }
        if let Some(endpoint) = &tool.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            errors.push(ValidationError::InvalidEndpoint {
                tool: tool.name.clone(),
                endpoint: endpoint.clone(),
            });
        }
    }
    known
}

/// Validate policy tables against the known tool universe
pub fn validate_policies(known: &HashSet<&str>, policies: &RawPolicies) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut check = |context: String, tool: &str| {
        if !known.contains(tool) {
            errors.push(ValidationError::UnknownTool {
                context,
                tool: tool.to_string(),
            });
        }
    };

    for (tool, deps) in &policies.sequential_dependencies {
        check("sequential_dependencies".into(), tool);
        for dep in deps {
            check(format!("sequential_dependencies.{}", tool), dep);
        }
    }
    for (tool, others) in &policies.parallel_restrictions {
        check("parallel_restrictions".into(), tool);
        for other in others {
            check(format!("parallel_restrictions.{}", tool), other);
        }
    }
    for (tool, rule) in &policies.conditional_execution {
        check("conditional_execution".into(), tool);
        check(
            format!("conditional_execution.{}.requires_success", tool),
            &rule.requires_success,
        );
    }
    for tool in &policies.approval_required {
        check("approval_required".into(), tool);
    }

    for (tool, deps) in &policies.sequential_dependencies {
        if deps.iter().any(|d| d == tool) {
            errors.push(ValidationError::SelfReference {
                rule: "sequential_dependencies",
                tool: tool.clone(),
            });
        }
    }
    for (tool, others) in &policies.parallel_restrictions {
        if others.iter().any(|o| o == tool) {
            errors.push(ValidationError::SelfReference {
                rule: "parallel_restrictions",
                tool: tool.clone(),
            });
        }
    }
    for (tool, rule) in &policies.conditional_execution {
        if &rule.requires_success == tool {
            errors.push(ValidationError::SelfReference {
                rule: "conditional_execution",
                tool: tool.clone(),
            });
        }
    }

    // A sequential cycle would make every tool on it permanently blocked
    let graph: BTreeMap<&str, Vec<&str>> = policies
        .sequential_dependencies
        .iter()
        .map(|(tool, deps)| {
            let edges = deps
                .iter()
                .map(String::as_str)
                .filter(|d| *d != tool.as_str())
                .collect();
            (tool.as_str(), edges)
        })
        .collect();
    if let Some(cycle) = find_cycle(&graph) {
        errors.push(ValidationError::DependencyCycle { cycle });
    }

    errors
}

/// Validate workflow templates against the known tool universe
pub fn validate_templates(
    known: &HashSet<&str>,
    templates: &[WorkflowTemplate],
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen_templates = HashSet::new();

    for template in templates {
        if !seen_templates.insert(template.name.as_str()) {
            errors.push(ValidationError::DuplicateTemplate(template.name.clone()));
        }

        let mut steps = HashSet::new();
        for step in &template.steps {
            if !steps.insert(step.tool.as_str()) {
                errors.push(ValidationError::DuplicateStep {
                    template: template.name.clone(),
                    tool: step.tool.to_string(),
                });
            }
            if !known.contains(step.tool.as_str()) {
                errors.push(ValidationError::UnknownTool {
                    context: format!("template '{}'", template.name),
                    tool: step.tool.to_string(),
                });
            }
        }

        for step in &template.steps {
            for dep in &step.dependencies {
                if !steps.contains(dep.as_str()) {
                    errors.push(ValidationError::UnknownStepDependency {
                        template: template.name.clone(),
                        step: step.tool.to_string(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }

        let graph: BTreeMap<&str, Vec<&str>> = template
            .steps
            .iter()
            .map(|s| {
                (
                    s.tool.as_str(),
                    s.dependencies.iter().map(|d| d.as_str()).collect(),
                )
            })
            .collect();
        if let Some(cycle) = find_cycle(&graph) {
            errors.push(ValidationError::TemplateCycle {
                template: template.name.clone(),
                cycle,
            });
        }
    }

    errors
}

fn validate_audit(audit: &RawAuditConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if audit.window_seconds == Some(0) {
        errors.push(ValidationError::InvalidWindow);
    }

    let thresholds = [
        ("violations_per_hour", audit.violations_per_hour),
        ("failures_per_hour", audit.failures_per_hour),
    ];
    for (name, value) in thresholds {
        if let Some(value) = value
            && !(value.is_finite() && value > 0.0)
        {
            errors.push(ValidationError::InvalidThreshold { name, value });
        }
    }

    errors
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Find a cycle in a dependency graph (node -> nodes it depends on).
///
/// Returns the cycle as a path that starts and ends on the same node.
/// Edges to nodes that are not keys of the graph are ignored.
pub fn find_cycle(graph: &BTreeMap<&str, Vec<&str>>) -> Option<Vec<String>> {
    fn visit<'a>(
        node: &'a str,
        graph: &BTreeMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(node).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return None,
            Mark::OnPath => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            Mark::Unvisited => {}
        }

        let Some(edges) = graph.get(node) else {
            return None;
        };

        marks.insert(node, Mark::OnPath);
        path.push(node);
        for next in edges {
            if let Some(cycle) = visit(*next, graph, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut path = Vec::new();
    for node in graph.keys() {
        if let Some(cycle) = visit(*node, graph, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}
