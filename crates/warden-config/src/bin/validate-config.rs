//! Config validation CLI tool
//!
//! Validates a toolwarden configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use warden_config::ConfigError;
use warden_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a toolwarden configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match warden_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", warden_config::CURRENT_CONFIG_VERSION);
            println!("  Tools: {}", config.tools.len());
            println!("  Templates: {}", config.templates.len());

            if !config.tools.is_empty() {
                println!();
                println!("Tools:");
                for tool in &config.tools {
                    let mut flags = Vec::new();
                    let deps = config.policy.dependencies(&tool.name);
                    if !deps.is_empty() {
                        let names: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
                        flags.push(format!("after {}", names.join(", ")));
                    }
                    if let Some(rule) = config.policy.conditional_rule(&tool.name) {
                        flags.push(format!("if {} succeeded", rule.requires_success_of));
                    }
                    if config.policy.requires_approval(&tool.name) {
                        flags.push("approval".to_string());
                    }
                    let endpoint = tool.endpoint.as_deref().unwrap_or("-");
                    println!("  - {} ({}) [{}]", tool.name, endpoint, flags.join("; "));
                }
            }

            if !config.templates.is_empty() {
                println!();
                println!("Templates:");
                for template in config.templates.list() {
                    let order: Vec<String> = template
                        .execution_order()
                        .iter()
                        .map(|t| t.to_string())
                        .collect();
                    println!("  - {}: {}", template.name, order.join(" -> "));
                }
            }

            let unenforced = config.templates.unenforced_rules(&config.policy);
            if !unenforced.is_empty() {
                println!();
                println!("Warnings ({}):", unenforced.len());
                for rule in unenforced {
                    println!("  - {}", rule);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        warden_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
