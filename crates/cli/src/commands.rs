//! CLI subcommand handlers
//!
//! Non-interactive commands: inspect tools, score a tool call, show configuration.

use std::collections::HashMap;

use anyhow::{bail, Result};
use colored::Colorize;
use commander::{tools::DictionarySource, RiskClassifier};
use serde_json::Value;

use crate::{config::Config, output::OutputHandler};

/// List every tool the intent resolver can map to
pub async fn list_tools(config: &Config) -> Result<()> {
    let output = OutputHandler::new(false);
    let dictionary = DictionarySource::from_config(config.commander.intent.dictionary_path.as_deref())
        .load()
        .await?;

    output.print_header(&format!("Tools ({})", dictionary.len()));
    let mut tools: Vec<_> = dictionary.iter().collect();
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    output.print_tools_table(&tools);
    Ok(())
}

/// Parse `key=value` pairs; values that parse as JSON keep their type
pub fn parse_parameters(pairs: &[String]) -> Result<HashMap<String, Value>> {
    let mut parameters = HashMap::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("parameter '{}' is not in key=value form", pair);
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        parameters.insert(key.trim().to_string(), value);
    }
    Ok(parameters)
}

/// Score a tool call without running it
pub fn assess(config: &Config, tool: &str, params: &[String], text: Option<&str>) -> Result<()> {
    let output = OutputHandler::new(false);
    let parameters = parse_parameters(params)?;
    let classifier = RiskClassifier::new(config.commander.risk.clone());
    let assessment = classifier.assess(tool, &parameters, text.unwrap_or_default());
    output.print_assessment(tool, &assessment);
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    let output = OutputHandler::new(false);
    output.print_header("Configuration");
    println!("  {} {}", "File:".dimmed(), config.path.display());
    println!(
        "  {} {}",
        "Exists:".dimmed(),
        if config.path.exists() { "yes" } else { "no (defaults)" }
    );
    println!();
    println!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_parameters_keeps_json_types() {
        let parameters = parse_parameters(&[
            "path=/etc/hosts".to_string(),
            "pid=42".to_string(),
            "recursive=true".to_string(),
        ])
        .unwrap();
        assert_eq!(parameters["path"], json!("/etc/hosts"));
        assert_eq!(parameters["pid"], json!(42));
        assert_eq!(parameters["recursive"], json!(true));

        assert!(parse_parameters(&["nonsense".to_string()]).is_err());
    }
}
