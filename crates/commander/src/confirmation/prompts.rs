//! Spoken confirmation prompts as a declarative tool -> template table

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::command::VoiceCommand;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

const CLOSING: &str = "Say confirm to proceed or cancel to stop.";

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("delete_file", "This will permanently delete {path}."),
    (
        "delete_event",
        "This will permanently delete the calendar event {event_id}.",
    ),
    (
        "kill_process",
        "This will terminate process {pid}. Any unsaved work in it will be lost.",
    ),
    (
        "force_terminate",
        "This will force-terminate session {pid} without letting it clean up.",
    ),
    ("write_file", "This will overwrite {path} with new content."),
    ("edit_block", "This will change the contents of {file_path}."),
    ("move_file", "This will move {source} to {destination}."),
    ("execute_command", "This will run the command {command}."),
    (
        "set_config_value",
        "This will change the setting {key} to {value}.",
    ),
];

/// Used when no tool-specific template exists. `{tool}` and `{risk}` are always available.
const FALLBACK_TEMPLATE: &str = "You asked me to {tool}. This is a {risk} risk operation.";

const ESCALATION_PREFIX: &str = "This cannot be undone. Please confirm a second time.";

pub const CLARIFICATION_PROMPT: &str =
    "I didn't catch whether that was a yes or a no. Please say confirm or cancel.";

pub const REPEAT_PROMPT: &str =
    "Sorry, I couldn't hear that clearly. Please repeat confirm or cancel.";

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<String, String>,
    fallback: String,
    escalation_prefix: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            templates: BUILTIN_TEMPLATES
                .iter()
                .map(|(tool, template)| (tool.to_string(), template.to_string()))
                .collect(),
            fallback: FALLBACK_TEMPLATE.to_string(),
            escalation_prefix: ESCALATION_PREFIX.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn with_template(mut self, tool: &str, template: &str) -> Self {
        self.templates.insert(tool.to_string(), template.to_string());
        self
    }

    pub fn has_template(&self, tool: &str) -> bool {
        self.templates.contains_key(tool)
    }

    /// Confirmation prompt naming the action and its target
    pub fn render(&self, command: &VoiceCommand) -> String {
        let tool = command.tool();
        let template = self.templates.get(tool).unwrap_or(&self.fallback);

        let body = PLACEHOLDER.replace_all(template, |caps: &Captures| match &caps[1] {
            "tool" => tool.replace('_', " "),
            "risk" => command.risk_level.to_string(),
            key => command
                .parameters
                .get(key)
                .map(spoken_value)
                .unwrap_or_else(|| "the target".to_string()),
        });

        format!("{} {}", body, CLOSING)
    }

    /// Second-round prompt for double confirmation
    pub fn escalate(&self, prompt: &str) -> String {
        format!("{} {}", self.escalation_prefix, prompt)
    }
}

fn spoken_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(spoken_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
