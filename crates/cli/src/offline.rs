//! Network-free collaborators for `--offline`
//!
//! `KeywordIntentService` answers the resolver's prompt with the same JSON shape an LLM
//! would, using verb keywords. `DryRunToolClient` records tool calls instead of making them.

use std::collections::HashMap;

use async_trait::async_trait;
use commander::{
    intent::{IntentService, ProviderError},
    McpToolClient, Result as CommanderResult, ToolExecutionResult,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;

pub struct KeywordIntentService;

/// Words that look like paths: absolute, home-relative, dot-relative, or with an extension
fn path_like(word: &str) -> bool {
    word.starts_with('/')
        || word.starts_with('~')
        || word.starts_with("./")
        || word.starts_with("../")
        || (word.contains('.') && !word.ends_with('.') && !word.starts_with('.'))
}

fn paths(words: &[&str]) -> Vec<String> {
    words
        .iter()
        .filter(|w| path_like(w))
        .map(|w| w.trim_end_matches([',', '?', '!']).to_string())
        .collect()
}

/// Text after the first occurrence of any marker word
fn after<'a>(words: &[&'a str], markers: &[&str]) -> Option<Vec<&'a str>> {
    words
        .iter()
        .position(|w| markers.contains(w))
        .map(|i| words[i + 1..].to_vec())
        .filter(|rest| !rest.is_empty())
}

/// Map a request onto (tool, parameters, confidence)
pub fn classify(request: &str) -> (&'static str, Value, f64) {
    let lowered = request.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let found = paths(&words);
    let first_path = found.first().cloned();
    let has = |w: &str| words.contains(&w);

    if has("kill") || has("terminate") {
        if let Some(pid) = words.iter().find_map(|w| w.parse::<u64>().ok()) {
            return ("kill_process", json!({ "pid": pid }), 0.9);
        }
    }
    if has("processes") {
        return ("list_processes", json!({}), 0.9);
    }
    if has("run") || has("execute") {
        if let Some(rest) = after(&words, &["run", "execute"]) {
            return ("execute_command", json!({ "command": rest.join(" ") }), 0.85);
        }
    }
    if has("search") || has("find") {
        let pattern = after(&words, &["for", "named"])
            .and_then(|rest| rest.first().map(|p| p.to_string()))
            .unwrap_or_else(|| "*".to_string());
        let mut parameters = json!({ "pattern": pattern });
        if let Some(path) = after(&words, &["in"]).and_then(|rest| paths(&rest).into_iter().next()) {
            parameters["path"] = json!(path);
        }
        return ("search_files", parameters, 0.8);
    }
    if has("move") || has("rename") {
        if let [source, destination, ..] = found.as_slice() {
            return (
                "move_file",
                json!({ "source": source, "destination": destination }),
                0.85,
            );
        }
    }
    if has("mkdir") || (has("create") && (has("directory") || has("folder"))) {
        if let Some(path) = first_path {
            return ("create_directory", json!({ "path": path }), 0.9);
        }
    }
    if has("delete") || has("remove") {
        if let Some(path) = first_path {
            return ("delete_file", json!({ "path": path }), 0.9);
        }
    }
    if has("write") {
        if let Some(path) = first_path {
            let content = after(&words, &["saying", "containing"])
                .map(|rest| rest.join(" "))
                .unwrap_or_default();
            return ("write_file", json!({ "path": path, "content": content }), 0.85);
        }
    }
    if has("read") || has("open") || has("cat") {
        if let Some(path) = first_path {
            return ("read_file", json!({ "path": path }), 0.9);
        }
    }
    if has("info") || has("size") {
        if let Some(path) = first_path {
            return ("get_file_info", json!({ "path": path }), 0.8);
        }
    }
    if has("list") || has("show") || has("ls") {
        return match first_path {
            Some(path) => ("list_directory", json!({ "path": path }), 0.9),
            None => ("list_directory", json!({}), 0.85),
        };
    }
    if has("config") || has("settings") {
        return ("get_config", json!({}), 0.8);
    }
    ("get_config", json!({}), 0.2)
}

#[async_trait]
impl IntentService for KeywordIntentService {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn recognize(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ProviderError> {
        let request = user_prompt
            .lines()
            .find_map(|line| line.strip_prefix("Request: "))
            .ok_or_else(|| ProviderError::ParseError("prompt has no request line".to_string()))?;
        let (tool, parameters, confidence) = classify(request);
        Ok(json!({
            "toolName": tool,
            "confidence": confidence,
            "parameters": parameters,
            "reasoning": "keyword match",
        })
        .to_string())
    }
}

/// Records tool calls and reports them as successful without touching the system
#[derive(Default)]
pub struct DryRunToolClient {
    calls: Mutex<Vec<String>>,
}

impl DryRunToolClient {
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl McpToolClient for DryRunToolClient {
    async fn call_tool(
        &self,
        name: &str,
        parameters: &HashMap<String, Value>,
    ) -> CommanderResult<ToolExecutionResult> {
        let rendered = serde_json::to_string(parameters)?;
        tracing::info!("[DRY-RUN] {} {}", name, rendered);
        self.calls
            .lock()
            .await
            .push(format!("{} {}", name, rendered));

        let content = match name {
            "execute_command" => json!({ "pid": 4242, "output": "(dry run)" }),
            "list_directory" | "search_files" | "list_processes" => json!([]),
            _ => json!(format!("Dry run: {} would have been called.", name.replace('_', " "))),
        };
        Ok(ToolExecutionResult::ok(content))
    }
}
