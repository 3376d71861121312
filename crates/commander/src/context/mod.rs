//! Context Manager - per-session conversational state and reference resolution

pub mod enrich;
pub mod types;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ts_rs::TS;
use uuid::Uuid;

pub use enrich::{enrich_utterance, EnrichedCommand};
pub use types::{
    CommandRecord, ConversationContext, ConversationNode, EntityReference, EntityType,
    ProcessHandle, ProcessStatus, SearchHandle, UserPreferences, Verbosity,
};

use crate::{
    command::VoiceCommand, config::ContextConfig, events::EventBroadcaster,
    intent::IntentContext, mcp::ToolExecutionResult, CommanderError, Result,
};

/// Words that point back at an earlier turn
const BACK_REFERENCES: &[&str] = &["that", "previous", "last", "before", "earlier"];

const FILE_KEYS: &[&str] = &["path", "file", "file_path", "source", "destination"];

/// Tools whose `path` parameter names a directory rather than a file
const DIRECTORY_TOOLS: &[&str] = &[
    "list_directory",
    "create_directory",
    "search_files",
    "search_code",
    "start_search",
];

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub active_contexts: usize,
    pub total_entities: usize,
    pub total_commands: usize,
    pub running_processes: usize,
    pub open_searches: usize,
}

pub struct ContextManager {
    config: ContextConfig,
    contexts: Arc<RwLock<HashMap<String, ConversationContext>>>,
    events: EventBroadcaster,
    cleanup_started: AtomicBool,
}

impl ContextManager {
    pub fn new(config: ContextConfig, events: EventBroadcaster) -> Self {
        Self {
            config,
            contexts: Arc::new(RwLock::new(HashMap::new())),
            events,
            cleanup_started: AtomicBool::new(false),
        }
    }

    /// Fetch the session's context, creating it on first use
    pub async fn get_or_create_context(
        &self,
        session_id: &str,
        user_id: &str,
        working_directory: &str,
    ) -> ConversationContext {
        let mut contexts = self.contexts.write().await;
        contexts
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!("[CONTEXT] Created context for session {}", session_id);
                // The working directory is not a reference until a command mentions it
                ConversationContext::new(session_id, user_id, working_directory)
            })
            .clone()
    }

    pub async fn get_context(&self, session_id: &str) -> Option<ConversationContext> {
        self.contexts.read().await.get(session_id).cloned()
    }

    pub async fn remove_context(&self, session_id: &str) -> bool {
        self.contexts.write().await.remove(session_id).is_some()
    }

    /// Resolve pronouns, demonstratives and relative paths in an utterance
    pub async fn enrich(
        &self,
        session_id: &str,
        utterance: &str,
        confidence: f64,
    ) -> Result<EnrichedCommand> {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts
            .get_mut(session_id)
            .ok_or_else(|| CommanderError::SessionNotFound(session_id.to_string()))?;
        ctx.touch();

        let enriched = enrich_utterance(ctx, utterance, confidence, self.config.max_hint_items);
        if !enriched.resolved_references.is_empty() {
            tracing::debug!(
                "[CONTEXT] '{}' -> '{}' ({} references)",
                utterance,
                enriched.enriched_text,
                enriched.resolved_references.len()
            );
        }
        Ok(enriched)
    }

    /// Intent context for the resolver, built from the session's state and an enrichment
    pub async fn intent_context(
        &self,
        session_id: &str,
        enriched: &EnrichedCommand,
    ) -> Result<IntentContext> {
        let contexts = self.contexts.read().await;
        let ctx = contexts
            .get(session_id)
            .ok_or_else(|| CommanderError::SessionNotFound(session_id.to_string()))?;

        Ok(IntentContext {
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            current_directory: Some(ctx.current_directory.clone()),
            recent_commands: ctx.recent_command_texts(5),
            active_processes: ctx
                .running_processes()
                .into_iter()
                .map(|p| format!("{} ({})", p.pid, p.command))
                .collect(),
            hints: enriched.hints.clone(),
            implicit_parameters: enriched.implicit_parameters.clone(),
        })
    }

    /// Fold an executed command and its result into the session context
    pub async fn update_context(
        &self,
        session_id: &str,
        command: &VoiceCommand,
        result: &ToolExecutionResult,
    ) -> Result<()> {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts
            .get_mut(session_id)
            .ok_or_else(|| CommanderError::SessionNotFound(session_id.to_string()))?;

        let tool = command.tool().to_string();
        apply_tool_effects(ctx, &tool, command, result);
        record_parameter_entities(ctx, &tool, command);
        self.enforce_limits(ctx);

        let node = ConversationNode {
            id: Uuid::new_v4(),
            command_id: command.id,
            text: command.text.clone(),
            tool_name: tool.clone(),
            timestamp: Utc::now(),
            depends_on: find_dependencies(ctx, command),
            follow_ups: Vec::new(),
        };
        ctx.push_node(node, self.config.max_conversation_nodes);

        ctx.push_command(
            CommandRecord {
                command_id: command.id,
                text: command.text.clone(),
                tool_name: tool.clone(),
                parameters: command.parameters.clone(),
                success: result.success,
                timestamp: command.timestamp,
            },
            self.config.max_command_history,
        );

        *ctx.preferences.preferred_tools.entry(tool.clone()).or_insert(0) += 1;
        *ctx
            .preferences
            .frequent_directories
            .entry(ctx.current_directory.clone())
            .or_insert(0) += 1;
        ctx.touch();

        self.events.context_updated(
            session_id,
            &tool,
            &ctx.current_directory,
            ctx.entities.len() as u32,
        );
        Ok(())
    }

    /// Seed or boost an entity reference explicitly
    pub async fn record_entity(
        &self,
        session_id: &str,
        entity_type: EntityType,
        value: &str,
    ) -> Result<EntityReference> {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts
            .get_mut(session_id)
            .ok_or_else(|| CommanderError::SessionNotFound(session_id.to_string()))?;
        ctx.touch();
        let entity = ctx.record_entity(entity_type, value).clone();
        self.enforce_limits(ctx);
        Ok(entity)
    }

    fn enforce_limits(&self, ctx: &mut ConversationContext) {
        ctx.prune_entities(self.config.max_entities);
        ctx.prune_active_files(self.config.max_active_files);
        ctx.prune_finished_processes(self.config.max_finished_processes);
    }

    pub async fn set_current_directory(&self, session_id: &str, directory: &str) -> Result<()> {
        let mut contexts = self.contexts.write().await;
        let ctx = contexts
            .get_mut(session_id)
            .ok_or_else(|| CommanderError::SessionNotFound(session_id.to_string()))?;
        ctx.current_directory = directory.to_string();
        ctx.record_entity(EntityType::Directory, directory);
        ctx.touch();
        Ok(())
    }

    /// Drop contexts idle for longer than the inactivity window
    pub async fn cleanup_expired(&self) -> usize {
        cleanup_contexts(&self.contexts, self.config.inactivity_timeout_secs).await
    }

    /// Start the periodic inactivity sweep. Calling it again is a no-op.
    pub fn start_cleanup_task(&self) {
        if self.cleanup_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let contexts = self.contexts.clone();
        let inactivity = self.config.inactivity_timeout_secs;
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            tracing::info!("[CONTEXT] Starting context cleanup every {:?}", period);
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = cleanup_contexts(&contexts, inactivity).await;
                if removed > 0 {
                    tracing::info!("[CONTEXT] Purged {} inactive contexts", removed);
                }
            }
        });
    }

    pub async fn stats(&self) -> ContextStats {
        let contexts = self.contexts.read().await;
        ContextStats {
            active_contexts: contexts.len(),
            total_entities: contexts.values().map(|c| c.entities.len()).sum(),
            total_commands: contexts.values().map(|c| c.command_history.len()).sum(),
            running_processes: contexts
                .values()
                .map(|c| c.running_processes().len())
                .sum(),
            open_searches: contexts.values().map(|c| c.open_searches.len()).sum(),
        }
    }
}

async fn cleanup_contexts(
    contexts: &RwLock<HashMap<String, ConversationContext>>,
    inactivity_secs: u64,
) -> usize {
    let cutoff = Utc::now() - chrono::Duration::seconds(inactivity_secs as i64);
    let mut contexts = contexts.write().await;
    let before = contexts.len();
    contexts.retain(|_, ctx| ctx.last_activity > cutoff);
    before - contexts.len()
}

fn value_as_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn apply_tool_effects(
    ctx: &mut ConversationContext,
    tool: &str,
    command: &VoiceCommand,
    result: &ToolExecutionResult,
) {
    if !result.success {
        return;
    }

    match tool {
        "list_directory" => {
            if let Some(path) = command.param_str("path") {
                ctx.current_directory = path.to_string();
            }
        }
        "read_file" | "write_file" => {
            if let Some(path) = command.param_str("path") {
                ctx.touch_file(path);
            }
        }
        "edit_block" => {
            if let Some(path) = command.param_str("file_path") {
                ctx.touch_file(path);
            }
        }
        "read_multiple_files" => {
            if let Some(paths) = command.parameters.get("paths").and_then(|v| v.as_array()) {
                for path in paths.iter().filter_map(|p| p.as_str()) {
                    ctx.touch_file(path);
                }
            }
        }
        "move_file" => {
            if let (Some(source), Some(destination)) =
                (command.param_str("source"), command.param_str("destination"))
            {
                let was_active = ctx.active_files.iter().any(|f| f == source);
                ctx.active_files.retain(|f| f != source);
                if was_active {
                    ctx.touch_file(destination);
                }
            }
        }
        "delete_file" => {
            if let Some(path) = command.param_str("path") {
                ctx.active_files.retain(|f| f != path);
            }
        }
        "execute_command" | "start_process" => {
            let pid = result
                .content
                .get("pid")
                .and_then(value_as_id)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            ctx.active_processes.insert(
                pid.clone(),
                ProcessHandle {
                    pid,
                    command: command
                        .param_str("command")
                        .unwrap_or(&command.text)
                        .to_string(),
                    started_at: Utc::now(),
                    status: ProcessStatus::Running,
                },
            );
        }
        "kill_process" | "force_terminate" => {
            if let Some(pid) = command.parameters.get("pid").and_then(value_as_id) {
                if let Some(handle) = ctx.active_processes.get_mut(&pid) {
                    handle.status = ProcessStatus::Completed;
                }
            }
        }
        "start_search" => {
            let id = ["sessionId", "session_id", "id"]
                .iter()
                .find_map(|key| result.content.get(*key).and_then(value_as_id))
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            ctx.open_searches.insert(
                id.clone(),
                SearchHandle {
                    id,
                    pattern: command.param_str("pattern").unwrap_or_default().to_string(),
                    path: command.param_str("path").map(String::from),
                    started_at: Utc::now(),
                },
            );
        }
        "stop_search" => {
            if let Some(id) = command.parameters.get("session_id").and_then(value_as_id) {
                ctx.open_searches.remove(&id);
            }
        }
        _ => {}
    }
}

fn record_parameter_entities(ctx: &mut ConversationContext, tool: &str, command: &VoiceCommand) {
    let mut keys: Vec<&String> = command.parameters.keys().collect();
    keys.sort();

    for key in keys {
        let value = &command.parameters[key];
        match key.as_str() {
            "directory" => {
                if let Some(dir) = value.as_str() {
                    ctx.record_entity(EntityType::Directory, dir);
                }
            }
            "paths" => {
                if let Some(paths) = value.as_array() {
                    for path in paths.iter().filter_map(|p| p.as_str()) {
                        record_path(ctx, EntityType::File, path);
                    }
                }
            }
            k if FILE_KEYS.contains(&k) => {
                if let Some(path) = value.as_str() {
                    let kind = if DIRECTORY_TOOLS.contains(&tool) || path.ends_with('/') {
                        EntityType::Directory
                    } else {
                        EntityType::File
                    };
                    record_path(ctx, kind, path);
                }
            }
            "pid" => {
                if let Some(pid) = value_as_id(value) {
                    ctx.record_entity(EntityType::Process, &pid);
                }
            }
            "pattern" => {
                if let Some(pattern) = value.as_str() {
                    ctx.record_entity(EntityType::Search, pattern);
                }
            }
            _ => {}
        }
    }
}

/// Record a path with its file name as an alias
fn record_path(ctx: &mut ConversationContext, kind: EntityType, path: &str) {
    let alias = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != path);
    ctx.record_entity_with_alias(kind, path, alias);
}

/// Earlier turns sharing a parameter value, plus the previous turn on a temporal back-reference
fn find_dependencies(ctx: &ConversationContext, command: &VoiceCommand) -> Vec<Uuid> {
    let values: Vec<String> = command
        .parameters
        .values()
        .filter_map(value_as_id)
        .collect();

    let mut depends_on = Vec::new();
    for node in &ctx.conversation {
        let overlaps = ctx
            .command_history
            .iter()
            .find(|record| record.command_id == node.command_id)
            .map(|record| {
                record
                    .parameters
                    .values()
                    .filter_map(value_as_id)
                    .any(|v| values.contains(&v))
            })
            .unwrap_or(false);
        if overlaps {
            depends_on.push(node.id);
        }
    }

    let lowered = command.text.to_lowercase();
    let back_reference = lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| BACK_REFERENCES.contains(&word));
    if back_reference {
        if let Some(previous) = ctx.conversation.back() {
            if !depends_on.contains(&previous.id) {
                depends_on.push(previous.id);
            }
        }
    }
    depends_on
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> ContextManager {
        ContextManager::new(ContextConfig::default(), EventBroadcaster::new())
    }

    fn command(text: &str, tool: &str, params: serde_json::Value) -> VoiceCommand {
        let parameters = params
            .as_object()
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        VoiceCommand::new(text, 0.9, "s1", "u1").with_tool(tool, parameters)
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let manager = manager();
        assert!(matches!(
            manager.enrich("missing", "delete it", 1.0).await,
            Err(CommanderError::SessionNotFound(_))
        ));
        let cmd = command("read a", "read_file", json!({"path": "a"}));
        assert!(manager
            .update_context("missing", &cmd, &ToolExecutionResult::ok(json!(null)))
            .await
            .is_err());
        assert!(manager
            .record_entity("missing", EntityType::File, "a")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_lazy_create_is_idempotent() {
        let manager = manager();
        let first = manager.get_or_create_context("s1", "u1", "/home/user").await;
        manager.set_current_directory("s1", "/tmp").await.unwrap();
        let second = manager.get_or_create_context("s1", "u1", "/home/user").await;
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.current_directory, "/tmp");
    }

    #[tokio::test]
    async fn test_fresh_context_leaves_pronouns_unresolved() {
        let manager = manager();
        let ctx = manager.get_or_create_context("s1", "u1", "/home/u1").await;
        assert!(ctx.entities.is_empty());

        let enriched = manager.enrich("s1", "delete it", 0.9).await.unwrap();
        assert_eq!(enriched.enriched_text, "delete it");
        assert!(enriched.resolved_references.is_empty());
        assert_eq!(enriched.confidence, 0.9);

        let enriched = manager.enrich("s1", "list that directory", 0.9).await.unwrap();
        assert_eq!(enriched.enriched_text, "list that directory");
    }

    #[tokio::test]
    async fn test_update_then_enrich_pronoun() {
        let manager = manager();
        manager.get_or_create_context("s1", "u1", "/home/user").await;
        let cmd = command("read package.json", "read_file", json!({"path": "package.json"}));
        manager
            .update_context("s1", &cmd, &ToolExecutionResult::ok(json!("{}")))
            .await
            .unwrap();

        let enriched = manager.enrich("s1", "delete it", 1.0).await.unwrap();
        assert!(enriched.enriched_text.contains("package.json"));

        let ctx = manager.get_context("s1").await.unwrap();
        assert_eq!(ctx.active_files, vec!["package.json".to_string()]);
        assert_eq!(ctx.preferences.preferred_tools["read_file"], 1);
    }

    #[tokio::test]
    async fn test_that_directory_scenario() {
        let manager = manager();
        manager.get_or_create_context("s1", "u1", "/home/user").await;
        let cmd = command(
            "search the projects folder for readme",
            "search_files",
            json!({"path": "/home/user/projects", "pattern": "readme"}),
        );
        manager
            .update_context("s1", &cmd, &ToolExecutionResult::ok(json!([])))
            .await
            .unwrap();

        let enriched = manager
            .enrich("s1", "list files in that directory", 0.9)
            .await
            .unwrap();
        assert!(enriched.enriched_text.contains("/home/user/projects"));
        assert!(enriched.confidence < 0.9);
        let ctx = manager.get_context("s1").await.unwrap();
        assert_eq!(ctx.current_directory, "/home/user");
    }

    #[tokio::test]
    async fn test_tool_dispatch_updates_state() {
        let manager = manager();
        manager.get_or_create_context("s1", "u1", "/home/user").await;

        let ok = |content| ToolExecutionResult::ok(content);
        manager
            .update_context(
                "s1",
                &command("list src", "list_directory", json!({"path": "/home/user/src"})),
                &ok(json!([])),
            )
            .await
            .unwrap();
        manager
            .update_context(
                "s1",
                &command("run the build", "execute_command", json!({"command": "cargo build"})),
                &ok(json!({"pid": 4242})),
            )
            .await
            .unwrap();
        manager
            .update_context(
                "s1",
                &command("start searching for todo", "start_search", json!({"path": "/home/user/src", "pattern": "TODO"})),
                &ok(json!({"sessionId": "search-1"})),
            )
            .await
            .unwrap();

        let ctx = manager.get_context("s1").await.unwrap();
        assert_eq!(ctx.current_directory, "/home/user/src");
        assert_eq!(ctx.active_processes["4242"].status, ProcessStatus::Running);
        assert!(ctx.open_searches.contains_key("search-1"));

        manager
            .update_context(
                "s1",
                &command("kill that process", "kill_process", json!({"pid": 4242})),
                &ok(json!(null)),
            )
            .await
            .unwrap();
        manager
            .update_context(
                "s1",
                &command("stop the search", "stop_search", json!({"session_id": "search-1"})),
                &ok(json!(null)),
            )
            .await
            .unwrap();

        let ctx = manager.get_context("s1").await.unwrap();
        assert_eq!(ctx.active_processes["4242"].status, ProcessStatus::Completed);
        assert!(ctx.open_searches.is_empty());
        assert_eq!(
            ctx.most_recent_of(EntityType::Process).unwrap().value,
            "4242"
        );
    }

    #[tokio::test]
    async fn test_conversation_links_back_references() {
        let manager = manager();
        manager.get_or_create_context("s1", "u1", "/home/user").await;
        let ok = ToolExecutionResult::ok(json!(null));

        manager
            .update_context("s1", &command("read a.txt", "read_file", json!({"path": "a.txt"})), &ok)
            .await
            .unwrap();
        manager
            .update_context("s1", &command("show b.txt", "read_file", json!({"path": "b.txt"})), &ok)
            .await
            .unwrap();
        manager
            .update_context(
                "s1",
                &command("edit a.txt again", "edit_block", json!({"file_path": "a.txt", "old_string": "x", "new_string": "y"})),
                &ok,
            )
            .await
            .unwrap();
        manager
            .update_context(
                "s1",
                &command("undo what I did before", "read_file", json!({"path": "c.txt"})),
                &ok,
            )
            .await
            .unwrap();

        let ctx = manager.get_context("s1").await.unwrap();
        let nodes: Vec<_> = ctx.conversation.iter().collect();
        assert_eq!(nodes[2].depends_on, vec![nodes[0].id]);
        assert_eq!(nodes[0].follow_ups, vec![nodes[2].id]);
        assert_eq!(nodes[3].depends_on, vec![nodes[2].id]);
        assert!(nodes[1].depends_on.is_empty());
    }

    #[tokio::test]
    async fn test_history_capped_at_limit() {
        let manager = manager();
        manager.get_or_create_context("s1", "u1", "/home/user").await;
        let ok = ToolExecutionResult::ok(json!(null));
        for i in 0..101 {
            let cmd = command(&format!("read file {}", i), "read_file", json!({"path": format!("f{}.txt", i)}));
            manager.update_context("s1", &cmd, &ok).await.unwrap();
        }
        let ctx = manager.get_context("s1").await.unwrap();
        assert_eq!(ctx.command_history.len(), 100);
        assert_eq!(ctx.command_history.front().unwrap().text, "read file 1");
        assert_eq!(ctx.conversation.len(), 50);
    }

    #[tokio::test]
    async fn test_long_session_state_stays_bounded() {
        let config = ContextConfig {
            max_entities: 5,
            max_active_files: 3,
            max_finished_processes: 2,
            ..ContextConfig::default()
        };
        let manager = ContextManager::new(config, EventBroadcaster::new());
        manager.get_or_create_context("s1", "u1", "/").await;

        for i in 0..20 {
            let path = format!("/data/file{}.txt", i);
            manager
                .update_context(
                    "s1",
                    &command(&format!("read {}", path), "read_file", json!({ "path": path })),
                    &ToolExecutionResult::ok(json!("")),
                )
                .await
                .unwrap();
        }
        for pid in 100..106 {
            manager
                .update_context(
                    "s1",
                    &command("run job", "execute_command", json!({"command": "job"})),
                    &ToolExecutionResult::ok(json!({ "pid": pid })),
                )
                .await
                .unwrap();
        }
        for pid in 100..105 {
            manager
                .update_context(
                    "s1",
                    &command("kill it", "kill_process", json!({ "pid": pid })),
                    &ToolExecutionResult::ok(json!(null)),
                )
                .await
                .unwrap();
        }

        let ctx = manager.get_context("s1").await.unwrap();
        assert!(ctx.entities.len() <= 5);
        assert_eq!(
            ctx.active_files,
            vec!["/data/file17.txt", "/data/file18.txt", "/data/file19.txt"]
        );
        let finished = ctx
            .active_processes
            .values()
            .filter(|p| p.status == ProcessStatus::Completed)
            .count();
        assert_eq!(finished, 2);
        assert_eq!(ctx.active_processes["105"].status, ProcessStatus::Running);

        // The latest mention survives eviction
        let enriched = manager.enrich("s1", "kill it", 0.9).await.unwrap();
        assert_eq!(enriched.enriched_text, "kill 104");
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let config = ContextConfig {
            inactivity_timeout_secs: 60,
            ..ContextConfig::default()
        };
        let manager = ContextManager::new(config, EventBroadcaster::new());
        manager.get_or_create_context("old", "u1", "/").await;
        manager.get_or_create_context("fresh", "u1", "/").await;
        {
            let mut contexts = manager.contexts.write().await;
            contexts.get_mut("old").unwrap().last_activity = Utc::now() - chrono::Duration::hours(2);
        }

        assert_eq!(manager.cleanup_expired().await, 1);
        assert!(manager.get_context("old").await.is_none());
        assert!(manager.get_context("fresh").await.is_some());
        assert_eq!(manager.cleanup_expired().await, 0);
        assert_eq!(manager.stats().await.active_contexts, 1);
    }

    #[tokio::test]
    async fn test_context_updated_event() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let manager = ContextManager::new(ContextConfig::default(), events);
        manager.get_or_create_context("s1", "u1", "/home/user").await;
        manager
            .update_context(
                "s1",
                &command("list", "list_directory", json!({"path": "/srv"})),
                &ToolExecutionResult::ok(json!([])),
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "contextUpdated");
    }
}
