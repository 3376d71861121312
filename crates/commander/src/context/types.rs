use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::risk::RiskLevel;

/// Confidence assigned to a newly seen entity
pub const INITIAL_ENTITY_CONFIDENCE: f64 = 0.7;
/// Confidence gained on every repeated reference
pub const ENTITY_CONFIDENCE_BOOST: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    File,
    Directory,
    Process,
    Search,
    Variable,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Directory => "directory",
            EntityType::Process => "process",
            EntityType::Search => "search",
            EntityType::Variable => "variable",
        }
    }

    /// Map a spoken noun onto an entity type
    pub fn from_noun(noun: &str) -> Option<Self> {
        match noun.to_lowercase().as_str() {
            "file" => Some(EntityType::File),
            "directory" | "folder" => Some(EntityType::Directory),
            "process" => Some(EntityType::Process),
            "search" => Some(EntityType::Search),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked mention usable for pronoun and demonstrative resolution
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct EntityReference {
    pub entity_type: EntityType,
    pub value: String,
    pub aliases: Vec<String>,
    pub last_referenced: DateTime<Utc>,
    pub reference_count: u32,
    pub confidence: f64,
    /// Insertion order tiebreak for references within the same instant
    #[serde(skip)]
    #[ts(skip)]
    pub(crate) sequence: u64,
}

impl EntityReference {
    fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.last_referenced, self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum ProcessStatus {
    Running,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHandle {
    pub pid: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub status: ProcessStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SearchHandle {
    pub id: String,
    pub pattern: String,
    pub path: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub command_id: Uuid,
    pub text: String,
    pub tool_name: String,
    #[ts(type = "Record<string, unknown>")]
    pub parameters: HashMap<String, serde_json::Value>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// One turn of the conversation with links to the turns it builds on
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ConversationNode {
    pub id: Uuid,
    pub command_id: Uuid,
    pub text: String,
    pub tool_name: String,
    pub timestamp: DateTime<Utc>,
    pub depends_on: Vec<Uuid>,
    pub follow_ups: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum Verbosity {
    Brief,
    #[default]
    Normal,
    Detailed,
}

/// Preferences learned from the user's commands
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub frequent_directories: HashMap<String, u32>,
    pub preferred_tools: HashMap<String, u32>,
    pub verbosity: Verbosity,
    pub risk_tolerance: RiskLevel,
}

impl UserPreferences {
    /// Most used entries first, ties broken by name
    pub fn top_directories(&self, limit: usize) -> Vec<String> {
        top_keys(&self.frequent_directories, limit)
    }

    pub fn top_tools(&self, limit: usize) -> Vec<String> {
        top_keys(&self.preferred_tools, limit)
    }
}

fn top_keys(counts: &HashMap<String, u32>, limit: usize) -> Vec<String> {
    let mut entries: Vec<(&String, &u32)> = counts.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    entries
        .into_iter()
        .take(limit)
        .map(|(key, _)| key.clone())
        .collect()
}

/// Running conversational state of one session
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current_directory: String,
    /// Most recently touched last
    pub active_files: Vec<String>,
    pub active_processes: HashMap<String, ProcessHandle>,
    pub open_searches: HashMap<String, SearchHandle>,
    #[ts(as = "Vec<CommandRecord>")]
    pub command_history: VecDeque<CommandRecord>,
    /// Keyed by `type:value`
    pub entities: HashMap<String, EntityReference>,
    #[ts(as = "Vec<ConversationNode>")]
    pub conversation: VecDeque<ConversationNode>,
    pub preferences: UserPreferences,
    #[serde(skip)]
    #[ts(skip)]
    next_sequence: u64,
}

impl ConversationContext {
    pub fn new(session_id: &str, user_id: &str, current_directory: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            current_directory: current_directory.to_string(),
            active_files: Vec::new(),
            active_processes: HashMap::new(),
            open_searches: HashMap::new(),
            command_history: VecDeque::new(),
            entities: HashMap::new(),
            conversation: VecDeque::new(),
            preferences: UserPreferences::default(),
            next_sequence: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Record a mention. Repeats raise confidence (capped at 1.0) and the reference count.
    pub fn record_entity(&mut self, entity_type: EntityType, value: &str) -> &EntityReference {
        self.record_entity_with_alias(entity_type, value, None)
    }

    pub fn record_entity_with_alias(
        &mut self,
        entity_type: EntityType,
        value: &str,
        alias: Option<&str>,
    ) -> &EntityReference {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let now = Utc::now();
        let key = format!("{}:{}", entity_type, value);

        let entity = self
            .entities
            .entry(key)
            .and_modify(|existing| {
                existing.reference_count = existing.reference_count.saturating_add(1);
                existing.confidence = (existing.confidence + ENTITY_CONFIDENCE_BOOST).min(1.0);
                existing.last_referenced = now;
                existing.sequence = sequence;
            })
            .or_insert_with(|| EntityReference {
                entity_type,
                value: value.to_string(),
                aliases: Vec::new(),
                last_referenced: now,
                reference_count: 1,
                confidence: INITIAL_ENTITY_CONFIDENCE,
                sequence,
            });

        if let Some(alias) = alias {
            if alias != value && !entity.aliases.iter().any(|a| a == alias) {
                entity.aliases.push(alias.to_string());
            }
        }
        entity
    }

    /// Most recently referenced entity of any type
    pub fn most_recent_entity(&self) -> Option<&EntityReference> {
        self.entities.values().max_by_key(|e| e.recency())
    }

    pub fn most_recent_of(&self, entity_type: EntityType) -> Option<&EntityReference> {
        self.entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .max_by_key(|e| e.recency())
    }

    pub fn touch_file(&mut self, path: &str) {
        self.active_files.retain(|f| f != path);
        self.active_files.push(path.to_string());
    }

    pub fn running_processes(&self) -> Vec<&ProcessHandle> {
        let mut running: Vec<&ProcessHandle> = self
            .active_processes
            .values()
            .filter(|p| p.status == ProcessStatus::Running)
            .collect();
        running.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.pid.cmp(&b.pid)));
        running
    }

    /// Evict the least recently referenced entities beyond `limit`
    pub fn prune_entities(&mut self, limit: usize) {
        let excess = self.entities.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }
        let mut by_recency: Vec<((DateTime<Utc>, u64), String)> = self
            .entities
            .iter()
            .map(|(key, entity)| (entity.recency(), key.clone()))
            .collect();
        by_recency.sort();
        for (_, key) in by_recency.into_iter().take(excess) {
            self.entities.remove(&key);
        }
    }

    /// Keep the `limit` most recently touched files
    pub fn prune_active_files(&mut self, limit: usize) {
        let excess = self.active_files.len().saturating_sub(limit);
        self.active_files.drain(..excess);
    }

    /// Drop the oldest completed processes beyond `limit`
    pub fn prune_finished_processes(&mut self, limit: usize) {
        let mut finished: Vec<(DateTime<Utc>, String)> = self
            .active_processes
            .iter()
            .filter(|(_, p)| p.status == ProcessStatus::Completed)
            .map(|(key, p)| (p.started_at, key.clone()))
            .collect();
        let excess = finished.len().saturating_sub(limit);
        finished.sort();
        for (_, key) in finished.into_iter().take(excess) {
            self.active_processes.remove(&key);
        }
    }

    /// Append to the bounded history, evicting the oldest entry
    pub fn push_command(&mut self, record: CommandRecord, limit: usize) {
        self.command_history.push_back(record);
        while self.command_history.len() > limit {
            self.command_history.pop_front();
        }
    }

    pub fn push_node(&mut self, node: ConversationNode, limit: usize) {
        for parent in &node.depends_on {
            if let Some(prior) = self.conversation.iter_mut().find(|n| n.id == *parent) {
                prior.follow_ups.push(node.id);
            }
        }
        self.conversation.push_back(node);
        while self.conversation.len() > limit {
            self.conversation.pop_front();
        }
    }

    pub fn recent_command_texts(&self, limit: usize) -> Vec<String> {
        let skip = self.command_history.len().saturating_sub(limit);
        self.command_history
            .iter()
            .skip(skip)
            .map(|c| c.text.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize) -> CommandRecord {
        CommandRecord {
            command_id: Uuid::new_v4(),
            text: format!("command {}", i),
            tool_name: "read_file".to_string(),
            parameters: HashMap::new(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let mut ctx = ConversationContext::new("s", "u", "/home/user");
        for i in 0..101 {
            ctx.push_command(record(i), 100);
        }
        assert_eq!(ctx.command_history.len(), 100);
        assert_eq!(ctx.command_history.front().unwrap().text, "command 1");
        assert_eq!(ctx.command_history.back().unwrap().text, "command 100");
    }

    #[test]
    fn test_entity_confidence_grows_and_caps() {
        let mut ctx = ConversationContext::new("s", "u", "/");
        let first = ctx.record_entity(EntityType::File, "package.json").confidence;
        assert_eq!(first, INITIAL_ENTITY_CONFIDENCE);

        let mut previous_count = 1;
        for _ in 0..10 {
            let entity = ctx.record_entity(EntityType::File, "package.json");
            assert!(entity.confidence <= 1.0);
            assert!(entity.reference_count > previous_count);
            previous_count = entity.reference_count;
        }
        let entity = ctx.record_entity(EntityType::File, "package.json");
        assert_eq!(entity.confidence, 1.0);
        assert_eq!(entity.reference_count, 12);
    }

    #[test]
    fn test_most_recent_uses_sequence_tiebreak() {
        let mut ctx = ConversationContext::new("s", "u", "/");
        ctx.record_entity(EntityType::File, "a.txt");
        ctx.record_entity(EntityType::Directory, "/tmp");
        ctx.record_entity(EntityType::File, "b.txt");

        assert_eq!(ctx.most_recent_entity().unwrap().value, "b.txt");
        assert_eq!(
            ctx.most_recent_of(EntityType::Directory).unwrap().value,
            "/tmp"
        );

        ctx.record_entity(EntityType::File, "a.txt");
        assert_eq!(ctx.most_recent_of(EntityType::File).unwrap().value, "a.txt");
    }

    #[test]
    fn test_aliases_are_deduplicated() {
        let mut ctx = ConversationContext::new("s", "u", "/");
        ctx.record_entity_with_alias(EntityType::File, "/home/user/a.txt", Some("a.txt"));
        ctx.record_entity_with_alias(EntityType::File, "/home/user/a.txt", Some("a.txt"));
        let entity = ctx.most_recent_entity().unwrap();
        assert_eq!(entity.aliases, vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_node_cap_and_follow_ups() {
        let mut ctx = ConversationContext::new("s", "u", "/");
        let first = ConversationNode {
            id: Uuid::new_v4(),
            command_id: Uuid::new_v4(),
            text: "read a.txt".to_string(),
            tool_name: "read_file".to_string(),
            timestamp: Utc::now(),
            depends_on: Vec::new(),
            follow_ups: Vec::new(),
        };
        let first_id = first.id;
        ctx.push_node(first, 2);

        let second = ConversationNode {
            id: Uuid::new_v4(),
            depends_on: vec![first_id],
            ..ctx.conversation[0].clone()
        };
        let second_id = second.id;
        ctx.push_node(second, 2);
        assert_eq!(ctx.conversation[0].follow_ups, vec![second_id]);

        let mut third = ctx.conversation[1].clone();
        third.id = Uuid::new_v4();
        third.depends_on.clear();
        ctx.push_node(third, 2);
        assert_eq!(ctx.conversation.len(), 2);
        assert_eq!(ctx.conversation[0].id, second_id);
    }

    #[test]
    fn test_prune_evicts_least_recently_referenced() {
        let mut ctx = ConversationContext::new("s", "u", "/");
        for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
            ctx.record_entity(EntityType::File, name);
        }
        ctx.record_entity(EntityType::File, "a.txt");

        ctx.prune_entities(2);
        let mut kept: Vec<&str> = ctx.entities.values().map(|e| e.value.as_str()).collect();
        kept.sort();
        assert_eq!(kept, vec!["a.txt", "d.txt"]);

        for i in 0..6 {
            ctx.touch_file(&format!("/f{}", i));
        }
        ctx.prune_active_files(4);
        assert_eq!(ctx.active_files, vec!["/f2", "/f3", "/f4", "/f5"]);
    }

    #[test]
    fn test_prune_only_drops_finished_processes() {
        let mut ctx = ConversationContext::new("s", "u", "/");
        let start = Utc::now();
        for i in 0..5i64 {
            let pid = i.to_string();
            let status = if i == 0 {
                ProcessStatus::Running
            } else {
                ProcessStatus::Completed
            };
            ctx.active_processes.insert(
                pid.clone(),
                ProcessHandle {
                    pid,
                    command: "job".to_string(),
                    started_at: start + chrono::Duration::seconds(i),
                    status,
                },
            );
        }

        ctx.prune_finished_processes(1);
        let mut kept: Vec<&str> = ctx.active_processes.keys().map(String::as_str).collect();
        kept.sort();
        assert_eq!(kept, vec!["0", "4"]);
    }

    #[test]
    fn test_typescript_declaration_renders_history_as_arrays() {
        let declaration = ConversationContext::decl();
        assert!(declaration.contains("Array<CommandRecord>"));
        assert!(declaration.contains("Array<ConversationNode>"));
        assert!(!declaration.contains("VecDeque"));
    }

    #[test]
    fn test_preference_ranking() {
        let mut prefs = UserPreferences::default();
        prefs.preferred_tools.insert("read_file".into(), 3);
        prefs.preferred_tools.insert("list_directory".into(), 5);
        prefs.preferred_tools.insert("write_file".into(), 3);
        assert_eq!(
            prefs.top_tools(2),
            vec!["list_directory".to_string(), "read_file".to_string()]
        );
    }
}
