//! Reference resolution applied to an utterance before intent recognition

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::types::{ConversationContext, EntityType};

static PRONOUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(it|them|those|these)\b").expect("pronoun pattern is valid"));

static DEMONSTRATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:that|this) (file|directory|folder|process|search)\b")
        .expect("demonstrative pattern is valid")
});

static PREVIOUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bthe (?:previous|last) (file|directory|folder|command|process|search)\b")
        .expect("previous-reference pattern is valid")
});

static RELATIVE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|\s)(\.\.?/\S*)").expect("relative path pattern is valid"));

static MENTIONS_PROCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bprocess(es)?\b").expect("process pattern is valid"));

static MENTIONS_SEARCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsearch(es)?\b").expect("search pattern is valid"));

static FILE_RELATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(files?|folders?|director(y|ies)|read|write|edit|open|delete|remove|move|copy|rename|list|show)\b",
    )
    .expect("file pattern is valid")
});

static EXPLICIT_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|\s)(~|/|[A-Za-z]:\\)\S*").expect("explicit path pattern is valid"));

/// Utterance after reference resolution, ready for the intent resolver
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedCommand {
    pub original_text: String,
    pub enriched_text: String,
    /// Original phrase to the value it was replaced with
    pub resolved_references: BTreeMap<String, String>,
    pub hints: Vec<String>,
    #[ts(type = "Record<string, unknown>")]
    pub implicit_parameters: HashMap<String, serde_json::Value>,
    pub confidence: f64,
}

/// Resolve references in `utterance` against `ctx` without mutating it
pub fn enrich_utterance(
    ctx: &ConversationContext,
    utterance: &str,
    confidence: f64,
    max_hint_items: usize,
) -> EnrichedCommand {
    let mut resolved = BTreeMap::new();
    let mut substitutions = 0usize;

    let text = resolve_pronouns(ctx, utterance, &mut resolved, &mut substitutions);
    let text = resolve_demonstratives(ctx, &text, &mut resolved, &mut substitutions);
    let text = resolve_relative_paths(ctx, &text, &mut resolved, &mut substitutions);

    let hints = contextual_hints(ctx, &text, max_hint_items);

    let mut implicit_parameters = HashMap::new();
    if FILE_RELATED.is_match(&text) && !EXPLICIT_PATH.is_match(&text) {
        implicit_parameters.insert(
            "directory".to_string(),
            serde_json::Value::String(ctx.current_directory.clone()),
        );
    }

    EnrichedCommand {
        original_text: utterance.to_string(),
        enriched_text: text,
        resolved_references: resolved,
        hints,
        implicit_parameters,
        confidence: adjusted_confidence(confidence, substitutions),
    }
}

/// Each substitution costs 10% certainty, never dropping the factor below 0.7
pub fn adjusted_confidence(confidence: f64, substitutions: usize) -> f64 {
    let factor = (1.0 - 0.1 * substitutions as f64).max(0.7);
    (confidence * factor).clamp(0.0, 1.0)
}

fn resolve_pronouns(
    ctx: &ConversationContext,
    text: &str,
    resolved: &mut BTreeMap<String, String>,
    substitutions: &mut usize,
) -> String {
    let Some(entity) = ctx.most_recent_entity() else {
        return text.to_string();
    };
    PRONOUN
        .replace_all(text, |caps: &Captures| {
            resolved.insert(caps[0].to_string(), entity.value.clone());
            *substitutions += 1;
            entity.value.clone()
        })
        .into_owned()
}

fn resolve_demonstratives(
    ctx: &ConversationContext,
    text: &str,
    resolved: &mut BTreeMap<String, String>,
    substitutions: &mut usize,
) -> String {
    let text = DEMONSTRATIVE
        .replace_all(text, |caps: &Captures| {
            let target = EntityType::from_noun(&caps[1])
                .and_then(|kind| ctx.most_recent_of(kind))
                .map(|entity| entity.value.clone());
            substitute(&caps[0], target, resolved, substitutions)
        })
        .into_owned();

    PREVIOUS
        .replace_all(&text, |caps: &Captures| {
            let target = if caps[1].eq_ignore_ascii_case("command") {
                ctx.command_history.back().map(|c| c.text.clone())
            } else {
                EntityType::from_noun(&caps[1])
                    .and_then(|kind| ctx.most_recent_of(kind))
                    .map(|entity| entity.value.clone())
            };
            substitute(&caps[0], target, resolved, substitutions)
        })
        .into_owned()
}

fn substitute(
    phrase: &str,
    target: Option<String>,
    resolved: &mut BTreeMap<String, String>,
    substitutions: &mut usize,
) -> String {
    match target {
        Some(value) => {
            resolved.insert(phrase.to_string(), value.clone());
            *substitutions += 1;
            value
        }
        None => phrase.to_string(),
    }
}

fn resolve_relative_paths(
    ctx: &ConversationContext,
    text: &str,
    resolved: &mut BTreeMap<String, String>,
    substitutions: &mut usize,
) -> String {
    RELATIVE_PATH
        .replace_all(text, |caps: &Captures| {
            let absolute = join_path(&ctx.current_directory, &caps[2]);
            resolved.insert(caps[2].to_string(), absolute.clone());
            *substitutions += 1;
            format!("{}{}", &caps[1], absolute)
        })
        .into_owned()
}

/// Lexically join `relative` onto `base`, folding `.` and `..` segments
pub fn join_path(base: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let joined = format!("/{}", segments.join("/"));
    if relative.ends_with('/') && joined != "/" {
        format!("{}/", joined)
    } else {
        joined
    }
}

fn contextual_hints(ctx: &ConversationContext, text: &str, max_items: usize) -> Vec<String> {
    let mut hints = Vec::new();

    if MENTIONS_PROCESS.is_match(text) {
        let processes: Vec<String> = ctx
            .running_processes()
            .into_iter()
            .take(max_items)
            .map(|p| format!("{} ({})", p.pid, p.command))
            .collect();
        if !processes.is_empty() {
            hints.push(format!("Active processes: {}", processes.join(", ")));
        }
    }

    if FILE_RELATED.is_match(text) && !ctx.active_files.is_empty() {
        let files: Vec<&str> = ctx
            .active_files
            .iter()
            .rev()
            .take(max_items)
            .map(String::as_str)
            .collect();
        hints.push(format!("Recent files: {}", files.join(", ")));
    }

    if MENTIONS_SEARCH.is_match(text) && !ctx.open_searches.is_empty() {
        let mut searches: Vec<_> = ctx.open_searches.values().collect();
        searches.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        let searches: Vec<String> = searches
            .into_iter()
            .take(max_items)
            .map(|s| format!("{} ({})", s.id, s.pattern))
            .collect();
        hints.push(format!("Open searches: {}", searches.join(", ")));
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::{ProcessHandle, ProcessStatus};
    use chrono::{Duration, Utc};

    fn context() -> ConversationContext {
        ConversationContext::new("s1", "u1", "/home/user")
    }

    #[test]
    fn test_pronoun_resolves_to_most_recent_entity() {
        let mut ctx = context();
        ctx.record_entity(EntityType::Directory, "/home/user/src");
        ctx.record_entity(EntityType::File, "package.json");

        let first = enrich_utterance(&ctx, "delete it", 1.0, 3);
        assert_eq!(first.enriched_text, "delete package.json");
        assert_eq!(first.resolved_references["it"], "package.json");

        let second = enrich_utterance(&ctx, "delete it", 1.0, 3);
        assert_eq!(first.enriched_text, second.enriched_text);
        assert_eq!(first.confidence, second.confidence);
    }

    #[test]
    fn test_pronoun_without_entities_is_untouched() {
        let ctx = context();
        let enriched = enrich_utterance(&ctx, "open it", 0.9, 3);
        assert_eq!(enriched.enriched_text, "open it");
        assert!(enriched.resolved_references.is_empty());
        assert_eq!(enriched.confidence, 0.9);
    }

    #[test]
    fn test_pronoun_needs_word_boundary() {
        let mut ctx = context();
        ctx.record_entity(EntityType::File, "notes.md");
        let enriched = enrich_utterance(&ctx, "edit the item", 1.0, 3);
        assert_eq!(enriched.enriched_text, "edit the item");
    }

    #[test]
    fn test_demonstrative_matches_type() {
        let mut ctx = context();
        ctx.record_entity(EntityType::Directory, "/home/user/projects");
        ctx.record_entity(EntityType::File, "/home/user/readme.md");

        let enriched = enrich_utterance(&ctx, "list files in that directory", 0.9, 3);
        assert_eq!(enriched.enriched_text, "list files in /home/user/projects");
        assert!(enriched.confidence < 0.9);
    }

    #[test]
    fn test_previous_command_and_folder() {
        let mut ctx = context();
        ctx.record_entity(EntityType::Directory, "/var/tmp");
        ctx.push_command(
            crate::context::types::CommandRecord {
                command_id: uuid::Uuid::new_v4(),
                text: "list files".to_string(),
                tool_name: "list_directory".to_string(),
                parameters: HashMap::new(),
                success: true,
                timestamp: Utc::now(),
            },
            100,
        );

        let enriched = enrich_utterance(&ctx, "repeat the last command in the previous folder", 1.0, 3);
        assert_eq!(enriched.enriched_text, "repeat list files in /var/tmp");
        assert_eq!(enriched.resolved_references.len(), 2);
    }

    #[test]
    fn test_relative_paths_are_absolutized() {
        let ctx = context();
        let enriched = enrich_utterance(&ctx, "read ./notes.txt and ../shared/", 1.0, 3);
        assert_eq!(
            enriched.enriched_text,
            "read /home/user/notes.txt and /home/shared/"
        );
        assert_eq!(enriched.resolved_references.len(), 2);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/home/user", "./a/b.txt"), "/home/user/a/b.txt");
        assert_eq!(join_path("/home/user", "../../.."), "/");
        assert_eq!(join_path("/", "./x"), "/x");
    }

    #[test]
    fn test_confidence_floor() {
        assert_eq!(adjusted_confidence(1.0, 0), 1.0);
        assert!((adjusted_confidence(1.0, 1) - 0.9).abs() < 1e-9);
        assert!((adjusted_confidence(1.0, 2) - 0.8).abs() < 1e-9);
        assert!((adjusted_confidence(1.0, 10) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_process_hints_capped() {
        let mut ctx = context();
        let now = Utc::now();
        for i in 0..5 {
            ctx.active_processes.insert(
                i.to_string(),
                ProcessHandle {
                    pid: i.to_string(),
                    command: format!("job{}", i),
                    started_at: now + Duration::seconds(i),
                    status: ProcessStatus::Running,
                },
            );
        }
        let enriched = enrich_utterance(&ctx, "stop the process", 1.0, 3);
        assert_eq!(enriched.hints, vec!["Active processes: 4 (job4), 3 (job3), 2 (job2)"]);
    }

    #[test]
    fn test_implicit_directory_only_without_explicit_path() {
        let ctx = context();
        let enriched = enrich_utterance(&ctx, "list the files", 1.0, 3);
        assert_eq!(enriched.implicit_parameters["directory"], "/home/user");

        let explicit = enrich_utterance(&ctx, "list files in /tmp", 1.0, 3);
        assert!(explicit.implicit_parameters.is_empty());

        let unrelated = enrich_utterance(&ctx, "what time is it", 1.0, 3);
        assert!(unrelated.implicit_parameters.is_empty());
    }
}
