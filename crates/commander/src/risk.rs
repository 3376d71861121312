//! Risk classification for candidate tool invocations

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::RiskConfig;

/// Risk level driving confirmation requirements and timeouts
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" | "moderate" => Ok(RiskLevel::Medium),
            "high" | "critical" => Ok(RiskLevel::High),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// Outcome of classifying one tool invocation
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: u32,
    pub risk_level: RiskLevel,
    pub requires_confirmation: bool,
    pub factors: Vec<String>,
    pub reason: String,
}

const DESTRUCTIVE_TOOLS: &[&str] = &[
    "delete_file",
    "delete_directory",
    "kill_process",
    "force_terminate",
    "format",
    "format_disk",
    "delete_event",
];

const SYSTEM_MODIFYING_TOOLS: &[&str] = &[
    "write_file",
    "edit_block",
    "move_file",
    "execute_command",
    "start_process",
    "set_config_value",
    "create_event",
];

const PATH_KEYS: &[&str] = &[
    "path",
    "paths",
    "file",
    "file_path",
    "filePath",
    "directory",
    "source",
    "destination",
    "target",
];

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(^/(etc|bin|sbin|usr|boot|sys|proc|dev|lib|lib64|root|var/lib)(/|$))|(^[a-z]:\\(windows|program files))|((^|[/\\])\.(ssh|gnupg|aws)([/\\]|$))|((^|[/\\])\.env$)",
    )
    .expect("sensitive path pattern is valid")
});

static ADMIN_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(sudo|admin\w*)\b").expect("admin keyword pattern is valid"));

/// Scores tool invocations against fixed heuristics
#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    config: RiskConfig,
}

impl RiskClassifier {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn is_destructive(tool: &str) -> bool {
        DESTRUCTIVE_TOOLS.contains(&tool)
    }

    pub fn is_system_modifying(tool: &str) -> bool {
        SYSTEM_MODIFYING_TOOLS.contains(&tool)
    }

    pub fn is_sensitive_path(path: &str) -> bool {
        let expanded = path.trim().trim_start_matches('~');
        SENSITIVE_PATH.is_match(path.trim()) || SENSITIVE_PATH.is_match(expanded)
    }

    /// Score a tool call. Unknown tools carry no base weight but are still checked
    /// for sensitive paths and administrative keywords.
    pub fn assess(
        &self,
        tool: &str,
        parameters: &HashMap<String, serde_json::Value>,
        utterance: &str,
    ) -> RiskAssessment {
        let mut score = 0;
        let mut factors = Vec::new();

        if Self::is_destructive(tool) {
            score += self.config.destructive_weight;
            factors.push(format!("{} is a destructive operation", tool));
        } else if Self::is_system_modifying(tool) {
            score += self.config.system_modifying_weight;
            factors.push(format!("{} modifies the system", tool));
        }

        // One weight per matching parameter so risk grows with blast radius
        let mut keys: Vec<&String> = parameters.keys().collect();
        keys.sort();
        for key in keys {
            for path in path_values(key, &parameters[key]) {
                if Self::is_sensitive_path(&path) {
                    score += self.config.sensitive_path_weight;
                    factors.push(format!("{} targets sensitive path {}", key, path));
                }
            }
        }

        if let Some(keyword) = ADMIN_KEYWORD.find(utterance) {
            score += self.config.admin_keyword_weight;
            factors.push(format!(
                "request mentions administrative keyword '{}'",
                keyword.as_str().to_lowercase()
            ));
        }

        let risk_level = self.level_for_score(score);
        let requires_confirmation = score >= self.config.confirmation_threshold;
        let reason = if factors.is_empty() {
            "low risk".to_string()
        } else {
            factors.join("; ")
        };

        tracing::debug!(
            "[RISK] {} scored {} ({}) confirmation={}",
            tool,
            score,
            risk_level,
            requires_confirmation
        );

        RiskAssessment {
            score,
            risk_level,
            requires_confirmation,
            factors,
            reason,
        }
    }

    pub fn level_for_score(&self, score: u32) -> RiskLevel {
        if score >= self.config.high_risk_threshold {
            RiskLevel::High
        } else if score >= self.config.confirmation_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

fn looks_like_path(value: &str) -> bool {
    value.starts_with('/')
        || value.starts_with('~')
        || value.starts_with("./")
        || value.starts_with("../")
        || value.contains('/')
        || value.contains('\\')
        || value.starts_with('.')
}

fn path_values(key: &str, value: &serde_json::Value) -> Vec<String> {
    let keyed = PATH_KEYS.contains(&key);
    match value {
        serde_json::Value::String(s) if keyed || looks_like_path(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter(|s| keyed || looks_like_path(s))
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}
