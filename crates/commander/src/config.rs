//! Configuration for Voice Commander
//!
//! Defaults are compiled in; a TOML file and `VCMD__*` environment variables
//! can override any field.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CommanderError, Result};

/// Core configuration for Voice Commander
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommanderConfig {
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

impl CommanderConfig {
    /// Load configuration: defaults, then the optional file, then `VCMD__SECTION__KEY` env vars
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VCMD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| CommanderError::ConfigError(e.to_string()))?;

        let config: CommanderConfig = settings
            .try_deserialize()
            .map_err(|e| CommanderError::ConfigError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break the workflow invariants
    pub fn validate(&self) -> Result<()> {
        let c = &self.confirmation;
        if !(c.low_risk_timeout_ms < c.medium_risk_timeout_ms
            && c.medium_risk_timeout_ms < c.high_risk_timeout_ms)
        {
            return Err(CommanderError::ConfigError(
                "confirmation timeouts must strictly increase from low to high risk".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&c.min_response_confidence)
            || !(0.0..=1.0).contains(&c.similarity_threshold)
        {
            return Err(CommanderError::ConfigError(
                "confirmation thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.intent.min_confidence) {
            return Err(CommanderError::ConfigError(
                "intent.min_confidence must lie in [0, 1]".to_string(),
            ));
        }
        if self.risk.high_risk_threshold < self.risk.confirmation_threshold {
            return Err(CommanderError::ConfigError(
                "risk.high_risk_threshold must not be below risk.confirmation_threshold".to_string(),
            ));
        }
        if self.context.max_command_history == 0 || self.session.max_snapshots == 0 {
            return Err(CommanderError::ConfigError(
                "history and snapshot capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Heuristic weights used by the risk classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_destructive_weight")]
    pub destructive_weight: u32,
    #[serde(default = "default_sensitive_path_weight")]
    pub sensitive_path_weight: u32,
    #[serde(default = "default_system_modifying_weight")]
    pub system_modifying_weight: u32,
    #[serde(default = "default_admin_keyword_weight")]
    pub admin_keyword_weight: u32,
    /// Score at which confirmation becomes mandatory
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: u32,
    /// Score at which a command is classified high risk
    #[serde(default = "default_high_risk_threshold")]
    pub high_risk_threshold: u32,
}

fn default_destructive_weight() -> u32 {
    50
}

fn default_sensitive_path_weight() -> u32 {
    40
}

fn default_system_modifying_weight() -> u32 {
    30
}

fn default_admin_keyword_weight() -> u32 {
    30
}

fn default_confirmation_threshold() -> u32 {
    30
}

fn default_high_risk_threshold() -> u32 {
    50
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            destructive_weight: default_destructive_weight(),
            sensitive_path_weight: default_sensitive_path_weight(),
            system_modifying_weight: default_system_modifying_weight(),
            admin_keyword_weight: default_admin_keyword_weight(),
            confirmation_threshold: default_confirmation_threshold(),
            high_risk_threshold: default_high_risk_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_low_timeout")]
    pub low_risk_timeout_ms: u64,
    #[serde(default = "default_medium_timeout")]
    pub medium_risk_timeout_ms: u64,
    #[serde(default = "default_high_timeout")]
    pub high_risk_timeout_ms: u64,
    /// Responses recognised below this confidence are asked to be repeated
    #[serde(default = "default_min_response_confidence")]
    pub min_response_confidence: f64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_true")]
    pub double_confirmation_high_risk: bool,
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace_ms: u64,
    #[serde(default = "default_confirmation_sweep")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_audit_limit")]
    pub audit_trail_limit: usize,
}

fn default_low_timeout() -> u64 {
    10_000
}

fn default_medium_timeout() -> u64 {
    15_000
}

fn default_high_timeout() -> u64 {
    20_000
}

fn default_min_response_confidence() -> f64 {
    0.8
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_cleanup_grace() -> u64 {
    5_000
}

fn default_confirmation_sweep() -> u64 {
    30
}

fn default_history_limit() -> usize {
    100
}

fn default_audit_limit() -> usize {
    1000
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            low_risk_timeout_ms: default_low_timeout(),
            medium_risk_timeout_ms: default_medium_timeout(),
            high_risk_timeout_ms: default_high_timeout(),
            min_response_confidence: default_min_response_confidence(),
            similarity_threshold: default_similarity_threshold(),
            double_confirmation_high_risk: true,
            cleanup_grace_ms: default_cleanup_grace(),
            sweep_interval_secs: default_confirmation_sweep(),
            history_limit: default_history_limit(),
            audit_trail_limit: default_audit_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_history_limit")]
    pub max_command_history: usize,
    #[serde(default = "default_max_nodes")]
    pub max_conversation_nodes: usize,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_context_sweep")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_hints")]
    pub max_hint_items: usize,
    /// Least recently referenced entities are evicted past this
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    #[serde(default = "default_max_active_files")]
    pub max_active_files: usize,
    /// Completed processes kept for reference; running ones are never evicted
    #[serde(default = "default_max_finished_processes")]
    pub max_finished_processes: usize,
}

fn default_max_nodes() -> usize {
    50
}

fn default_inactivity_timeout() -> u64 {
    3600
}

fn default_context_sweep() -> u64 {
    300
}

fn default_max_hints() -> usize {
    3
}

fn default_max_entities() -> usize {
    200
}

fn default_max_active_files() -> usize {
    50
}

fn default_max_finished_processes() -> usize {
    20
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_command_history: default_history_limit(),
            max_conversation_nodes: default_max_nodes(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            sweep_interval_secs: default_context_sweep(),
            max_hint_items: default_max_hints(),
            max_entities: default_max_entities(),
            max_active_files: default_max_active_files(),
            max_finished_processes: default_max_finished_processes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Observable `initializing` window before a session becomes active
    #[serde(default = "default_init_delay")]
    pub initialization_delay_ms: u64,
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
    #[serde(default = "default_day_secs")]
    pub max_session_age_secs: u64,
    #[serde(default = "default_day_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_termination_grace")]
    pub termination_grace_secs: u64,
    #[serde(default = "default_session_sweep")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_transition_limit")]
    pub max_transitions: usize,
}

fn default_init_delay() -> u64 {
    100
}

fn default_max_snapshots() -> usize {
    10
}

fn default_day_secs() -> u64 {
    86_400
}

fn default_termination_grace() -> u64 {
    30
}

fn default_session_sweep() -> u64 {
    60
}

fn default_transition_limit() -> usize {
    200
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initialization_delay_ms: default_init_delay(),
            max_snapshots: default_max_snapshots(),
            max_session_age_secs: default_day_secs(),
            session_ttl_secs: default_day_secs(),
            termination_grace_secs: default_termination_grace(),
            sweep_interval_secs: default_session_sweep(),
            max_transitions: default_transition_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Minimum confidence for a mapping to be accepted
    #[serde(default = "default_min_intent_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_ms: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Optional JSON file replacing the built-in tool dictionary
    #[serde(default)]
    pub dictionary_path: Option<String>,
}

fn default_min_intent_confidence() -> f64 {
    0.6
}

fn default_llm_timeout() -> u64 {
    8_000
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    500
}

fn default_endpoint() -> String {
    "http://localhost:11434/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_intent_confidence(),
            llm_timeout_ms: default_llm_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            dictionary_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_finished_limit")]
    pub finished_operation_limit: usize,
}

fn default_heartbeat() -> u64 {
    5_000
}

fn default_finished_limit() -> usize {
    100
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat(),
            finished_operation_limit: default_finished_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CommanderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.risk.confirmation_threshold, 30);
        assert_eq!(config.confirmation.high_risk_timeout_ms, 20_000);
        assert_eq!(config.context.max_command_history, 100);
        assert_eq!(config.session.max_snapshots, 10);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: CommanderConfig = from_json(
            r#"{"confirmation": {"high_risk_timeout_ms": 30000}, "intent": {"model": "gpt-4o-mini"}}"#,
        );
        assert_eq!(parsed.confirmation.high_risk_timeout_ms, 30_000);
        assert_eq!(parsed.confirmation.low_risk_timeout_ms, 10_000);
        assert_eq!(parsed.intent.model, "gpt-4o-mini");
        assert_eq!(parsed.intent.llm_timeout_ms, 8_000);
    }

    #[test]
    fn test_non_increasing_timeouts_rejected() {
        let mut config = CommanderConfig::default();
        config.confirmation.medium_risk_timeout_ms = config.confirmation.high_risk_timeout_ms;
        assert!(matches!(
            config.validate(),
            Err(CommanderError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = CommanderConfig::load(None).unwrap();
        assert_eq!(config.risk.destructive_weight, 50);
    }

    fn from_json(json: &str) -> CommanderConfig {
        serde_json::from_str(json).unwrap()
    }
}
