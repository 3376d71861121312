//! Intent Resolver - maps an enriched utterance onto a dictionary tool call

pub mod cache;
pub mod openai;
pub mod provider;

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub use cache::{CacheKey, CacheStats, IntentCache};
pub use openai::OpenAiCompatibleService;
pub use provider::{IntentService, ProviderError};

use crate::{
    command::VoiceCommand,
    config::IntentConfig,
    risk::{RiskAssessment, RiskClassifier, RiskLevel},
    similarity::normalize_phrase,
    tools::{SharedDictionary, ToolDictionary},
    CommanderError, Result,
};

/// Tools whose `path` parameter names a directory and may default to the current one
const DIRECTORY_PATH_TOOLS: &[&str] = &[
    "list_directory",
    "search_files",
    "search_code",
    "start_search",
];

/// What the resolver knows about the conversation when mapping an utterance
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct IntentContext {
    pub session_id: String,
    pub user_id: String,
    pub current_directory: Option<String>,
    /// Most recent last
    pub recent_commands: Vec<String>,
    pub active_processes: Vec<String>,
    pub hints: Vec<String>,
    #[ts(type = "Record<string, unknown>")]
    pub implicit_parameters: HashMap<String, serde_json::Value>,
}

impl IntentContext {
    /// Coarse identity of the context for caching: session, user, directory, last two commands
    pub fn fingerprint(&self) -> String {
        let recent: Vec<&str> = self
            .recent_commands
            .iter()
            .rev()
            .take(2)
            .map(String::as_str)
            .collect();
        format!(
            "{}|{}|{}|{}",
            self.session_id,
            self.user_id,
            self.current_directory.as_deref().unwrap_or(""),
            recent.join("||")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeTool {
    pub tool_name: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Structured tool call produced from an utterance
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    pub tool_name: String,
    pub confidence: f64,
    #[ts(type = "Record<string, unknown>")]
    pub parameters: HashMap<String, serde_json::Value>,
    pub risk_level: RiskLevel,
    pub requires_confirmation: bool,
    pub reasoning: String,
    pub alternatives: Vec<AlternativeTool>,
    pub risk: RiskAssessment,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIntent {
    #[serde(alias = "tool_name", alias = "tool")]
    tool_name: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "params", alias = "arguments")]
    parameters: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, alias = "risk_level")]
    risk_level: Option<String>,
    #[serde(default, alias = "rationale", alias = "reason")]
    reasoning: Option<String>,
    #[serde(default)]
    alternatives: Option<Vec<RawAlternative>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAlternative {
    #[serde(alias = "tool_name", alias = "tool")]
    tool_name: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "rationale", alias = "reason")]
    reasoning: Option<String>,
}

/// Slice out the JSON object of an LLM reply, tolerating code fences and prose
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn clamp_confidence(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

pub struct IntentResolver {
    config: IntentConfig,
    service: Arc<dyn IntentService>,
    dictionary: SharedDictionary,
    cache: IntentCache,
    classifier: RiskClassifier,
}

impl IntentResolver {
    pub fn new(
        config: IntentConfig,
        service: Arc<dyn IntentService>,
        dictionary: SharedDictionary,
        classifier: RiskClassifier,
    ) -> Self {
        let cache = IntentCache::new(config.cache_capacity, config.cache_ttl_secs);
        Self {
            config,
            service,
            dictionary,
            cache,
            classifier,
        }
    }

    pub async fn dictionary(&self) -> Result<Arc<ToolDictionary>> {
        self.dictionary.get().await
    }

    /// Resolve an utterance into a dictionary-valid tool call
    pub async fn resolve(&self, utterance: &str, ctx: &IntentContext) -> Result<IntentResult> {
        let dictionary = self.dictionary.get().await?;

        let key = CacheKey::new(&normalize_phrase(utterance), &ctx.fingerprint());
        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!("[INTENT] Cache hit for '{}'", utterance);
            return Ok((*cached).clone());
        }

        let system_prompt = build_system_prompt(&dictionary);
        let user_prompt = build_user_prompt(utterance, ctx);

        let started = std::time::Instant::now();
        let raw = tokio::time::timeout(
            Duration::from_millis(self.config.llm_timeout_ms),
            self.service.recognize(&system_prompt, &user_prompt),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                "[INTENT] {} did not answer within {}ms",
                self.service.name(),
                self.config.llm_timeout_ms
            );
            CommanderError::LlmTimeout(self.config.llm_timeout_ms)
        })??;

        tracing::debug!(
            "[INTENT] {} answered in {}ms",
            self.service.name(),
            started.elapsed().as_millis()
        );

        let result = self.interpret(&raw, utterance, ctx, &dictionary)?;
        self.cache.put(key, result.clone()).await;
        Ok(result)
    }

    fn interpret(
        &self,
        raw: &str,
        utterance: &str,
        ctx: &IntentContext,
        dictionary: &ToolDictionary,
    ) -> Result<IntentResult> {
        let parsed: RawIntent = serde_json::from_str(extract_json(raw))
            .map_err(|e| CommanderError::IntentParse(e.to_string()))?;

        let tool_name = parsed.tool_name.trim().to_string();
        let descriptor = dictionary
            .get(&tool_name)
            .ok_or_else(|| CommanderError::UnknownTool(tool_name.clone()))?;

        let mut parameters = parsed.parameters.unwrap_or_default();
        for (key, value) in &ctx.implicit_parameters {
            parameters.entry(key.clone()).or_insert_with(|| value.clone());
        }
        if DIRECTORY_PATH_TOOLS.contains(&tool_name.as_str()) && !parameters.contains_key("path") {
            if let Some(directory) = ctx
                .implicit_parameters
                .get("directory")
                .cloned()
                .or_else(|| ctx.current_directory.clone().map(serde_json::Value::String))
            {
                parameters.insert("path".to_string(), directory);
            }
        }

        let mut alternatives: Vec<AlternativeTool> = parsed
            .alternatives
            .unwrap_or_default()
            .into_iter()
            .filter(|alt| alt.tool_name != tool_name && dictionary.contains(&alt.tool_name))
            .map(|alt| AlternativeTool {
                tool_name: alt.tool_name,
                confidence: clamp_confidence(alt.confidence),
                reasoning: alt.reasoning.unwrap_or_default(),
            })
            .collect();
        alternatives.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let risk = self.classifier.assess(&tool_name, &parameters, utterance);
        let reported = parsed
            .risk_level
            .as_deref()
            .and_then(|level| level.parse::<RiskLevel>().ok())
            .unwrap_or_default();
        let risk_level = descriptor.risk_level.max(reported).max(risk.risk_level);
        let requires_confirmation = descriptor.requires_confirmation || risk.requires_confirmation;

        Ok(IntentResult {
            tool_name,
            confidence: clamp_confidence(parsed.confidence),
            parameters,
            risk_level,
            requires_confirmation,
            reasoning: parsed.reasoning.unwrap_or_default(),
            alternatives,
            risk,
        })
    }

    /// A mapping is usable only when the tool exists, confidence meets the minimum and
    /// every required parameter is present with its declared type
    pub fn accept(&self, result: &IntentResult, dictionary: &ToolDictionary) -> Result<()> {
        if !dictionary.contains(&result.tool_name) {
            return Err(CommanderError::UnknownTool(result.tool_name.clone()));
        }
        if result.confidence < self.config.min_confidence {
            return Err(CommanderError::LowConfidence {
                confidence: result.confidence,
                minimum: self.config.min_confidence,
            });
        }
        dictionary.validate_parameters(&result.tool_name, &result.parameters)
    }

    /// Resolve and accept, producing the immutable command for the rest of the pipeline
    pub async fn map_command(
        &self,
        utterance: &str,
        confidence: f64,
        ctx: &IntentContext,
    ) -> Result<(VoiceCommand, IntentResult)> {
        let dictionary = self.dictionary.get().await?;
        let result = self.resolve(utterance, ctx).await?;
        self.accept(&result, &dictionary)?;

        tracing::info!(
            "[INTENT] '{}' -> {} (confidence {:.2}, {} risk)",
            utterance,
            result.tool_name,
            result.confidence,
            result.risk_level
        );

        let command = VoiceCommand::new(utterance, confidence, &ctx.session_id, &ctx.user_id)
            .with_tool(&result.tool_name, result.parameters.clone())
            .with_risk(result.risk_level);
        Ok((command, result))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn invalidate_cache(&self) {
        self.cache.invalidate_all().await;
    }
}

fn build_system_prompt(dictionary: &ToolDictionary) -> String {
    format!(
        "You map spoken requests onto exactly one tool call.\n\
         Available tools:\n{}\n\n\
         Reply with a single JSON object: {{\"toolName\": string, \"confidence\": number between 0 and 1, \
         \"parameters\": object, \"riskLevel\": \"low\"|\"medium\"|\"high\", \"reasoning\": string, \
         \"alternatives\": [{{\"toolName\": string, \"confidence\": number, \"reasoning\": string}}]}}.\n\
         Only use tool names from the list.",
        dictionary.describe_for_prompt()
    )
}

fn build_user_prompt(utterance: &str, ctx: &IntentContext) -> String {
    let mut prompt = format!("Request: {}\n", utterance);
    if let Some(directory) = &ctx.current_directory {
        prompt.push_str(&format!("Current directory: {}\n", directory));
    }
    if !ctx.recent_commands.is_empty() {
        prompt.push_str(&format!("Recent commands: {}\n", ctx.recent_commands.join("; ")));
    }
    if !ctx.active_processes.is_empty() {
        prompt.push_str(&format!(
            "Active processes: {}\n",
            ctx.active_processes.join(", ")
        ));
    }
    for hint in &ctx.hints {
        prompt.push_str(&format!("Hint: {}\n", hint));
    }
    if !ctx.implicit_parameters.is_empty() {
        let implicit = serde_json::to_string(&ctx.implicit_parameters).unwrap_or_default();
        prompt.push_str(&format!("Implicit parameters: {}\n", implicit));
    }
    prompt
}
