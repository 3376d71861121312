//! # Voice Commander
//!
//! Risk-gated execution of spoken commands against MCP tool servers.
//!
//! An utterance flows through the crate like this:
//!
//! ```text
//! utterance ─▶ ContextManager::enrich ─▶ IntentResolver::map_command ─▶ ConfirmationWorkflow
//!                                                                          │
//!        SessionStateManager ◀─ ContextManager::update ◀─ McpToolClient ◀──┘
//!                                     (OperationTracker reports long runs)
//! ```
//!
//! The LLM intent service and the MCP tool client are collaborators behind the
//! [`intent::IntentService`] and [`mcp::McpToolClient`] traits; this crate never
//! speaks their transports.

pub mod commander;
pub mod command;
pub mod config;
pub mod confirmation;
pub mod context;
pub mod events;
pub mod feedback;
pub mod intent;
pub mod mcp;
pub mod risk;
pub mod session;
pub mod similarity;
pub mod tools;

#[cfg(test)]
mod commander_tests;

pub use command::VoiceCommand;
pub use commander::{CommandOutcome, VoiceCommander};
pub use config::CommanderConfig;
pub use confirmation::{
    ConfirmationGate, ConfirmationOutcome, ConfirmationRequest, ConfirmationResult,
    ConfirmationWorkflow, ResponseOutcome,
};
pub use context::{ContextManager, ConversationContext, EnrichedCommand, EntityReference, EntityType};
pub use events::{EventBroadcaster, VoiceEvent};
pub use feedback::{OperationState, OperationStatus, OperationTracker};
pub use intent::{IntentContext, IntentResolver, IntentResult, IntentService, ProviderError};
pub use mcp::{McpToolClient, ToolExecutionResult};
pub use risk::{RiskAssessment, RiskClassifier, RiskLevel};
pub use session::{SessionState, SessionStateManager, SessionStatus};
pub use tools::{ToolDescriptor, ToolDictionary};

use uuid::Uuid;

/// Main error type for Voice Commander operations
#[derive(Debug, thiserror::Error)]
pub enum CommanderError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Confirmation not found or expired: {0}")]
    ConfirmationNotFound(Uuid),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid session status: {0}")]
    InvalidStatus(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Intent confidence {confidence:.2} is below the required {minimum:.2}")]
    LowConfidence { confidence: f64, minimum: f64 },

    #[error("LLM request timed out after {0}ms")]
    LlmTimeout(u64),

    #[error("LLM error: {0}")]
    Llm(#[from] ProviderError),

    #[error("Could not parse intent response: {0}")]
    IntentParse(String),

    #[error("Tool dictionary load failed: {0}")]
    DictionaryLoad(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CommanderError {
    /// Stable machine-readable code for the error
    pub fn code(&self) -> &'static str {
        match self {
            CommanderError::SessionNotFound(_) => "session_not_found",
            CommanderError::ConfirmationNotFound(_) => "confirmation_not_found",
            CommanderError::UnknownTool(_) => "unknown_tool",
            CommanderError::InvalidTransition { .. } => "invalid_transition",
            CommanderError::InvalidStatus(_) => "invalid_status",
            CommanderError::Validation(_) => "validation_error",
            CommanderError::LowConfidence { .. } => "low_confidence",
            CommanderError::LlmTimeout(_) => "llm_timeout",
            CommanderError::Llm(_) => "llm_error",
            CommanderError::IntentParse(_) => "intent_parse_error",
            CommanderError::DictionaryLoad(_) => "dictionary_load_error",
            CommanderError::ToolExecution(_) => "tool_execution_error",
            CommanderError::ConfigError(_) => "config_error",
            CommanderError::IoError(_) => "io_error",
            CommanderError::SerializationError(_) => "serialization_error",
        }
    }

    /// Validation errors are caused by the caller and are never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CommanderError::SessionNotFound(_)
                | CommanderError::ConfirmationNotFound(_)
                | CommanderError::UnknownTool(_)
                | CommanderError::InvalidTransition { .. }
                | CommanderError::InvalidStatus(_)
                | CommanderError::Validation(_)
                | CommanderError::LowConfidence { .. }
        )
    }

    /// Message suitable for speech playback
    pub fn voice_message(&self) -> String {
        match self {
            CommanderError::SessionNotFound(_) => {
                "I couldn't find your voice session. Please start a new one.".to_string()
            }
            CommanderError::ConfirmationNotFound(_) => {
                "That confirmation has already expired. Please repeat the command.".to_string()
            }
            CommanderError::UnknownTool(tool) => {
                format!("I don't know how to do that. There is no tool called {}.", tool)
            }
            CommanderError::InvalidTransition { to, .. } => {
                format!("The session can't be {} right now.", to)
            }
            CommanderError::InvalidStatus(status) => {
                format!("{} is not a valid session state.", status)
            }
            CommanderError::Validation(message) => format!("That request isn't valid: {}.", message),
            CommanderError::LowConfidence { .. } => {
                "I'm not sure what you meant. Could you rephrase that?".to_string()
            }
            CommanderError::LlmTimeout(_) => {
                "Understanding that took too long. Please try again.".to_string()
            }
            CommanderError::Llm(_) | CommanderError::IntentParse(_) => {
                "I had trouble understanding that command. Please try again.".to_string()
            }
            CommanderError::DictionaryLoad(_) => {
                "My list of available tools isn't ready yet. Please try again shortly.".to_string()
            }
            CommanderError::ToolExecution(message) => {
                format!("The command failed: {}.", message)
            }
            CommanderError::ConfigError(_)
            | CommanderError::IoError(_)
            | CommanderError::SerializationError(_) => {
                "Something went wrong on my side. Please try again.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CommanderError>;

/// Build a commander from configuration and the two collaborators
pub async fn initialize_commander(
    config: CommanderConfig,
    intent_service: std::sync::Arc<dyn IntentService>,
    tool_client: std::sync::Arc<dyn McpToolClient>,
) -> Result<VoiceCommander> {
    tracing::info!("Initializing Voice Commander...");

    let commander = VoiceCommander::new(config, intent_service, tool_client);
    commander.warm_up().await?;

    tracing::info!("Voice Commander initialized successfully");
    Ok(commander)
}
