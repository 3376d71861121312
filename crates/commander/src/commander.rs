//! The pipeline: utterance -> enrichment -> intent -> confirmation -> tool call -> context

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    command::VoiceCommand,
    config::CommanderConfig,
    confirmation::{ConfirmationGate, ConfirmationResult, ConfirmationWorkflow, ResponseOutcome},
    context::ContextManager,
    events::{EventBroadcaster, VoiceEvent},
    feedback::OperationTracker,
    intent::{IntentResolver, IntentResult, IntentService},
    mcp::{McpToolClient, ToolExecutionResult},
    risk::RiskClassifier,
    session::{
        ActiveCommand, CommandStatus, CreateSessionOptions, SessionState, SessionStateManager,
        SessionStatus, SessionUpdate,
    },
    tools::{DictionarySource, SharedDictionary},
    CommanderError, Result,
};

/// Everything that happened to one utterance
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub command: VoiceCommand,
    pub intent: IntentResult,
    pub confirmation: ConfirmationResult,
    /// Absent when the command was not confirmed
    pub execution: Option<ToolExecutionResult>,
    pub spoken_response: String,
}

impl CommandOutcome {
    pub fn executed(&self) -> bool {
        self.execution.is_some()
    }
}

pub struct VoiceCommander {
    config: CommanderConfig,
    events: EventBroadcaster,
    sessions: Arc<SessionStateManager>,
    context: Arc<ContextManager>,
    intent: Arc<IntentResolver>,
    confirmations: Arc<ConfirmationWorkflow>,
    feedback: Arc<OperationTracker>,
    tool_client: Arc<dyn McpToolClient>,
}

impl VoiceCommander {
    pub fn new(
        config: CommanderConfig,
        intent_service: Arc<dyn IntentService>,
        tool_client: Arc<dyn McpToolClient>,
    ) -> Self {
        let events = EventBroadcaster::new();
        let dictionary =
            SharedDictionary::new(DictionarySource::from_config(config.intent.dictionary_path.as_deref()));

        let intent = IntentResolver::new(
            config.intent.clone(),
            intent_service,
            dictionary.clone(),
            RiskClassifier::new(config.risk.clone()),
        );
        let confirmations =
            ConfirmationWorkflow::new(config.confirmation.clone(), dictionary, events.clone());

        Self {
            sessions: Arc::new(SessionStateManager::new(config.session.clone(), events.clone())),
            context: Arc::new(ContextManager::new(config.context.clone(), events.clone())),
            intent: Arc::new(intent),
            confirmations: Arc::new(confirmations),
            feedback: Arc::new(OperationTracker::new(config.feedback.clone(), events.clone())),
            tool_client,
            events,
            config,
        }
    }

    /// Load the tool dictionary up front so the first utterance does not pay for it
    pub async fn warm_up(&self) -> Result<()> {
        let dictionary = self.intent.dictionary().await?;
        tracing::info!("[COMMANDER] Ready with {} tools", dictionary.len());
        Ok(())
    }

    /// Start every periodic sweep. Safe to call more than once.
    pub fn start_background_tasks(&self) {
        self.confirmations.start_cleanup_task();
        self.context.start_cleanup_task();
        self.sessions.start_cleanup_task();
    }

    pub async fn start_session(&self, options: CreateSessionOptions) -> Result<SessionState> {
        let state = self.sessions.create_session(options).await?;
        self.context
            .get_or_create_context(
                &state.session_id,
                &state.user_id,
                &state.working_context.current_directory,
            )
            .await;
        Ok(state)
    }

    /// Cancel outstanding confirmations, terminate the session and drop its context
    pub async fn end_session(&self, session_id: &str, reason: &str) -> Result<SessionState> {
        let cancelled = self.confirmations.cancel_session(session_id).await;
        if cancelled > 0 {
            tracing::info!(
                "[COMMANDER] Cancelled {} confirmations for {}",
                cancelled,
                session_id
            );
        }
        let state = self.sessions.terminate_session(session_id, reason).await?;
        self.context.remove_context(session_id).await;
        Ok(state)
    }

    /// Run one recognised utterance through the full pipeline
    pub async fn process_utterance(
        &self,
        session_id: &str,
        text: &str,
        confidence: f64,
    ) -> Result<CommandOutcome> {
        match self.run_pipeline(session_id, text, confidence).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_validation() {
                    tracing::warn!("[COMMANDER] '{}' rejected: {}", text, e);
                } else {
                    tracing::error!("[COMMANDER] '{}' failed: {}", text, e);
                }
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        session_id: &str,
        text: &str,
        confidence: f64,
    ) -> Result<CommandOutcome> {
        let session = self
            .sessions
            .get_session(session_id)
            .await
            .ok_or_else(|| CommanderError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Active {
            return Err(CommanderError::Validation(format!(
                "session is {}",
                session.status
            )));
        }
        self.sessions.touch(session_id).await?;

        self.context
            .get_or_create_context(
                session_id,
                &session.user_id,
                &session.working_context.current_directory,
            )
            .await;
        let enriched = self.context.enrich(session_id, text, confidence).await?;
        let intent_context = self.context.intent_context(session_id, &enriched).await?;
        let (command, intent) = self
            .intent
            .map_command(&enriched.enriched_text, enriched.confidence, &intent_context)
            .await?;

        let tool = command.tool().to_string();
        if session.security.is_restricted(&tool) {
            return Err(CommanderError::Validation(format!(
                "{} is restricted for this session",
                tool
            )));
        }

        self.sessions
            .add_active_command(session_id, ActiveCommand::new(command.id, &command.text, &tool))
            .await?;

        let confirmation = match self.gate(session_id, &command, &intent).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                self.finish_command(session_id, command.id, CommandStatus::Failed, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        if !confirmation.confirmed {
            self.finish_command(
                session_id,
                command.id,
                CommandStatus::Failed,
                Some(format!("not confirmed: {:?}", confirmation.outcome)),
            )
            .await;
            let spoken_response = declined_response(&confirmation);
            return Ok(CommandOutcome {
                command,
                intent,
                confirmation,
                execution: None,
                spoken_response,
            });
        }

        // The session may have been paused or ended while the user was deciding
        let status = self.sessions.get_session(session_id).await.map(|s| s.status);
        if status != Some(SessionStatus::Active) {
            let error = match status {
                Some(status) => CommanderError::Validation(format!("session is {}", status)),
                None => CommanderError::SessionNotFound(session_id.to_string()),
            };
            self.finish_command(session_id, command.id, CommandStatus::Failed, Some(error.to_string()))
                .await;
            return Err(error);
        }

        self.sessions
            .update_active_command(session_id, command.id, CommandStatus::Running, None)
            .await?;

        let description = format!("{} ({})", tool.replace('_', " "), command.text);
        let execution = match self
            .feedback
            .track(
                session_id,
                &tool,
                &description,
                self.tool_client.call_tool(&tool, &command.parameters),
            )
            .await
        {
            Ok(execution) => execution,
            Err(e) => {
                self.finish_command(session_id, command.id, CommandStatus::Failed, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        self.context
            .update_context(session_id, &command, &execution)
            .await?;
        self.sync_working_directory(session_id, &session).await?;

        let (status, error) = if execution.success {
            (CommandStatus::Completed, None)
        } else {
            (CommandStatus::Failed, execution.error.clone())
        };
        self.finish_command(session_id, command.id, status, error).await;

        let spoken_response = execution.summary();
        Ok(CommandOutcome {
            command,
            intent,
            confirmation,
            execution: Some(execution),
            spoken_response,
        })
    }

    /// Confirmation step. The pending id is recorded on the session while the user decides.
    async fn gate(
        &self,
        session_id: &str,
        command: &VoiceCommand,
        intent: &IntentResult,
    ) -> Result<ConfirmationResult> {
        let pending = match self.confirmations.begin(command, Some(&intent.risk)).await? {
            ConfirmationGate::AutoApproved(result) => return Ok(result),
            ConfirmationGate::Pending(pending) => pending,
        };

        let confirmation_id = pending.id();
        self.sessions
            .add_pending_confirmation(session_id, confirmation_id)
            .await?;
        self.sessions
            .update_active_command(
                session_id,
                command.id,
                CommandStatus::AwaitingConfirmation,
                None,
            )
            .await?;

        let result = pending.wait().await;

        // The session may have ended while we waited
        if let Err(e) = self
            .sessions
            .remove_pending_confirmation(session_id, confirmation_id)
            .await
        {
            tracing::debug!("[COMMANDER] Pending confirmation cleanup skipped: {}", e);
        }
        Ok(result)
    }

    async fn finish_command(
        &self,
        session_id: &str,
        command_id: Uuid,
        status: CommandStatus,
        error: Option<String>,
    ) {
        if let Err(e) = self
            .sessions
            .update_active_command(session_id, command_id, status, error)
            .await
        {
            tracing::debug!("[COMMANDER] Command {} not updated: {}", command_id, e);
        }
    }

    /// Carry a directory change made by the tool over to the session record
    async fn sync_working_directory(&self, session_id: &str, session: &SessionState) -> Result<()> {
        let Some(context) = self.context.get_context(session_id).await else {
            return Ok(());
        };
        if context.current_directory != session.working_context.current_directory {
            self.sessions
                .update_session_state(
                    session_id,
                    SessionUpdate::directory(context.current_directory.clone()),
                )
                .await?;
        }
        Ok(())
    }

    /// Route a spoken reply to the session's oldest pending confirmation
    pub async fn respond_to_confirmation(
        &self,
        session_id: &str,
        text: &str,
        confidence: f64,
    ) -> Result<ResponseOutcome> {
        let pending = self
            .confirmations
            .get_pending_for_session(session_id)
            .await
            .ok_or_else(|| {
                CommanderError::Validation(format!(
                    "no confirmation is pending for session {}",
                    session_id
                ))
            })?;
        self.confirmations
            .handle_confirmation_response(pending.id, text, confidence)
            .await
    }

    pub async fn has_pending_confirmation(&self, session_id: &str) -> bool {
        self.confirmations
            .get_pending_for_session(session_id)
            .await
            .is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &CommanderConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn sessions(&self) -> &Arc<SessionStateManager> {
        &self.sessions
    }

    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn intent(&self) -> &Arc<IntentResolver> {
        &self.intent
    }

    pub fn confirmations(&self) -> &Arc<ConfirmationWorkflow> {
        &self.confirmations
    }

    pub fn feedback(&self) -> &Arc<OperationTracker> {
        &self.feedback
    }
}

fn declined_response(result: &ConfirmationResult) -> String {
    use crate::confirmation::ConfirmationOutcome::*;
    match result.outcome {
        Rejected | Cancelled => "Okay, I won't do that.".to_string(),
        Timeout | Expired => "I didn't hear a confirmation, so I cancelled that.".to_string(),
        Confirmed | AutoApproved => String::new(),
    }
}
