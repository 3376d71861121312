//! End-to-end scenarios for the voice command pipeline

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::{
    config::CommanderConfig,
    confirmation::{ConfirmationOutcome, ResponseOutcome},
    intent::{IntentService, ProviderError},
    mcp::{McpToolClient, ToolExecutionResult},
    session::{CommandStatus, CreateSessionOptions, SessionStatus},
    CommanderError, Result, VoiceCommander,
};

/// Maps "<verb> <target>" requests onto tool calls the way a well-behaved LLM would
struct VerbIntentService;

#[async_trait]
impl IntentService for VerbIntentService {
    fn name(&self) -> &str {
        "verb"
    }

    async fn recognize(&self, _system: &str, user: &str) -> std::result::Result<String, ProviderError> {
        let request = user
            .lines()
            .find_map(|line| line.strip_prefix("Request: "))
            .unwrap_or_default();
        let mut words = request.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let target = words.last().unwrap_or_default();

        let (tool, parameters) = match verb {
            "read" => ("read_file", json!({ "path": target })),
            "delete" => ("delete_file", json!({ "path": target })),
            "list" => ("list_directory", json!({ "path": target })),
            "teleport" => ("teleport", json!({})),
            _ => ("get_config", json!({})),
        };
        Ok(json!({
            "toolName": tool,
            "confidence": 0.92,
            "parameters": parameters,
            "reasoning": format!("user said {}", verb),
        })
        .to_string())
    }
}

#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<(String, HashMap<String, Value>)>>,
    fail_with: Option<String>,
}

impl RecordingClient {
    fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    async fn tools_called(&self) -> Vec<String> {
        self.calls.lock().await.iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl McpToolClient for RecordingClient {
    async fn call_tool(
        &self,
        name: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<ToolExecutionResult> {
        self.calls
            .lock()
            .await
            .push((name.to_string(), parameters.clone()));
        match &self.fail_with {
            Some(message) => Err(CommanderError::ToolExecution(message.clone())),
            None => Ok(ToolExecutionResult::ok(json!({ "tool": name }))),
        }
    }
}

fn commander(client: Arc<RecordingClient>) -> Arc<VoiceCommander> {
    let mut config = CommanderConfig::default();
    config.session.initialization_delay_ms = 1;
    Arc::new(VoiceCommander::new(config, Arc::new(VerbIntentService), client))
}

async fn active_session(commander: &VoiceCommander) -> String {
    let state = commander
        .start_session(CreateSessionOptions::for_user("u1").with_directory("/home/u1"))
        .await
        .unwrap();
    for _ in 0..200 {
        let current = commander.sessions().get_session(&state.session_id).await.unwrap();
        if current.status == SessionStatus::Active {
            return state.session_id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never became active");
}

async fn wait_for_pending(commander: &VoiceCommander, session_id: &str) {
    for _ in 0..200 {
        if commander.has_pending_confirmation(session_id).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no confirmation became pending");
}

#[tokio::test]
async fn test_low_risk_command_runs_without_confirmation() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());
    commander.warm_up().await.unwrap();
    let session_id = active_session(&commander).await;

    let outcome = commander
        .process_utterance(&session_id, "read /home/u1/notes.txt", 0.95)
        .await
        .unwrap();

    assert_eq!(outcome.confirmation.outcome, ConfirmationOutcome::AutoApproved);
    assert!(outcome.executed());
    assert_eq!(client.tools_called().await, vec!["read_file"]);

    let context = commander.context().get_context(&session_id).await.unwrap();
    assert!(context.active_files.contains(&"/home/u1/notes.txt".to_string()));
    let session = commander.sessions().get_session(&session_id).await.unwrap();
    assert!(session.active_commands.is_empty());
}

#[tokio::test]
async fn test_pronoun_then_double_confirmation() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());
    let session_id = active_session(&commander).await;

    commander
        .process_utterance(&session_id, "read /home/u1/notes.txt", 0.95)
        .await
        .unwrap();

    let task = {
        let commander = commander.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { commander.process_utterance(&session_id, "delete it", 0.95).await })
    };
    wait_for_pending(&commander, &session_id).await;

    let session = commander.sessions().get_session(&session_id).await.unwrap();
    assert_eq!(session.pending_confirmations.len(), 1);
    assert_eq!(
        session.active_commands[0].status,
        CommandStatus::AwaitingConfirmation
    );

    assert_eq!(
        commander
            .respond_to_confirmation(&session_id, "yes", 0.95)
            .await
            .unwrap(),
        ResponseOutcome::AwaitingSecondConfirmation
    );
    assert_eq!(
        commander
            .respond_to_confirmation(&session_id, "confirm", 0.95)
            .await
            .unwrap(),
        ResponseOutcome::Resolved { confirmed: true }
    );

    let outcome = task.await.unwrap().unwrap();
    assert!(outcome.executed());
    assert_eq!(outcome.command.parameters["path"], json!("/home/u1/notes.txt"));
    assert_eq!(client.tools_called().await, vec!["read_file", "delete_file"]);

    let session = commander.sessions().get_session(&session_id).await.unwrap();
    assert!(session.pending_confirmations.is_empty());
    let context = commander.context().get_context(&session_id).await.unwrap();
    assert!(!context.active_files.contains(&"/home/u1/notes.txt".to_string()));
}

#[tokio::test]
async fn test_sensitive_read_waits_for_confirmation() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());
    let session_id = active_session(&commander).await;

    let task = {
        let commander = commander.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { commander.process_utterance(&session_id, "read /etc/shadow", 0.95).await })
    };
    wait_for_pending(&commander, &session_id).await;
    assert!(client.tools_called().await.is_empty());

    assert_eq!(
        commander
            .respond_to_confirmation(&session_id, "yes", 0.95)
            .await
            .unwrap(),
        ResponseOutcome::Resolved { confirmed: true }
    );

    let outcome = task.await.unwrap().unwrap();
    assert!(outcome.intent.requires_confirmation);
    assert_eq!(outcome.confirmation.outcome, ConfirmationOutcome::Confirmed);
    assert_eq!(client.tools_called().await, vec!["read_file"]);
}

#[tokio::test]
async fn test_rejected_command_never_reaches_the_tool() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());
    let session_id = active_session(&commander).await;

    let task = {
        let commander = commander.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            commander
                .process_utterance(&session_id, "delete /tmp/report.txt", 0.9)
                .await
        })
    };
    wait_for_pending(&commander, &session_id).await;
    commander
        .respond_to_confirmation(&session_id, "no", 0.9)
        .await
        .unwrap();

    let outcome = task.await.unwrap().unwrap();
    assert!(!outcome.executed());
    assert_eq!(outcome.confirmation.outcome, ConfirmationOutcome::Rejected);
    assert_eq!(outcome.spoken_response, "Okay, I won't do that.");
    assert!(client.tools_called().await.is_empty());
    assert_eq!(commander.confirmations().security_audit_trail().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_confirmation_times_out() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());
    let session_id = active_session(&commander).await;

    let outcome = commander
        .process_utterance(&session_id, "delete /tmp/report.txt", 0.9)
        .await
        .unwrap();

    assert_eq!(outcome.confirmation.outcome, ConfirmationOutcome::Timeout);
    assert_eq!(outcome.confirmation.user_response, "timeout");
    assert!(!outcome.executed());
    assert!(client.tools_called().await.is_empty());
}

#[tokio::test]
async fn test_ending_session_cancels_pending_confirmation() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());
    let session_id = active_session(&commander).await;

    let task = {
        let commander = commander.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            commander
                .process_utterance(&session_id, "delete /tmp/report.txt", 0.9)
                .await
        })
    };
    wait_for_pending(&commander, &session_id).await;

    let state = commander.end_session(&session_id, "user left").await.unwrap();
    assert_eq!(state.status, SessionStatus::Terminated);

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.confirmation.outcome, ConfirmationOutcome::Cancelled);
    assert!(client.tools_called().await.is_empty());
    assert!(commander.context().get_context(&session_id).await.is_none());
}

#[tokio::test]
async fn test_confirmation_after_pause_does_not_run_the_tool() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());
    let session_id = active_session(&commander).await;

    let task = {
        let commander = commander.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { commander.process_utterance(&session_id, "read /etc/shadow", 0.95).await })
    };
    wait_for_pending(&commander, &session_id).await;
    commander.sessions().pause_session(&session_id).await.unwrap();

    assert_eq!(
        commander
            .respond_to_confirmation(&session_id, "yes", 0.95)
            .await
            .unwrap(),
        ResponseOutcome::Resolved { confirmed: true }
    );

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, CommanderError::Validation(message) if message.contains("paused")));
    assert!(client.tools_called().await.is_empty());

    let session = commander.sessions().get_session(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert!(session.active_commands.is_empty());
}

#[tokio::test]
async fn test_listing_moves_session_directory() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());
    let session_id = active_session(&commander).await;

    commander
        .process_utterance(&session_id, "list /srv/app", 0.9)
        .await
        .unwrap();

    let session = commander.sessions().get_session(&session_id).await.unwrap();
    assert_eq!(session.working_context.current_directory, "/srv/app");
}

#[tokio::test]
async fn test_validation_failures() {
    let client = Arc::new(RecordingClient::default());
    let commander = commander(client.clone());

    let err = commander
        .process_utterance("missing", "read /etc/hosts", 0.9)
        .await
        .unwrap_err();
    assert!(matches!(err, CommanderError::SessionNotFound(_)));
    assert!(!err.voice_message().is_empty());

    let session_id = active_session(&commander).await;
    let err = commander
        .process_utterance(&session_id, "teleport me", 0.9)
        .await
        .unwrap_err();
    assert!(matches!(err, CommanderError::UnknownTool(_)));

    commander.sessions().pause_session(&session_id).await.unwrap();
    let err = commander
        .process_utterance(&session_id, "read /etc/hosts", 0.9)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert!(commander
        .respond_to_confirmation(&session_id, "yes", 1.0)
        .await
        .is_err());
    assert!(client.tools_called().await.is_empty());
}

#[tokio::test]
async fn test_tool_failure_is_recorded() {
    let client = Arc::new(RecordingClient::failing("server unreachable"));
    let commander = commander(client.clone());
    let session_id = active_session(&commander).await;
    let mut events = commander.subscribe();

    let err = commander
        .process_utterance(&session_id, "read /home/u1/notes.txt", 0.9)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "tool_execution_error");

    let session = commander.sessions().get_session(&session_id).await.unwrap();
    assert!(session.active_commands.is_empty());
    assert!(session.recovery.error_log[0].contains("server unreachable"));

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind());
    }
    assert!(kinds.contains(&"operationFailed"));
}
