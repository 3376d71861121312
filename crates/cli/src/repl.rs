//! Interactive REPL for Voice Commander
//!
//! Each line stands in for a recognised utterance. Confirmation prompts raised by the
//! pipeline are answered inline, the same way a spoken reply would be.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use colored::Colorize;
use commander::{
    confirmation::ConfirmationState,
    session::{CreateSessionOptions, SessionStatus},
    ResponseOutcome, VoiceCommander,
};
use rustyline::{error::ReadlineError, DefaultEditor};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use uuid::Uuid;

use crate::{config::Config, output::OutputHandler};

/// Typed input is as certain as speech recognition gets
const TYPED_CONFIDENCE: f64 = 1.0;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct VoiceRepl {
    commander: Arc<VoiceCommander>,
    config: Config,
    directory: String,
    session_id: Option<String>,
    output: OutputHandler,
    editor: DefaultEditor,
    offline: bool,
}

impl VoiceRepl {
    pub fn new(
        commander: Arc<VoiceCommander>,
        config: Config,
        directory: String,
        offline: bool,
    ) -> Result<Self> {
        let output = OutputHandler::new(config.cli.show_events);
        let mut editor = DefaultEditor::new()?;
        if editor.load_history(&config.history_path()).is_err() {
            tracing::debug!("No command history at {}", config.history_path().display());
        }

        Ok(Self {
            commander,
            config,
            directory,
            session_id: None,
            output,
            editor,
            offline,
        })
    }

    /// Run the interactive REPL until /exit or end of input
    pub async fn run(&mut self) -> Result<()> {
        let session_id = self.start_session().await?;
        self.output
            .print_banner(&session_id, &self.directory, self.offline);

        let listener = self.spawn_event_listener();

        loop {
            let prompt = self.build_prompt().await;
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = self.editor.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_command(input).await {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(e) => self.output.print_error(&e.to_string()),
                        }
                    } else if let Err(e) = self.process_input(input).await {
                        self.output.print_error(&e.to_string());
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "Use /exit to end the session".dimmed());
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    self.output.print_error(&format!("Input error: {}", e));
                    break;
                }
            }
        }

        listener.abort();
        self.shutdown().await
    }

    async fn start_session(&mut self) -> Result<String> {
        let state = self
            .commander
            .start_session(
                CreateSessionOptions::for_user(self.config.cli.user.clone())
                    .with_directory(self.directory.clone()),
            )
            .await?;
        let session_id = state.session_id.clone();
        self.session_id = Some(session_id.clone());

        // Sessions activate after a short initialization delay
        let limit = Duration::from_millis(self.commander.config().session.initialization_delay_ms)
            + Duration::from_secs(1);
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            let active = self
                .commander
                .sessions()
                .get_session(&session_id)
                .await
                .is_some_and(|s| s.status == SessionStatus::Active);
            if active {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        tracing::info!("Session {} started in {}", session_id, self.directory);
        Ok(session_id)
    }

    fn session_id(&self) -> Result<String> {
        self.session_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no session is running"))
    }

    fn spawn_event_listener(&self) -> JoinHandle<()> {
        let mut events = self.commander.subscribe();
        let output = OutputHandler::new(self.output.show_events);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => output.print_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Event listener skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn build_prompt(&self) -> String {
        let status = match &self.session_id {
            Some(id) => self
                .commander
                .sessions()
                .get_session(id)
                .await
                .map(|s| s.status),
            None => None,
        };
        match status {
            Some(SessionStatus::Active) | None => format!("{} ", "vcmd>".bright_cyan().bold()),
            Some(other) => format!("{} ", format!("vcmd [{}]>", other).yellow().bold()),
        }
    }

    /// Send one utterance through the pipeline, answering confirmation prompts as they appear
    async fn process_input(&mut self, input: &str) -> Result<()> {
        let session_id = self.session_id()?;
        let mut task = {
            let commander = self.commander.clone();
            let session_id = session_id.clone();
            let text = input.to_string();
            tokio::spawn(async move {
                commander
                    .process_utterance(&session_id, &text, TYPED_CONFIDENCE)
                    .await
            })
        };

        let mut prompted: Option<(Uuid, ConfirmationState)> = None;
        loop {
            tokio::select! {
                joined = &mut task => {
                    match joined? {
                        Ok(outcome) => self.output.print_outcome(&outcome),
                        Err(e) => {
                            tracing::debug!("Utterance failed: {}", e);
                            self.output.print_error(&e.voice_message());
                        }
                    }
                    return Ok(());
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    let Some(request) = self
                        .commander
                        .confirmations()
                        .get_pending_for_session(&session_id)
                        .await
                    else {
                        continue;
                    };
                    if prompted == Some((request.id, request.state)) {
                        continue;
                    }
                    prompted = Some((request.id, request.state));
                    self.output.print_confirmation_prompt(&request);

                    let reply = match self.editor.readline(&format!("{} ", "confirm>".bright_yellow())) {
                        Ok(line) => line,
                        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => "cancel".to_string(),
                        Err(e) => return Err(e.into()),
                    };

                    match self
                        .commander
                        .respond_to_confirmation(&session_id, reply.trim(), TYPED_CONFIDENCE)
                        .await
                    {
                        Ok(ResponseOutcome::ClarificationNeeded) | Ok(ResponseOutcome::RepeatNeeded) => {
                            self.output.print_warning("Please answer yes or no.");
                            prompted = None;
                        }
                        Ok(_) => {}
                        Err(e) => self.output.print_warning(&e.voice_message()),
                    }
                }
            }
        }
    }

    /// Handle slash commands; returns true when the REPL should exit
    async fn handle_command(&mut self, input: &str) -> Result<bool> {
        let session_id = self.session_id()?;
        let command = input.split_whitespace().next().unwrap_or_default();

        match command {
            "/help" | "/h" => self.print_help(),
            "/exit" | "/quit" | "/q" => return Ok(true),
            "/tools" => {
                let dictionary = self.commander.intent().dictionary().await?;
                let mut tools: Vec<_> = dictionary.iter().collect();
                tools.sort_by(|a, b| a.name.cmp(&b.name));
                self.output.print_tools_table(&tools);
            }
            "/context" => match self.commander.context().get_context(&session_id).await {
                Some(ctx) => self.output.print_context(&ctx),
                None => self.output.print_warning("No conversation context yet"),
            },
            "/history" => match self.commander.context().get_context(&session_id).await {
                Some(ctx) => self.output.print_history(&ctx),
                None => self.output.print_warning("No conversation context yet"),
            },
            "/session" => match self.commander.sessions().get_session(&session_id).await {
                Some(state) => self.output.print_session(&state),
                None => self.output.print_warning("Session has ended"),
            },
            "/pause" => {
                self.commander.sessions().pause_session(&session_id).await?;
                self.output.print_info("Session paused");
            }
            "/resume" => {
                self.commander.sessions().resume_session(&session_id).await?;
                self.output.print_success("Session resumed");
            }
            _ => self
                .output
                .print_warning(&format!("Unknown command: {} (try /help)", command)),
        }
        Ok(false)
    }

    fn print_help(&self) {
        self.output.print_header("Commands");
        let commands = [
            ("/tools", "List the tools commands can map to"),
            ("/context", "Show the conversation context"),
            ("/history", "Show commands run this session"),
            ("/session", "Show session state"),
            ("/pause", "Pause the session"),
            ("/resume", "Resume a paused session"),
            ("/exit", "End the session and quit"),
        ];
        for (name, description) in commands {
            println!("  {:<10} {}", name.bright_cyan(), description.dimmed());
        }
        println!();
        println!(
            "  {}",
            "Anything else is treated as a spoken command, e.g. \"read ./Cargo.toml\"".dimmed()
        );
        println!();
    }

    async fn shutdown(&mut self) -> Result<()> {
        let history = self.config.history_path();
        if let Some(parent) = history.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Err(e) = self.editor.save_history(&history) {
            tracing::warn!("Could not save command history: {}", e);
        }
        if let Some(session_id) = self.session_id.take() {
            let state = self
                .commander
                .end_session(&session_id, "user exited")
                .await?;
            self.output.print_info(&format!(
                "Session {} ended ({})",
                &state.session_id[..8.min(state.session_id.len())],
                state.status
            ));
        }
        Ok(())
    }
}
