//! Output formatting and terminal rendering

use colored::{ColoredString, Colorize};
use commander::{
    confirmation::ConfirmationState, context::ConversationContext, session::SessionState,
    CommandOutcome, ConfirmationRequest, RiskAssessment, RiskLevel, ToolDescriptor, VoiceEvent,
};

/// Colour a risk level the same way everywhere
pub fn risk_badge(level: RiskLevel) -> ColoredString {
    match level {
        RiskLevel::Low => level.as_str().bright_green(),
        RiskLevel::Medium => level.as_str().bright_yellow(),
        RiskLevel::High => level.as_str().bright_red().bold(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Output handler for terminal display
pub struct OutputHandler {
    pub show_events: bool,
}

impl OutputHandler {
    pub fn new(show_events: bool) -> Self {
        Self { show_events }
    }

    pub fn print_banner(&self, session_id: &str, directory: &str, offline: bool) {
        println!();
        println!("{}", "Voice Commander".bright_cyan().bold());
        println!("{}", "─".repeat(60).dimmed());
        println!(
            "  Session:   {}",
            session_id[..8.min(session_id.len())].dimmed()
        );
        println!("  Directory: {}", directory.bright_white());
        if offline {
            println!("  Intents:   {}", "offline keyword matching".yellow());
        }
        println!("  Tools:     {}", "dry run".yellow());
        println!();
        println!(
            "  {}",
            "Type what you would say, or /help for commands".dimmed()
        );
        println!();
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", format!("▶ {}", text).bright_yellow().bold());
        println!("{}", "─".repeat(60).dimmed());
    }

    pub fn print_success(&self, text: &str) {
        println!("{} {}", "✓".bright_green(), text.bright_white());
    }

    pub fn print_error(&self, text: &str) {
        println!("{} {}", "✗".bright_red(), text.bright_red());
    }

    pub fn print_warning(&self, text: &str) {
        println!("{} {}", "⚠".bright_yellow(), text.yellow());
    }

    pub fn print_info(&self, text: &str) {
        println!("{} {}", "ℹ".bright_blue(), text);
    }

    /// What the assistant would say out loud
    pub fn print_spoken(&self, text: &str) {
        println!("{} {}", "🔊".bright_cyan(), text.bright_white());
    }

    pub fn print_confirmation_prompt(&self, request: &ConfirmationRequest) {
        let round = match request.state {
            ConfirmationState::Pending => "confirmation required",
            ConfirmationState::PendingSecond => "second confirmation required",
        };
        println!();
        println!(
            "{} {} [{} risk, {}s]",
            "?".bright_yellow().bold(),
            round.bright_yellow(),
            risk_badge(request.risk_level),
            request.timeout_ms / 1000
        );
        self.print_spoken(&request.prompt);
    }

    pub fn print_outcome(&self, outcome: &CommandOutcome) {
        println!(
            "{} {} {}",
            "→".dimmed(),
            outcome.command.tool().bright_cyan(),
            serde_json::to_string(&outcome.command.parameters)
                .unwrap_or_default()
                .dimmed()
        );
        if let Some(execution) = &outcome.execution {
            if execution.success {
                self.print_success(&outcome.spoken_response);
            } else {
                self.print_error(&outcome.spoken_response);
            }
        } else {
            self.print_warning(&outcome.spoken_response);
        }
    }

    /// Progress events only; confirmation prompts are rendered by the REPL
    pub fn print_event(&self, event: &VoiceEvent) {
        if !self.show_events {
            return;
        }
        match event {
            VoiceEvent::OperationStillRunning {
                operation,
                elapsed_ms,
            } => println!(
                "{} {} still running ({}s)",
                "…".dimmed(),
                operation.tool_name,
                elapsed_ms / 1000
            ),
            VoiceEvent::OperationFailed { operation } => println!(
                "{} {} failed: {}",
                "✗".bright_red(),
                operation.tool_name,
                operation.message.as_deref().unwrap_or("unknown error")
            ),
            VoiceEvent::SessionTransitioned { transition, .. } => println!(
                "{} session {} → {}",
                "ℹ".bright_blue(),
                transition.from,
                transition.to
            ),
            _ => {}
        }
    }

    pub fn print_tools_table(&self, tools: &[&ToolDescriptor]) {
        println!();
        println!(
            "{}",
            format!("{:<26} {:<8} {:<8} {}", "Tool", "Risk", "Confirm", "Description")
                .bright_white()
                .bold()
        );
        println!("{}", "─".repeat(90).dimmed());

        for tool in tools {
            let confirm = if tool.requires_confirmation { "yes" } else { "-" };
            println!(
                "{:<26} {:<8} {:<8} {}",
                tool.name.bright_cyan(),
                risk_badge(tool.risk_level),
                confirm,
                truncate(&tool.description, 50).dimmed()
            );
        }
        println!();
    }

    pub fn print_assessment(&self, tool: &str, assessment: &RiskAssessment) {
        self.print_header(&format!("Risk assessment: {}", tool));
        println!("  Score:        {}", assessment.score);
        println!("  Level:        {}", risk_badge(assessment.risk_level));
        println!(
            "  Confirmation: {}",
            if assessment.requires_confirmation {
                "required".bright_yellow()
            } else {
                "not required".bright_green()
            }
        );
        if assessment.factors.is_empty() {
            println!("  Factors:      {}", "none".dimmed());
        } else {
            println!("  Factors:");
            for factor in &assessment.factors {
                println!("    - {}", factor);
            }
        }
        println!();
    }

    pub fn print_context(&self, ctx: &ConversationContext) {
        self.print_header("Conversation context");
        println!("  Directory:    {}", ctx.current_directory.bright_white());
        if !ctx.active_files.is_empty() {
            println!("  Active files:");
            for file in ctx.active_files.iter().rev().take(5) {
                println!("    - {}", file);
            }
        }
        let mut entities: Vec<_> = ctx.entities.values().collect();
        entities.sort_by(|a, b| b.last_referenced.cmp(&a.last_referenced));
        if !entities.is_empty() {
            println!("  Entities:");
            for entity in entities.into_iter().take(8) {
                println!(
                    "    {:<10} {} {}",
                    entity.entity_type.as_str().dimmed(),
                    entity.value,
                    format!("(x{}, {:.2})", entity.reference_count, entity.confidence).dimmed()
                );
            }
        }
        let processes = ctx.running_processes();
        if !processes.is_empty() {
            println!("  Processes:");
            for process in processes {
                println!("    {} {}", process.pid.bright_yellow(), process.command);
            }
        }
        println!();
    }

    pub fn print_session(&self, session: &SessionState) {
        self.print_header("Session");
        println!("  ID:            {}", session.session_id);
        println!("  User:          {}", session.user_id);
        println!("  Status:        {}", session.status.as_str().bright_cyan());
        println!(
            "  Directory:     {}",
            session.working_context.current_directory
        );
        println!("  Commands:      {} active", session.active_commands.len());
        println!(
            "  Confirmations: {} pending",
            session.pending_confirmations.len()
        );
        println!(
            "  Started:       {}",
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    pub fn print_history(&self, ctx: &ConversationContext) {
        self.print_header("Command history");
        if ctx.command_history.is_empty() {
            println!("  {}", "No commands yet".dimmed());
        }
        for record in &ctx.command_history {
            let mark = if record.success {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!(
                "  {} {} {} {}",
                mark,
                record.timestamp.format("%H:%M:%S").to_string().dimmed(),
                record.tool_name.bright_cyan(),
                truncate(&record.text, 60)
            );
        }
        println!();
    }
}
