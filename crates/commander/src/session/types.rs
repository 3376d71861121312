use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::snapshot::SessionSnapshot;
use crate::{context::UserPreferences, risk::RiskLevel, CommanderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Active,
    Paused,
    Suspended,
    Recovered,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Suspended => "suspended",
            SessionStatus::Recovered => "recovered",
            SessionStatus::Terminated => "terminated",
        }
    }

    /// Edges of the lifecycle graph. `Terminated` is absorbing.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initializing, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Suspended)
                | (Suspended, Recovered)
                | (Recovered, Active)
                | (Initializing | Active | Paused | Suspended | Recovered, Terminated)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == SessionStatus::Terminated
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = CommanderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "initializing" => Ok(SessionStatus::Initializing),
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "suspended" => Ok(SessionStatus::Suspended),
            "recovered" => Ok(SessionStatus::Recovered),
            "terminated" => Ok(SessionStatus::Terminated),
            other => Err(CommanderError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Set for transitions the manager makes on its own (auto-activation, expiry)
    pub automatic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSettings {
    pub language: String,
    pub voice: String,
    pub speech_rate: f32,
    pub wake_word: Option<String>,
    pub spoken_confirmations: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            voice: "default".to_string(),
            speech_rate: 1.0,
            wake_word: None,
            spoken_confirmations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct WorkingContext {
    pub current_directory: String,
    pub active_files: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub permissions: Vec<String>,
    pub risk_tolerance: RiskLevel,
    pub restricted_operations: Vec<String>,
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self {
            permissions: vec!["read".to_string(), "write".to_string(), "execute".to_string()],
            risk_tolerance: RiskLevel::Medium,
            restricted_operations: Vec::new(),
        }
    }
}

impl SecurityContext {
    pub fn is_restricted(&self, tool_name: &str) -> bool {
        self.restricted_operations.iter().any(|op| op == tool_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    AwaitingConfirmation,
    Running,
    /// Parked by a pause; resumes without re-execution
    Waiting,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            CommandStatus::Pending | CommandStatus::AwaitingConfirmation | CommandStatus::Running
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCommand {
    pub command_id: Uuid,
    pub text: String,
    pub tool_name: String,
    pub status: CommandStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ActiveCommand {
    pub fn new(command_id: Uuid, text: &str, tool_name: &str) -> Self {
        let now = Utc::now();
        Self {
            command_id,
            text: text.to_string(),
            tool_name: tool_name.to_string(),
            status: CommandStatus::Pending,
            started_at: now,
            updated_at: now,
            error: None,
        }
    }
}

/// Health of one MCP server the session talks to
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct McpConnection {
    pub server: String,
    pub healthy: bool,
    pub last_checked: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryData {
    pub last_known_good: Option<SessionSnapshot>,
    pub interrupted_operations: Vec<ActiveCommand>,
    pub pending_changes: Vec<String>,
    pub error_log: Vec<String>,
    pub suspended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceLevel {
    None,
    #[default]
    Memory,
    Durable,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub voice_settings: VoiceSettings,
    pub working_context: WorkingContext,
    pub preferences: UserPreferences,
    pub security: SecurityContext,
    pub active_commands: Vec<ActiveCommand>,
    pub pending_confirmations: Vec<Uuid>,
    pub mcp_connections: HashMap<String, McpConnection>,
    pub recovery: RecoveryData,
    pub persistence: PersistenceLevel,
    pub metadata: HashMap<String, String>,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn active_command(&self, command_id: Uuid) -> Option<&ActiveCommand> {
        self.active_commands.iter().find(|c| c.command_id == command_id)
    }

    /// Fields whose change warrants a snapshot
    pub(crate) fn snapshot_key(&self) -> (SessionStatus, String, usize, usize) {
        (
            self.status,
            self.working_context.current_directory.clone(),
            self.active_commands.len(),
            self.mcp_connections.len(),
        )
    }
}

/// Partial update applied by `update_session_state`
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub current_directory: Option<String>,
    pub active_files: Option<Vec<String>>,
    pub voice_settings: Option<VoiceSettings>,
    pub security: Option<SecurityContext>,
    pub persistence: Option<PersistenceLevel>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            current_directory: Some(path.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    pub user_id: String,
    /// Generated when absent
    pub session_id: Option<String>,
    pub current_directory: Option<String>,
    pub voice_settings: Option<VoiceSettings>,
    pub security: Option<SecurityContext>,
    pub persistence: PersistenceLevel,
    /// Prior session whose preferences and working context are copied
    pub inherit_from: Option<String>,
}

impl CreateSessionOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_directory(mut self, path: impl Into<String>) -> Self {
        self.current_directory = Some(path.into());
        self
    }

    pub fn inheriting(mut self, session_id: impl Into<String>) -> Self {
        self.inherit_from = Some(session_id.into());
        self
    }

    pub fn with_persistence(mut self, persistence: PersistenceLevel) -> Self {
        self.persistence = persistence;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub active_commands: usize,
    pub pending_confirmations: usize,
    pub snapshots: usize,
}
