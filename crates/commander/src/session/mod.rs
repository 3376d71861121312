//! Session State Manager - lifecycle state machine, snapshots and recovery for voice sessions

pub mod snapshot;
pub mod types;

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use snapshot::{SessionSnapshot, SnapshotContent, SnapshotRing};
pub use types::{
    ActiveCommand, CommandStatus, CreateSessionOptions, McpConnection, PersistenceLevel,
    RecoveryData, SecurityContext, SessionState, SessionStats, SessionStatus, SessionTransition,
    SessionUpdate, VoiceSettings, WorkingContext,
};

use crate::{
    config::SessionConfig,
    events::{EventBroadcaster, VoiceEvent},
    CommanderError, Result,
};

type SnapshotKey = (SessionStatus, String, usize, usize);

struct SessionEntry {
    state: SessionState,
    snapshots: SnapshotRing,
    transitions: VecDeque<SessionTransition>,
    last_snapshot_key: Option<SnapshotKey>,
}

impl SessionEntry {
    /// Snapshot when status, directory, command count or connection count changed
    fn snapshot_if_changed(&mut self, reason: &str) -> Result<()> {
        let key = self.state.snapshot_key();
        if self.last_snapshot_key.as_ref() == Some(&key) {
            return Ok(());
        }
        self.snapshot(reason)
    }

    fn snapshot(&mut self, reason: &str) -> Result<()> {
        let snapshot = SessionSnapshot::capture(&self.state, reason)?;
        tracing::debug!(
            "[SESSION] Snapshot {} of {} ({})",
            snapshot.id,
            self.state.session_id,
            reason
        );
        self.snapshots.push(snapshot);
        self.last_snapshot_key = Some(self.state.snapshot_key());
        Ok(())
    }
}

/// Registry and lifecycle handling shared with background tasks
#[derive(Clone)]
struct Registry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    events: EventBroadcaster,
    config: SessionConfig,
}

impl Registry {
    fn transition(
        &self,
        entry: &mut SessionEntry,
        to: SessionStatus,
        reason: &str,
        automatic: bool,
    ) -> Result<SessionTransition> {
        let from = entry.state.status;
        if !from.can_transition_to(to) {
            return Err(CommanderError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let transition = SessionTransition {
            from,
            to,
            reason: reason.to_string(),
            timestamp: Utc::now(),
            automatic,
        };
        entry.state.status = to;
        entry.state.last_activity = transition.timestamp;
        entry.transitions.push_back(transition.clone());
        while entry.transitions.len() > self.config.max_transitions {
            entry.transitions.pop_front();
        }
        entry.snapshot_if_changed(reason)?;

        tracing::info!(
            "[SESSION] {} {} -> {} ({})",
            entry.state.session_id,
            from,
            to,
            reason
        );
        self.events.broadcast(VoiceEvent::SessionTransitioned {
            session_id: entry.state.session_id.clone(),
            transition: transition.clone(),
        });
        Ok(transition)
    }

    async fn terminate(&self, session_id: &str, reason: &str, automatic: bool) -> Result<SessionState> {
        let state = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| CommanderError::SessionNotFound(session_id.to_string()))?;
            if !entry.state.status.can_transition_to(SessionStatus::Terminated) {
                return Err(CommanderError::InvalidTransition {
                    from: entry.state.status.to_string(),
                    to: SessionStatus::Terminated.to_string(),
                });
            }

            let now = Utc::now();
            for command in entry.state.active_commands.iter_mut() {
                if !command.status.is_finished() {
                    command.status = CommandStatus::Failed;
                    command.error = Some(format!("session terminated: {}", reason));
                    command.updated_at = now;
                }
            }
            entry.state.pending_confirmations.clear();

            self.transition(entry, SessionStatus::Terminated, reason, automatic)?;
            match entry.state.persistence {
                PersistenceLevel::None => {}
                PersistenceLevel::Memory => entry.snapshot("final")?,
                PersistenceLevel::Durable => {
                    entry.snapshot("final")?;
                    if let Some(snapshot) = entry.snapshots.latest() {
                        tracing::info!(
                            target: "session_persistence",
                            session_id = %session_id,
                            checksum = %snapshot.checksum,
                            "final session snapshot"
                        );
                    }
                }
            }
            entry.state.clone()
        };

        self.schedule_removal(session_id.to_string());
        Ok(state)
    }

    fn schedule_removal(&self, session_id: String) {
        let registry = self.clone();
        let grace = Duration::from_secs(self.config.termination_grace_secs);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.purge(&session_id).await;
        });
    }

    async fn purge(&self, session_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session_id) {
                Some(entry) if entry.state.status.is_terminal() => {
                    sessions.remove(session_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            tracing::info!("[SESSION] Removed terminated session {}", session_id);
            self.events.session_removed(session_id);
        }
        removed
    }

    async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let max_age = chrono::Duration::seconds(self.config.max_session_age_secs as i64);
        let grace = chrono::Duration::seconds(self.config.termination_grace_secs as i64);

        let (expired, stale_terminated): (Vec<String>, Vec<String>) = {
            let sessions = self.sessions.read().await;
            let expired = sessions
                .values()
                .filter(|e| !e.state.status.is_terminal())
                .filter(|e| e.state.expires_at <= now || now - e.state.last_activity > max_age)
                .map(|e| e.state.session_id.clone())
                .collect();
            let stale = sessions
                .values()
                .filter(|e| e.state.status.is_terminal() && now - e.state.last_activity > grace)
                .map(|e| e.state.session_id.clone())
                .collect();
            (expired, stale)
        };

        let mut cleaned = 0;
        for session_id in &expired {
            match self.terminate(session_id, "expired", true).await {
                Ok(_) => cleaned += 1,
                Err(e) => tracing::warn!("[SESSION] Failed to expire {}: {}", session_id, e),
            }
        }
        for session_id in &stale_terminated {
            if self.purge(session_id).await {
                cleaned += 1;
            }
        }
        cleaned
    }
}

pub struct SessionStateManager {
    registry: Registry,
    cleanup_started: AtomicBool,
}

impl SessionStateManager {
    pub fn new(config: SessionConfig, events: EventBroadcaster) -> Self {
        Self {
            registry: Registry {
                sessions: Arc::new(RwLock::new(HashMap::new())),
                events,
                config,
            },
            cleanup_started: AtomicBool::new(false),
        }
    }

    /// Create a session in `initializing`. It becomes `active` after the configured delay.
    pub async fn create_session(&self, options: CreateSessionOptions) -> Result<SessionState> {
        if options.user_id.trim().is_empty() {
            return Err(CommanderError::Validation("user id is required".to_string()));
        }
        let config = &self.registry.config;
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let state = {
            let mut sessions = self.registry.sessions.write().await;
            if sessions.contains_key(&session_id) {
                return Err(CommanderError::Validation(format!(
                    "session {} already exists",
                    session_id
                )));
            }

            let inherited = match options.inherit_from.as_deref() {
                Some(prior) => match sessions.get(prior) {
                    Some(entry) => Some((
                        entry.state.preferences.clone(),
                        entry.state.working_context.clone(),
                    )),
                    None => {
                        tracing::warn!("[SESSION] Cannot inherit from unknown session {}", prior);
                        None
                    }
                },
                None => None,
            };
            let (preferences, mut working_context) = inherited.unwrap_or_default();
            if let Some(dir) = options.current_directory.clone() {
                working_context.current_directory = dir;
            }
            if working_context.current_directory.is_empty() {
                working_context.current_directory = "/".to_string();
            }

            let now = Utc::now();
            let state = SessionState {
                session_id: session_id.clone(),
                user_id: options.user_id.clone(),
                status: SessionStatus::Initializing,
                created_at: now,
                last_activity: now,
                expires_at: now + chrono::Duration::seconds(config.session_ttl_secs as i64),
                voice_settings: options.voice_settings.clone().unwrap_or_default(),
                working_context,
                preferences,
                security: options.security.clone().unwrap_or_default(),
                active_commands: Vec::new(),
                pending_confirmations: Vec::new(),
                mcp_connections: HashMap::new(),
                recovery: RecoveryData::default(),
                persistence: options.persistence,
                metadata: HashMap::new(),
            };

            let mut entry = SessionEntry {
                state: state.clone(),
                snapshots: SnapshotRing::new(config.max_snapshots),
                transitions: VecDeque::new(),
                last_snapshot_key: None,
            };
            entry.snapshot("initial")?;
            sessions.insert(session_id.clone(), entry);
            state
        };

        tracing::info!(
            "[SESSION] Created {} for user {} in {}",
            session_id,
            state.user_id,
            state.working_context.current_directory
        );
        self.registry.events.broadcast(VoiceEvent::SessionCreated {
            session_id: session_id.clone(),
            user_id: state.user_id.clone(),
            status: state.status,
            timestamp: state.created_at,
        });

        let registry = self.registry.clone();
        let delay = Duration::from_millis(config.initialization_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut sessions = registry.sessions.write().await;
            if let Some(entry) = sessions.get_mut(&session_id) {
                if entry.state.status == SessionStatus::Initializing {
                    if let Err(e) =
                        registry.transition(entry, SessionStatus::Active, "initialized", true)
                    {
                        tracing::error!("[SESSION] Failed to activate {}: {}", session_id, e);
                    }
                }
            }
        });

        Ok(state)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionState> {
        self.registry
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|e| e.state.clone())
    }

    /// All sessions, or those of one user, oldest first
    pub async fn list_sessions(&self, user_id: Option<&str>) -> Vec<SessionState> {
        let mut sessions: Vec<SessionState> = self
            .registry
            .sessions
            .read()
            .await
            .values()
            .filter(|e| user_id.map_or(true, |u| e.state.user_id == u))
            .map(|e| e.state.clone())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    async fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&Registry, &mut SessionEntry) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self.registry.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| CommanderError::SessionNotFound(session_id.to_string()))?;
        f(&self.registry, entry)
    }

    /// Apply a partial update. Status changes must follow the lifecycle graph.
    /// Suspension goes through `suspend_session` so recovery data is captured.
    pub async fn update_session_state(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<SessionState> {
        if update.status == Some(SessionStatus::Terminated) {
            return self.terminate_session(session_id, "terminated by update").await;
        }
        if update.status == Some(SessionStatus::Suspended) {
            let current = self.get_session(session_id).await.map(|s| s.status);
            if current != Some(SessionStatus::Suspended) {
                self.suspend_session(session_id, "suspended by update").await?;
            }
        }

        self.with_session(session_id, |registry, entry| {
            if let Some(status) = update.status {
                if status != entry.state.status {
                    registry.transition(entry, status, "state update", false)?;
                }
            }
            let state = &mut entry.state;
            if let Some(dir) = update.current_directory {
                state.working_context.current_directory = dir;
            }
            if let Some(files) = update.active_files {
                state.working_context.active_files = files;
            }
            if let Some(voice) = update.voice_settings {
                state.voice_settings = voice;
            }
            if let Some(security) = update.security {
                state.security = security;
            }
            if let Some(persistence) = update.persistence {
                state.persistence = persistence;
            }
            state.metadata.extend(update.metadata);
            touch(state, &registry.config);

            entry.snapshot_if_changed("state update")?;
            Ok(entry.state.clone())
        })
        .await
    }

    /// Refresh activity and push out the expiry
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        self.with_session(session_id, |registry, entry| {
            touch(&mut entry.state, &registry.config);
            Ok(())
        })
        .await
    }

    pub async fn add_active_command(&self, session_id: &str, command: ActiveCommand) -> Result<()> {
        self.with_session(session_id, |registry, entry| {
            if entry.state.status.is_terminal() {
                return Err(CommanderError::Validation(format!(
                    "session {} is terminated",
                    session_id
                )));
            }
            entry.state.active_commands.push(command);
            touch(&mut entry.state, &registry.config);
            entry.snapshot_if_changed("command added")
        })
        .await
    }

    /// Update a command's status. Finished commands leave the active list.
    pub async fn update_active_command(
        &self,
        session_id: &str,
        command_id: Uuid,
        status: CommandStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.with_session(session_id, |registry, entry| {
            let state = &mut entry.state;
            let index = state
                .active_commands
                .iter()
                .position(|c| c.command_id == command_id)
                .ok_or_else(|| {
                    CommanderError::Validation(format!("unknown command {}", command_id))
                })?;

            if status.is_finished() {
                let command = state.active_commands.remove(index);
                tracing::debug!(
                    "[SESSION] Command {} ({}) finished as {:?}",
                    command_id,
                    command.tool_name,
                    status
                );
                if let Some(error) = &error {
                    state.recovery.error_log.push(format!("{}: {}", command.tool_name, error));
                }
            } else {
                let command = &mut state.active_commands[index];
                command.status = status;
                command.error = error;
                command.updated_at = Utc::now();
            }
            touch(state, &registry.config);
            entry.snapshot_if_changed("command updated")
        })
        .await
    }

    pub async fn add_pending_confirmation(&self, session_id: &str, confirmation_id: Uuid) -> Result<()> {
        self.with_session(session_id, |_, entry| {
            if !entry.state.pending_confirmations.contains(&confirmation_id) {
                entry.state.pending_confirmations.push(confirmation_id);
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_pending_confirmation(
        &self,
        session_id: &str,
        confirmation_id: Uuid,
    ) -> Result<bool> {
        self.with_session(session_id, |_, entry| {
            let before = entry.state.pending_confirmations.len();
            entry
                .state
                .pending_confirmations
                .retain(|id| *id != confirmation_id);
            Ok(entry.state.pending_confirmations.len() != before)
        })
        .await
    }

    pub async fn record_mcp_connection(
        &self,
        session_id: &str,
        server: &str,
        healthy: bool,
        error: Option<String>,
    ) -> Result<()> {
        self.with_session(session_id, |_, entry| {
            if !healthy {
                tracing::warn!(
                    "[SESSION] MCP server {} unhealthy for {}: {}",
                    server,
                    session_id,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
            entry.state.mcp_connections.insert(
                server.to_string(),
                McpConnection {
                    server: server.to_string(),
                    healthy,
                    last_checked: Utc::now(),
                    error,
                },
            );
            entry.snapshot_if_changed("mcp connection")
        })
        .await
    }

    /// Pause an active session. In-flight commands are parked as `waiting`.
    pub async fn pause_session(&self, session_id: &str) -> Result<SessionState> {
        self.with_session(session_id, |registry, entry| {
            registry.transition(entry, SessionStatus::Paused, "paused by user", false)?;
            let now = Utc::now();
            for command in entry.state.active_commands.iter_mut() {
                if command.status.is_in_flight() {
                    command.status = CommandStatus::Waiting;
                    command.updated_at = now;
                }
            }
            Ok(entry.state.clone())
        })
        .await
    }

    /// Resume a paused session. Parked commands continue without re-execution.
    pub async fn resume_session(&self, session_id: &str) -> Result<SessionState> {
        self.with_session(session_id, |registry, entry| {
            registry.transition(entry, SessionStatus::Active, "resumed by user", false)?;
            let now = Utc::now();
            for command in entry.state.active_commands.iter_mut() {
                if command.status == CommandStatus::Waiting {
                    command.status = CommandStatus::Running;
                    command.updated_at = now;
                }
            }
            Ok(entry.state.clone())
        })
        .await
    }

    /// Suspend an active session, capturing what is needed to recover it
    pub async fn suspend_session(&self, session_id: &str, reason: &str) -> Result<SessionState> {
        self.with_session(session_id, |registry, entry| {
            if !entry.state.status.can_transition_to(SessionStatus::Suspended) {
                return Err(CommanderError::InvalidTransition {
                    from: entry.state.status.to_string(),
                    to: SessionStatus::Suspended.to_string(),
                });
            }
            entry.snapshot("pre-suspend")?;
            let last_known_good = entry.snapshots.last_known_good().cloned();

            let (interrupted, remaining): (Vec<ActiveCommand>, Vec<ActiveCommand>) = entry
                .state
                .active_commands
                .drain(..)
                .partition(|c| !c.status.is_finished());
            entry.state.active_commands = remaining;
            entry.state.recovery = RecoveryData {
                last_known_good,
                interrupted_operations: interrupted,
                pending_changes: Vec::new(),
                error_log: std::mem::take(&mut entry.state.recovery.error_log),
                suspended_at: Some(Utc::now()),
            };

            registry.transition(entry, SessionStatus::Suspended, reason, false)?;
            tracing::info!(
                "[SESSION] Suspended {} with {} interrupted operations",
                session_id,
                entry.state.recovery.interrupted_operations.len()
            );
            Ok(entry.state.clone())
        })
        .await
    }

    /// Restore a suspended session and return it to `active` through `recovered`
    pub async fn recover_session(&self, session_id: &str) -> Result<SessionState> {
        self.with_session(session_id, |registry, entry| {
            if !entry.state.status.can_transition_to(SessionStatus::Recovered) {
                return Err(CommanderError::InvalidTransition {
                    from: entry.state.status.to_string(),
                    to: SessionStatus::Recovered.to_string(),
                });
            }

            let recovery = std::mem::take(&mut entry.state.recovery);
            match &recovery.last_known_good {
                Some(snapshot) if snapshot.verify() => snapshot.restore_into(&mut entry.state),
                Some(snapshot) => tracing::warn!(
                    "[SESSION] Snapshot {} of {} failed verification, not restored",
                    snapshot.id,
                    session_id
                ),
                None => {}
            }
            for mut command in recovery.interrupted_operations {
                if entry.state.active_command(command.command_id).is_none() {
                    command.status = CommandStatus::Waiting;
                    command.updated_at = Utc::now();
                    entry.state.active_commands.push(command);
                } else if let Some(existing) = entry
                    .state
                    .active_commands
                    .iter_mut()
                    .find(|c| c.command_id == command.command_id)
                {
                    existing.status = CommandStatus::Waiting;
                }
            }
            entry.state.recovery.error_log = recovery.error_log;

            registry.transition(entry, SessionStatus::Recovered, "recovery", false)?;
            registry.transition(entry, SessionStatus::Active, "recovered", true)?;
            Ok(entry.state.clone())
        })
        .await
    }

    /// Fail active commands, snapshot per persistence level, and schedule removal
    pub async fn terminate_session(&self, session_id: &str, reason: &str) -> Result<SessionState> {
        self.registry.terminate(session_id, reason, false).await
    }

    pub async fn get_transitions(&self, session_id: &str) -> Result<Vec<SessionTransition>> {
        self.with_session(session_id, |_, entry| {
            Ok(entry.transitions.iter().cloned().collect())
        })
        .await
    }

    pub async fn get_snapshots(&self, session_id: &str) -> Result<Vec<SessionSnapshot>> {
        self.with_session(session_id, |_, entry| Ok(entry.snapshots.to_vec()))
            .await
    }

    /// Terminate expired or idle sessions and purge terminated ones past their grace period
    pub async fn cleanup_expired_sessions(&self) -> usize {
        self.registry.cleanup_expired().await
    }

    /// Start the periodic expiry sweep. Calling it again is a no-op.
    pub fn start_cleanup_task(&self) {
        if self.cleanup_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry = self.registry.clone();
        let period = Duration::from_secs(registry.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            tracing::info!("[SESSION] Starting session sweep every {:?}", period);
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let cleaned = registry.cleanup_expired().await;
                if cleaned > 0 {
                    tracing::info!("[SESSION] Cleaned up {} sessions", cleaned);
                }
            }
        });
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.registry.sessions.read().await;
        let mut stats = SessionStats {
            total: sessions.len(),
            ..SessionStats::default()
        };
        for entry in sessions.values() {
            *stats
                .by_status
                .entry(entry.state.status.to_string())
                .or_insert(0) += 1;
            stats.active_commands += entry.state.active_commands.len();
            stats.pending_confirmations += entry.state.pending_confirmations.len();
            stats.snapshots += entry.snapshots.len();
        }
        stats
    }
}

fn touch(state: &mut SessionState, config: &SessionConfig) {
    let now = Utc::now();
    state.last_activity = now;
    state.expires_at = now + chrono::Duration::seconds(config.session_ttl_secs as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionStateManager {
        SessionStateManager::new(SessionConfig::default(), EventBroadcaster::new())
    }

    async fn active_session(manager: &SessionStateManager) -> SessionState {
        let state = manager
            .create_session(CreateSessionOptions::for_user("u1").with_directory("/home/u1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        manager.get_session(&state.session_id).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_auto_activate() {
        let manager = manager();
        let mut rx = manager.registry.events.subscribe();
        let state = manager
            .create_session(CreateSessionOptions::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(state.status, SessionStatus::Initializing);
        assert_eq!(state.working_context.current_directory, "/");
        assert_eq!(rx.recv().await.unwrap().kind(), "sessionCreated");

        tokio::time::sleep(Duration::from_millis(150)).await;
        let state = manager.get_session(&state.session_id).await.unwrap();
        assert_eq!(state.status, SessionStatus::Active);

        let transitions = manager.get_transitions(&state.session_id).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, SessionStatus::Initializing);
        assert!(transitions[0].automatic);
        assert_eq!(rx.recv().await.unwrap().kind(), "sessionTransitioned");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_fails() {
        let manager = manager();
        assert!(matches!(
            manager.pause_session("missing").await,
            Err(CommanderError::SessionNotFound(_))
        ));
        assert!(matches!(
            manager
                .update_session_state("missing", SessionUpdate::directory("/tmp"))
                .await,
            Err(CommanderError::SessionNotFound(_))
        ));
        assert!(matches!(
            manager
                .add_active_command("missing", ActiveCommand::new(Uuid::new_v4(), "x", "y"))
                .await,
            Err(CommanderError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_parks_commands_and_resume_continues() {
        let manager = manager();
        let state = active_session(&manager).await;
        let id = state.session_id.clone();
        let command = ActiveCommand::new(Uuid::new_v4(), "search logs", "search_files");
        let command_id = command.command_id;
        manager.add_active_command(&id, command).await.unwrap();
        manager
            .update_active_command(&id, command_id, CommandStatus::Running, None)
            .await
            .unwrap();

        let paused = manager.pause_session(&id).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);
        assert_eq!(paused.active_commands[0].status, CommandStatus::Waiting);

        let resumed = manager.resume_session(&id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        assert_eq!(resumed.active_commands[0].status, CommandStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transitions_rejected() {
        let manager = manager();
        let state = active_session(&manager).await;
        let id = state.session_id.clone();

        assert!(matches!(
            manager.resume_session(&id).await,
            Err(CommanderError::InvalidTransition { .. })
        ));
        assert!(matches!(
            manager.recover_session(&id).await,
            Err(CommanderError::InvalidTransition { .. })
        ));

        manager.terminate_session(&id, "done").await.unwrap();
        assert!(matches!(
            manager
                .update_session_state(&id, SessionUpdate::status(SessionStatus::Active))
                .await,
            Err(CommanderError::InvalidTransition { .. })
        ));
        assert!(matches!(
            manager.terminate_session(&id, "again").await,
            Err(CommanderError::InvalidTransition { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_and_recover() {
        let manager = manager();
        let state = active_session(&manager).await;
        let id = state.session_id.clone();
        let command = ActiveCommand::new(Uuid::new_v4(), "build project", "execute_command");
        let command_id = command.command_id;
        manager.add_active_command(&id, command).await.unwrap();
        manager
            .update_active_command(&id, command_id, CommandStatus::Running, None)
            .await
            .unwrap();

        let suspended = manager.suspend_session(&id, "connection lost").await.unwrap();
        assert_eq!(suspended.status, SessionStatus::Suspended);
        assert!(suspended.active_commands.is_empty());
        assert_eq!(suspended.recovery.interrupted_operations.len(), 1);
        assert!(suspended.recovery.last_known_good.is_some());

        manager
            .update_session_state(&id, SessionUpdate::directory("/tmp/elsewhere"))
            .await
            .unwrap();

        let recovered = manager.recover_session(&id).await.unwrap();
        assert_eq!(recovered.status, SessionStatus::Active);
        assert_eq!(recovered.working_context.current_directory, "/home/u1");
        assert_eq!(recovered.active_commands.len(), 1);
        assert_eq!(recovered.active_commands[0].status, CommandStatus::Waiting);

        let path: Vec<SessionStatus> = manager
            .get_transitions(&id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.to)
            .collect();
        assert_eq!(
            path,
            vec![
                SessionStatus::Active,
                SessionStatus::Suspended,
                SessionStatus::Recovered,
                SessionStatus::Active
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_by_update_keeps_recovery_data() {
        let manager = manager();
        let state = active_session(&manager).await;
        let id = state.session_id.clone();
        let command = ActiveCommand::new(Uuid::new_v4(), "build project", "execute_command");
        let command_id = command.command_id;
        manager.add_active_command(&id, command).await.unwrap();
        manager
            .update_active_command(&id, command_id, CommandStatus::Running, None)
            .await
            .unwrap();

        let mut update = SessionUpdate::status(SessionStatus::Suspended);
        update.current_directory = Some("/tmp".to_string());
        let suspended = manager.update_session_state(&id, update).await.unwrap();
        assert_eq!(suspended.status, SessionStatus::Suspended);
        assert_eq!(suspended.working_context.current_directory, "/tmp");
        assert!(suspended.active_commands.is_empty());
        assert_eq!(suspended.recovery.interrupted_operations.len(), 1);
        assert!(suspended.recovery.last_known_good.is_some());
        assert!(suspended.recovery.suspended_at.is_some());

        // Repeating the update does not wipe what was captured
        let again = manager
            .update_session_state(&id, SessionUpdate::status(SessionStatus::Suspended))
            .await
            .unwrap();
        assert_eq!(again.recovery.interrupted_operations.len(), 1);

        let recovered = manager.recover_session(&id).await.unwrap();
        assert_eq!(recovered.status, SessionStatus::Active);
        assert_eq!(recovered.working_context.current_directory, "/home/u1");
        assert_eq!(recovered.active_commands.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_only_on_meaningful_change() {
        let manager = manager();
        let state = active_session(&manager).await;
        let id = state.session_id.clone();
        // initial + activation
        assert_eq!(manager.get_snapshots(&id).await.unwrap().len(), 2);

        let mut update = SessionUpdate::default();
        update.metadata.insert("client".to_string(), "cli".to_string());
        manager.update_session_state(&id, update).await.unwrap();
        manager.add_pending_confirmation(&id, Uuid::new_v4()).await.unwrap();
        assert_eq!(manager.get_snapshots(&id).await.unwrap().len(), 2);

        manager
            .update_session_state(&id, SessionUpdate::directory("/srv"))
            .await
            .unwrap();
        manager.record_mcp_connection(&id, "desktop-commander", true, None).await.unwrap();
        let snapshots = manager.get_snapshots(&id).await.unwrap();
        assert_eq!(snapshots.len(), 4);
        assert!(snapshots.iter().all(|s| s.verify()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_ring_is_bounded() {
        let manager = manager();
        let state = active_session(&manager).await;
        let id = state.session_id.clone();
        for i in 0..20 {
            manager
                .update_session_state(&id, SessionUpdate::directory(format!("/d/{}", i)))
                .await
                .unwrap();
        }
        let snapshots = manager.get_snapshots(&id).await.unwrap();
        assert_eq!(snapshots.len(), 10);
        assert_eq!(
            snapshots.last().unwrap().content.working_context.current_directory,
            "/d/19"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_fails_commands_and_purges_after_grace() {
        let manager = manager();
        let mut rx = manager.registry.events.subscribe();
        let state = active_session(&manager).await;
        let id = state.session_id.clone();
        manager
            .add_active_command(&id, ActiveCommand::new(Uuid::new_v4(), "list", "list_directory"))
            .await
            .unwrap();

        let terminated = manager.terminate_session(&id, "user ended").await.unwrap();
        assert_eq!(terminated.status, SessionStatus::Terminated);
        assert_eq!(terminated.active_commands[0].status, CommandStatus::Failed);
        let last = manager.get_snapshots(&id).await.unwrap().pop().unwrap();
        assert_eq!(last.reason, "final");

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(manager.get_session(&id).await.is_none());

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds.last(), Some(&"sessionRemoved"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_without_persistence_skips_final_snapshot() {
        let manager = manager();
        let state = manager
            .create_session(
                CreateSessionOptions::for_user("u1").with_persistence(PersistenceLevel::None),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        manager.terminate_session(&state.session_id, "bye").await.unwrap();
        let snapshots = manager.get_snapshots(&state.session_id).await.unwrap();
        assert!(snapshots.iter().all(|s| s.reason != "final"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inheritance_copies_preferences_and_context() {
        let manager = manager();
        let prior = active_session(&manager).await;
        manager
            .update_session_state(
                &prior.session_id,
                SessionUpdate {
                    active_files: Some(vec!["/home/u1/notes.md".to_string()]),
                    ..SessionUpdate::default()
                },
            )
            .await
            .unwrap();

        let child = manager
            .create_session(CreateSessionOptions::for_user("u1").inheriting(&prior.session_id))
            .await
            .unwrap();
        assert_eq!(child.working_context.current_directory, "/home/u1");
        assert_eq!(child.working_context.active_files, vec!["/home/u1/notes.md"]);

        manager
            .update_session_state(
                &child.session_id,
                SessionUpdate {
                    active_files: Some(Vec::new()),
                    ..SessionUpdate::default()
                },
            )
            .await
            .unwrap();
        let prior = manager.get_session(&prior.session_id).await.unwrap();
        assert_eq!(prior.working_context.active_files.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expires_idle_sessions() {
        let config = SessionConfig {
            session_ttl_secs: 60,
            ..SessionConfig::default()
        };
        let manager = SessionStateManager::new(config, EventBroadcaster::new());
        let state = active_session(&manager).await;

        assert_eq!(manager.cleanup_expired_sessions().await, 0);

        // Expiry compares wall-clock timestamps
        manager
            .with_session(&state.session_id, |_, entry| {
                entry.state.expires_at = Utc::now() - chrono::Duration::seconds(1);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(manager.cleanup_expired_sessions().await, 1);
        let state = manager.get_session(&state.session_id).await.unwrap();
        assert_eq!(state.status, SessionStatus::Terminated);
        assert!(manager.get_transitions(&state.session_id).await.unwrap().last().unwrap().automatic);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_stats() {
        let manager = manager();
        active_session(&manager).await;
        manager
            .create_session(CreateSessionOptions::for_user("u2"))
            .await
            .unwrap();

        assert_eq!(manager.list_sessions(None).await.len(), 2);
        assert_eq!(manager.list_sessions(Some("u2")).await.len(), 1);

        let stats = manager.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get("active"), Some(&1));
        assert_eq!(stats.by_status.get("initializing"), Some(&1));
    }
}
