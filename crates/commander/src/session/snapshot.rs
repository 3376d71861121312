//! Checksummed point-in-time copies of a session used for recovery

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ts_rs::TS;
use uuid::Uuid;

use super::types::{ActiveCommand, SessionState, SessionStatus, VoiceSettings, WorkingContext};
use crate::Result;

/// The restorable subset of a session. Serialized in field order for the checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotContent {
    pub session_id: String,
    pub status: SessionStatus,
    pub working_context: WorkingContext,
    pub voice_settings: VoiceSettings,
    pub active_commands: Vec<ActiveCommand>,
    pub pending_confirmations: Vec<Uuid>,
    /// Sorted server names
    pub mcp_servers: Vec<String>,
}

impl SnapshotContent {
    fn capture(state: &SessionState) -> Self {
        let mut mcp_servers: Vec<String> = state.mcp_connections.keys().cloned().collect();
        mcp_servers.sort();
        Self {
            session_id: state.session_id.clone(),
            status: state.status,
            working_context: state.working_context.clone(),
            voice_settings: state.voice_settings.clone(),
            active_commands: state.active_commands.clone(),
            pending_confirmations: state.pending_confirmations.clone(),
            mcp_servers,
        }
    }

    fn checksum(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub reason: String,
    pub content: SnapshotContent,
    /// SHA-256 hex of the canonical JSON of `content`
    pub checksum: String,
}

impl SessionSnapshot {
    pub fn capture(state: &SessionState, reason: &str) -> Result<Self> {
        let content = SnapshotContent::capture(state);
        let checksum = content.checksum()?;
        Ok(Self {
            id: Uuid::new_v4(),
            taken_at: Utc::now(),
            reason: reason.to_string(),
            content,
            checksum,
        })
    }

    /// True when the content still hashes to the recorded checksum
    pub fn verify(&self) -> bool {
        self.content
            .checksum()
            .map(|sum| sum == self.checksum)
            .unwrap_or(false)
    }

    /// Merge the snapshot over `state`. Lifecycle status is left to the caller.
    pub fn restore_into(&self, state: &mut SessionState) {
        state.working_context = self.content.working_context.clone();
        state.voice_settings = self.content.voice_settings.clone();
        for command in &self.content.active_commands {
            if state.active_command(command.command_id).is_none() {
                state.active_commands.push(command.clone());
            }
        }
    }
}

/// Fixed-capacity ring that overwrites the oldest snapshot
#[derive(Debug, Clone)]
pub struct SnapshotRing {
    snapshots: VecDeque<SessionSnapshot>,
    capacity: usize,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, snapshot: SessionSnapshot) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&SessionSnapshot> {
        self.snapshots.back()
    }

    /// Newest snapshot whose checksum still verifies
    pub fn last_known_good(&self) -> Option<&SessionSnapshot> {
        self.snapshots.iter().rev().find(|s| s.verify())
    }

    pub fn to_vec(&self) -> Vec<SessionSnapshot> {
        self.snapshots.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
