use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{command::VoiceCommand, risk::RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum ConfirmationState {
    /// First confirmation outstanding
    Pending,
    /// High-risk command confirmed once, waiting for the second assent
    PendingSecond,
}

/// A risky command waiting for the user's assent
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub id: Uuid,
    pub command: VoiceCommand,
    pub risk_level: RiskLevel,
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub timeout_ms: u64,
    pub prompt: String,
    pub requires_double_confirmation: bool,
    pub state: ConfirmationState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Confirmed,
    Rejected,
    Timeout,
    Cancelled,
    AutoApproved,
    /// Removed by the background sweep after its timeout and grace period
    Expired,
}

impl ConfirmationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self,
            ConfirmationOutcome::Confirmed | ConfirmationOutcome::AutoApproved
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    pub risk_assessment: String,
    pub network_info: Option<String>,
    pub device_info: Option<String>,
}

/// How a confirmation request was resolved. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResult {
    pub confirmation_id: Uuid,
    pub confirmed: bool,
    pub outcome: ConfirmationOutcome,
    pub user_response: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub time_to_confirm_ms: u64,
    pub session_id: String,
    pub user_id: String,
    pub tool_name: String,
    pub risk_level: RiskLevel,
    pub audit: AuditMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Rejected,
    Timeout,
    Cancelled,
    Expired,
    ConfirmedHighRisk,
}

impl AuditKind {
    pub fn for_result(result: &ConfirmationResult) -> Option<Self> {
        match result.outcome {
            ConfirmationOutcome::Rejected => Some(AuditKind::Rejected),
            ConfirmationOutcome::Timeout => Some(AuditKind::Timeout),
            ConfirmationOutcome::Cancelled => Some(AuditKind::Cancelled),
            ConfirmationOutcome::Expired => Some(AuditKind::Expired),
            ConfirmationOutcome::Confirmed if result.risk_level == RiskLevel::High => {
                Some(AuditKind::ConfirmedHighRisk)
            }
            _ => None,
        }
    }
}

/// Security-relevant confirmation outcome, kept apart from ordinary history
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub confirmation_id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub risk_level: RiskLevel,
    pub kind: AuditKind,
    pub detail: String,
}

/// What happened to a response fed into a pending confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseOutcome {
    Resolved { confirmed: bool },
    AwaitingSecondConfirmation,
    ClarificationNeeded,
    RepeatNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Confirm,
    Reject,
    Ambiguous,
}
