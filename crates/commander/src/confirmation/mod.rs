//! Confirmation Workflow - gates risky tool calls behind the user's spoken assent
//!
//! Every pending request owns one `oneshot` channel. Whoever removes the request from the
//! pending map (response handler, timeout path, cancellation or sweep) is the only party that
//! resolves it, and does so while still holding the map lock.

pub mod phrases;
pub mod prompts;
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
use tokio::{
    sync::{oneshot, RwLock},
    time::Instant,
};
use uuid::Uuid;

pub use phrases::{classify_response, is_confirmation_phrase, is_rejection_phrase};
pub use prompts::PromptTemplates;
pub use types::{
    AuditKind, AuditMetadata, ConfirmationOutcome, ConfirmationRequest, ConfirmationResult,
    ConfirmationState, ResponseClass, ResponseOutcome, SecurityAuditEntry,
};

use crate::{
    command::VoiceCommand,
    config::ConfirmationConfig,
    events::{EventBroadcaster, VoiceEvent},
    risk::{RiskAssessment, RiskLevel},
    tools::SharedDictionary,
    CommanderError, Result,
};

struct PendingEntry {
    request: ConfirmationRequest,
    responder: oneshot::Sender<ConfirmationResult>,
    assessment: String,
    started: Instant,
    deadline: Instant,
}

/// State shared between the workflow and its outstanding waiters
#[derive(Clone)]
struct Shared {
    pending: Arc<RwLock<HashMap<Uuid, PendingEntry>>>,
    history: Arc<RwLock<HashMap<String, VecDeque<ConfirmationResult>>>>,
    audit: Arc<RwLock<VecDeque<SecurityAuditEntry>>>,
    events: EventBroadcaster,
    history_limit: usize,
    audit_limit: usize,
}

impl Shared {
    /// Resolve a request already removed from the pending map
    async fn resolve(&self, entry: PendingEntry, result: ConfirmationResult) -> ConfirmationResult {
        let _ = entry.responder.send(result.clone());
        self.record(&entry.request, &result).await;
        result
    }

    async fn record(&self, request: &ConfirmationRequest, result: &ConfirmationResult) {
        {
            let mut history = self.history.write().await;
            let user_history = history.entry(result.user_id.clone()).or_default();
            user_history.push_back(result.clone());
            while user_history.len() > self.history_limit {
                user_history.pop_front();
            }
        }

        if let Some(kind) = AuditKind::for_result(result) {
            let entry = SecurityAuditEntry {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                confirmation_id: result.confirmation_id,
                user_id: result.user_id.clone(),
                session_id: result.session_id.clone(),
                tool_name: result.tool_name.clone(),
                risk_level: result.risk_level,
                kind,
                detail: format!("{} ({})", request.command.text, result.audit.risk_assessment),
            };
            tracing::warn!(
                target: "security_audit",
                confirmation_id = %entry.confirmation_id,
                user_id = %entry.user_id,
                session_id = %entry.session_id,
                tool = %entry.tool_name,
                risk_level = %entry.risk_level,
                kind = ?entry.kind,
                "{}",
                entry.detail
            );

            let mut audit = self.audit.write().await;
            audit.push_back(entry);
            while audit.len() > self.audit_limit {
                audit.pop_front();
            }
        }

        tracing::info!(
            "[CONFIRMATION] {} for {} resolved as {:?} after {}ms",
            result.confirmation_id,
            result.tool_name,
            result.outcome,
            result.time_to_confirm_ms
        );
        self.events.broadcast(VoiceEvent::ConfirmationCompleted {
            result: result.clone(),
        });
    }
}

fn resolution(
    entry: &PendingEntry,
    outcome: ConfirmationOutcome,
    user_response: &str,
    confidence: f64,
) -> ConfirmationResult {
    let request = &entry.request;
    ConfirmationResult {
        confirmation_id: request.id,
        confirmed: outcome.is_confirmed(),
        outcome,
        user_response: user_response.to_string(),
        confidence,
        timestamp: Utc::now(),
        time_to_confirm_ms: entry.started.elapsed().as_millis() as u64,
        session_id: request.session_id.clone(),
        user_id: request.user_id.clone(),
        tool_name: request.command.tool().to_string(),
        risk_level: request.risk_level,
        audit: AuditMetadata {
            risk_assessment: entry.assessment.clone(),
            network_info: None,
            device_info: None,
        },
    }
}

fn request_assessment(request: &ConfirmationRequest) -> String {
    format!("{} risk {}", request.risk_level, request.command.tool())
}

/// Result of starting the confirmation protocol for a command
pub enum ConfirmationGate {
    /// The tool needs no confirmation; nothing was persisted
    AutoApproved(ConfirmationResult),
    Pending(PendingConfirmation),
}

/// Handle on an outstanding request. `wait` suspends until it resolves.
pub struct PendingConfirmation {
    request: ConfirmationRequest,
    receiver: oneshot::Receiver<ConfirmationResult>,
    deadline: Instant,
    shared: Shared,
}

impl PendingConfirmation {
    pub fn id(&self) -> Uuid {
        self.request.id
    }

    pub fn request(&self) -> &ConfirmationRequest {
        &self.request
    }

    /// Wait for a response, cancellation, or the risk-scaled timeout
    pub async fn wait(self) -> ConfirmationResult {
        let PendingConfirmation {
            request,
            mut receiver,
            mut deadline,
            shared,
        } = self;
        let id = request.id;

        loop {
            match tokio::time::timeout_at(deadline, &mut receiver).await {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => return expired_without_result(&request),
                Err(_) => {
                    let mut pending = shared.pending.write().await;
                    match pending.get(&id) {
                        // A second round restarted the clock
                        Some(entry) if entry.deadline > Instant::now() => {
                            deadline = entry.deadline;
                            continue;
                        }
                        Some(_) => {
                            if let Some(entry) = pending.remove(&id) {
                                let result =
                                    resolution(&entry, ConfirmationOutcome::Timeout, "timeout", 0.0);
                                return shared.resolve(entry, result).await;
                            }
                        }
                        None => {}
                    }
                    drop(pending);
                    // Resolved by another path between the timer firing and taking the lock
                    return match receiver.await {
                        Ok(result) => result,
                        Err(_) => expired_without_result(&request),
                    };
                }
            }
        }
    }
}

/// Sender dropped without a value. Never treated as confirmed.
fn expired_without_result(request: &ConfirmationRequest) -> ConfirmationResult {
    ConfirmationResult {
        confirmation_id: request.id,
        confirmed: false,
        outcome: ConfirmationOutcome::Expired,
        user_response: "expired".to_string(),
        confidence: 0.0,
        timestamp: Utc::now(),
        time_to_confirm_ms: request.timeout_ms,
        session_id: request.session_id.clone(),
        user_id: request.user_id.clone(),
        tool_name: request.command.tool().to_string(),
        risk_level: request.risk_level,
        audit: AuditMetadata {
            risk_assessment: request_assessment(request),
            network_info: None,
            device_info: None,
        },
    }
}

pub struct ConfirmationWorkflow {
    config: ConfirmationConfig,
    dictionary: SharedDictionary,
    templates: PromptTemplates,
    shared: Shared,
    cleanup_started: AtomicBool,
}

impl ConfirmationWorkflow {
    pub fn new(
        config: ConfirmationConfig,
        dictionary: SharedDictionary,
        events: EventBroadcaster,
    ) -> Self {
        let shared = Shared {
            pending: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(HashMap::new())),
            audit: Arc::new(RwLock::new(VecDeque::new())),
            events,
            history_limit: config.history_limit,
            audit_limit: config.audit_trail_limit,
        };
        Self {
            config,
            dictionary,
            templates: PromptTemplates::default(),
            shared,
            cleanup_started: AtomicBool::new(false),
        }
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn get_timeout_for_risk_level(&self, level: RiskLevel) -> u64 {
        match level {
            RiskLevel::Low => self.config.low_risk_timeout_ms,
            RiskLevel::Medium => self.config.medium_risk_timeout_ms,
            RiskLevel::High => self.config.high_risk_timeout_ms,
        }
    }

    pub fn is_confirmation_phrase(&self, text: &str) -> bool {
        is_confirmation_phrase(text, self.config.similarity_threshold)
    }

    pub fn is_rejection_phrase(&self, text: &str) -> bool {
        is_rejection_phrase(text, self.config.similarity_threshold)
    }

    pub fn classify_response(&self, text: &str) -> ResponseClass {
        classify_response(text, self.config.similarity_threshold)
    }

    /// Request confirmation and wait for it to resolve
    pub async fn request_confirmation(
        &self,
        command: &VoiceCommand,
        assessment: Option<&RiskAssessment>,
    ) -> Result<ConfirmationResult> {
        match self.begin(command, assessment).await? {
            ConfirmationGate::AutoApproved(result) => Ok(result),
            ConfirmationGate::Pending(pending) => Ok(pending.wait().await),
        }
    }

    /// Decide whether the command gates, and if so register a pending request.
    /// A command gates when its tool requires confirmation, its risk assessment asks for it,
    /// or it is classified high risk.
    pub async fn begin(
        &self,
        command: &VoiceCommand,
        assessment: Option<&RiskAssessment>,
    ) -> Result<ConfirmationGate> {
        let tool = command
            .tool_name
            .as_deref()
            .ok_or_else(|| CommanderError::Validation("command has no tool".to_string()))?;
        let dictionary = self.dictionary.get().await?;
        let descriptor = dictionary
            .get(tool)
            .ok_or_else(|| CommanderError::UnknownTool(tool.to_string()))?;

        let risk_assessment = assessment
            .map(|a| a.reason.clone())
            .unwrap_or_else(|| format!("{} risk", command.risk_level));

        let assessed = assessment.is_some_and(|a| a.requires_confirmation);
        if !descriptor.requires_confirmation && !assessed && command.risk_level != RiskLevel::High {
            tracing::debug!("[CONFIRMATION] {} auto-approved", tool);
            return Ok(ConfirmationGate::AutoApproved(ConfirmationResult {
                confirmation_id: Uuid::new_v4(),
                confirmed: true,
                outcome: ConfirmationOutcome::AutoApproved,
                user_response: "auto-approved".to_string(),
                confidence: 1.0,
                timestamp: Utc::now(),
                time_to_confirm_ms: 0,
                session_id: command.session_id.clone(),
                user_id: command.user_id.clone(),
                tool_name: tool.to_string(),
                risk_level: command.risk_level,
                audit: AuditMetadata {
                    risk_assessment,
                    network_info: None,
                    device_info: None,
                },
            }));
        }

        let timeout_ms = self.get_timeout_for_risk_level(command.risk_level);
        let request = ConfirmationRequest {
            id: Uuid::new_v4(),
            command: command.clone(),
            risk_level: command.risk_level,
            session_id: command.session_id.clone(),
            user_id: command.user_id.clone(),
            created_at: Utc::now(),
            timeout_ms,
            prompt: self.templates.render(command),
            requires_double_confirmation: self.config.double_confirmation_high_risk
                && command.risk_level == RiskLevel::High,
            state: ConfirmationState::Pending,
        };

        let (responder, receiver) = oneshot::channel();
        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout_ms);
        self.shared.pending.write().await.insert(
            request.id,
            PendingEntry {
                request: request.clone(),
                responder,
                assessment: risk_assessment.clone(),
                started,
                deadline,
            },
        );

        tracing::info!(
            "[CONFIRMATION] {} pending for {} ({} risk, {}ms): {}",
            request.id,
            tool,
            request.risk_level,
            timeout_ms,
            risk_assessment
        );
        self.shared.events.broadcast(VoiceEvent::ConfirmationRequested {
            confirmation_id: request.id,
            session_id: request.session_id.clone(),
            text: request.prompt.clone(),
            timeout_ms,
            risk_level: request.risk_level,
            timestamp: Utc::now(),
        });

        Ok(ConfirmationGate::Pending(PendingConfirmation {
            request,
            receiver,
            deadline,
            shared: self.shared.clone(),
        }))
    }

    /// Feed a spoken response into a pending request
    pub async fn handle_confirmation_response(
        &self,
        id: Uuid,
        text: &str,
        confidence: f64,
    ) -> Result<ResponseOutcome> {
        let mut pending = self.shared.pending.write().await;
        let entry = pending
            .get_mut(&id)
            .ok_or(CommanderError::ConfirmationNotFound(id))?;

        if confidence < self.config.min_response_confidence {
            tracing::debug!(
                "[CONFIRMATION] {} response '{}' below confidence ({:.2})",
                id,
                text,
                confidence
            );
            self.shared.events.broadcast(VoiceEvent::ConfirmationRepeatNeeded {
                confirmation_id: id,
                session_id: entry.request.session_id.clone(),
                text: prompts::REPEAT_PROMPT.to_string(),
                timestamp: Utc::now(),
            });
            return Ok(ResponseOutcome::RepeatNeeded);
        }

        match self.classify_response(text) {
            ResponseClass::Ambiguous => {
                self.shared.events.broadcast(VoiceEvent::ClarificationNeeded {
                    confirmation_id: id,
                    session_id: entry.request.session_id.clone(),
                    text: prompts::CLARIFICATION_PROMPT.to_string(),
                    timestamp: Utc::now(),
                });
                Ok(ResponseOutcome::ClarificationNeeded)
            }
            ResponseClass::Confirm
                if entry.request.requires_double_confirmation
                    && entry.request.state == ConfirmationState::Pending =>
            {
                let timeout_ms = entry.request.timeout_ms;
                entry.request.state = ConfirmationState::PendingSecond;
                entry.request.prompt = self.templates.escalate(&entry.request.prompt);
                entry.deadline = Instant::now() + Duration::from_millis(timeout_ms);

                tracing::info!("[CONFIRMATION] {} awaiting second confirmation", id);
                self.shared
                    .events
                    .broadcast(VoiceEvent::DoubleConfirmationRequested {
                        confirmation_id: id,
                        session_id: entry.request.session_id.clone(),
                        text: entry.request.prompt.clone(),
                        timeout_ms,
                        timestamp: Utc::now(),
                    });
                Ok(ResponseOutcome::AwaitingSecondConfirmation)
            }
            class => {
                let outcome = if class == ResponseClass::Confirm {
                    ConfirmationOutcome::Confirmed
                } else {
                    ConfirmationOutcome::Rejected
                };
                let Some(entry) = pending.remove(&id) else {
                    return Err(CommanderError::ConfirmationNotFound(id));
                };
                let result = resolution(&entry, outcome, text, confidence);
                let confirmed = result.confirmed;
                self.shared.resolve(entry, result).await;
                Ok(ResponseOutcome::Resolved { confirmed })
            }
        }
    }

    /// Cancel a pending request. Returns false when it is unknown or already resolved.
    pub async fn cancel_confirmation(&self, id: Uuid) -> bool {
        let mut pending = self.shared.pending.write().await;
        match pending.remove(&id) {
            Some(entry) => {
                let result = resolution(&entry, ConfirmationOutcome::Cancelled, "cancelled", 1.0);
                self.shared.resolve(entry, result).await;
                true
            }
            None => false,
        }
    }

    /// Cancel every pending request of a session
    pub async fn cancel_session(&self, session_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .shared
            .pending
            .read()
            .await
            .values()
            .filter(|e| e.request.session_id == session_id)
            .map(|e| e.request.id)
            .collect();

        let mut cancelled = 0;
        for id in ids {
            if self.cancel_confirmation(id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn get_pending_confirmations(&self) -> Vec<ConfirmationRequest> {
        let mut requests: Vec<ConfirmationRequest> = self
            .shared
            .pending
            .read()
            .await
            .values()
            .map(|e| e.request.clone())
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        requests
    }

    pub async fn get_pending_for_session(&self, session_id: &str) -> Option<ConfirmationRequest> {
        self.get_pending_confirmations()
            .await
            .into_iter()
            .find(|r| r.session_id == session_id)
    }

    pub async fn get_confirmation_history(&self, user_id: &str) -> Vec<ConfirmationResult> {
        self.shared
            .history
            .read()
            .await
            .get(user_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn security_audit_trail(&self) -> Vec<SecurityAuditEntry> {
        self.shared.audit.read().await.iter().cloned().collect()
    }

    /// Remove requests that outlived their timeout plus the grace period
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.shared, Duration::from_millis(self.config.cleanup_grace_ms)).await
    }

    /// Start the periodic sweep. Calling it again is a no-op.
    pub fn start_cleanup_task(&self) {
        if self.cleanup_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = self.shared.clone();
        let grace = Duration::from_millis(self.config.cleanup_grace_ms);
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            tracing::info!("[CONFIRMATION] Starting pending-request sweep every {:?}", period);
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = sweep(&shared, grace).await;
                if removed > 0 {
                    tracing::warn!("[CONFIRMATION] Swept {} stale confirmation requests", removed);
                }
            }
        });
    }
}

async fn sweep(shared: &Shared, grace: Duration) -> usize {
    let now = Instant::now();
    let mut pending = shared.pending.write().await;
    let stale: Vec<Uuid> = pending
        .iter()
        .filter(|(_, entry)| now >= entry.deadline + grace)
        .map(|(id, _)| *id)
        .collect();

    for id in &stale {
        if let Some(entry) = pending.remove(id) {
            let result = resolution(&entry, ConfirmationOutcome::Expired, "expired", 0.0);
            shared.resolve(entry, result).await;
        }
    }
    stale.len()
}
