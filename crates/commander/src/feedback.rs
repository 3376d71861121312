//! Long-operation feedback: progress and heartbeat events while a tool call runs

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    config::FeedbackConfig,
    events::{EventBroadcaster, VoiceEvent},
    mcp::ToolExecutionResult,
    CommanderError, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub id: Uuid,
    pub session_id: String,
    pub tool_name: String,
    pub description: String,
    /// 0-100, never decreases
    pub progress: u8,
    pub state: OperationState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message: Option<String>,
}

/// Lets `track` tell a failed outcome apart from a successful one
pub trait OperationReport {
    fn failure(&self) -> Option<String> {
        None
    }
}

impl OperationReport for ToolExecutionResult {
    fn failure(&self) -> Option<String> {
        if self.success {
            None
        } else {
            Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| "tool reported failure".to_string()),
            )
        }
    }
}

impl OperationReport for () {}

pub struct OperationTracker {
    config: FeedbackConfig,
    running: Arc<RwLock<HashMap<Uuid, OperationStatus>>>,
    finished: Arc<RwLock<VecDeque<OperationStatus>>>,
    events: EventBroadcaster,
}

impl OperationTracker {
    pub fn new(config: FeedbackConfig, events: EventBroadcaster) -> Self {
        Self {
            config,
            running: Arc::new(RwLock::new(HashMap::new())),
            finished: Arc::new(RwLock::new(VecDeque::new())),
            events,
        }
    }

    pub async fn start(&self, session_id: &str, tool_name: &str, description: &str) -> Uuid {
        let now = Utc::now();
        let operation = OperationStatus {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            description: description.to_string(),
            progress: 0,
            state: OperationState::Running,
            started_at: now,
            updated_at: now,
            message: None,
        };
        let id = operation.id;
        self.running.write().await.insert(id, operation.clone());

        tracing::debug!("[FEEDBACK] Operation {} started: {}", id, description);
        self.events
            .broadcast(VoiceEvent::OperationStarted { operation });
        id
    }

    pub async fn progress(
        &self,
        id: Uuid,
        percent: u8,
        message: Option<String>,
    ) -> Result<OperationStatus> {
        let operation = {
            let mut running = self.running.write().await;
            let operation = running.get_mut(&id).ok_or_else(|| not_running(id))?;
            operation.progress = operation.progress.max(percent.min(100));
            if message.is_some() {
                operation.message = message;
            }
            operation.updated_at = Utc::now();
            operation.clone()
        };
        self.events.broadcast(VoiceEvent::OperationProgress {
            operation: operation.clone(),
        });
        Ok(operation)
    }

    pub async fn complete(&self, id: Uuid, message: Option<String>) -> Result<OperationStatus> {
        let operation = self
            .finish(id, OperationState::Completed, message)
            .await?;
        tracing::debug!("[FEEDBACK] Operation {} completed", id);
        self.events.broadcast(VoiceEvent::OperationCompleted {
            operation: operation.clone(),
        });
        Ok(operation)
    }

    pub async fn fail(&self, id: Uuid, error: &str) -> Result<OperationStatus> {
        let operation = self
            .finish(id, OperationState::Failed, Some(error.to_string()))
            .await?;
        tracing::warn!("[FEEDBACK] Operation {} failed: {}", id, error);
        self.events.broadcast(VoiceEvent::OperationFailed {
            operation: operation.clone(),
        });
        Ok(operation)
    }

    async fn finish(
        &self,
        id: Uuid,
        state: OperationState,
        message: Option<String>,
    ) -> Result<OperationStatus> {
        let mut operation = self
            .running
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| not_running(id))?;
        operation.state = state;
        if state == OperationState::Completed {
            operation.progress = 100;
        }
        if message.is_some() {
            operation.message = message;
        }
        operation.updated_at = Utc::now();

        let mut finished = self.finished.write().await;
        finished.push_back(operation.clone());
        while finished.len() > self.config.finished_operation_limit {
            finished.pop_front();
        }
        Ok(operation)
    }

    pub async fn get(&self, id: Uuid) -> Option<OperationStatus> {
        if let Some(operation) = self.running.read().await.get(&id) {
            return Some(operation.clone());
        }
        self.finished
            .read()
            .await
            .iter()
            .rev()
            .find(|o| o.id == id)
            .cloned()
    }

    /// Running operations, optionally limited to one session, oldest first
    pub async fn active_operations(&self, session_id: Option<&str>) -> Vec<OperationStatus> {
        let mut operations: Vec<OperationStatus> = self
            .running
            .read()
            .await
            .values()
            .filter(|o| session_id.map_or(true, |s| o.session_id == s))
            .cloned()
            .collect();
        operations.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        operations
    }

    pub async fn finished_operations(&self) -> Vec<OperationStatus> {
        self.finished.read().await.iter().cloned().collect()
    }

    /// Drive `work` to completion, emitting a heartbeat every interval while it is pending
    pub async fn track<T, F>(
        &self,
        session_id: &str,
        tool_name: &str,
        description: &str,
        work: F,
    ) -> Result<T>
    where
        T: OperationReport,
        F: Future<Output = Result<T>>,
    {
        let id = self.start(session_id, tool_name, description).await;
        let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let started = tokio::time::Instant::now();
        let mut heartbeat = tokio::time::interval_at(started + period, period);
        tokio::pin!(work);

        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = heartbeat.tick() => {
                    let snapshot = self.running.read().await.get(&id).cloned();
                    if let Some(operation) = snapshot {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        tracing::info!(
                            "[FEEDBACK] {} still running after {}ms",
                            operation.description,
                            elapsed_ms
                        );
                        self.events.broadcast(VoiceEvent::OperationStillRunning {
                            operation,
                            elapsed_ms,
                        });
                    }
                }
            }
        };

        match &outcome {
            Ok(report) => match report.failure() {
                None => {
                    self.complete(id, None).await?;
                }
                Some(error) => {
                    self.fail(id, &error).await?;
                }
            },
            Err(e) => {
                self.fail(id, &e.to_string()).await?;
            }
        }
        outcome
    }
}

fn not_running(id: Uuid) -> CommanderError {
    CommanderError::Validation(format!("operation {} is not running", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> OperationTracker {
        OperationTracker::new(FeedbackConfig::default(), EventBroadcaster::new())
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<VoiceEvent>) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }

    #[tokio::test]
    async fn test_manual_lifecycle() {
        let tracker = tracker();
        let id = tracker.start("s1", "search_files", "searching logs").await;
        assert_eq!(tracker.active_operations(Some("s1")).await.len(), 1);
        assert!(tracker.active_operations(Some("s2")).await.is_empty());

        let status = tracker.progress(id, 60, Some("halfway".into())).await.unwrap();
        assert_eq!(status.progress, 60);
        let status = tracker.progress(id, 30, None).await.unwrap();
        assert_eq!(status.progress, 60);
        assert_eq!(status.message.as_deref(), Some("halfway"));

        let done = tracker.complete(id, None).await.unwrap();
        assert_eq!(done.state, OperationState::Completed);
        assert_eq!(done.progress, 100);
        assert!(tracker.active_operations(None).await.is_empty());
        assert_eq!(tracker.get(id).await.unwrap().state, OperationState::Completed);

        assert!(tracker.progress(id, 10, None).await.is_err());
        assert!(tracker.fail(id, "late").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_emits_heartbeats() {
        let tracker = tracker();
        let mut rx = tracker.events.subscribe();

        let result = tracker
            .track("s1", "execute_command", "running build", async {
                tokio::time::sleep(Duration::from_millis(12_000)).await;
                Ok(ToolExecutionResult::ok(json!("built")))
            })
            .await
            .unwrap();
        assert!(result.success);

        assert_eq!(
            drain(&mut rx),
            vec![
                "operationStarted",
                "operationStillRunning",
                "operationStillRunning",
                "operationCompleted"
            ]
        );
    }

    #[tokio::test]
    async fn test_fast_operation_has_no_heartbeat() {
        let tracker = tracker();
        let mut rx = tracker.events.subscribe();
        tracker
            .track("s1", "read_file", "reading", async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(drain(&mut rx), vec!["operationStarted", "operationCompleted"]);
    }

    #[tokio::test]
    async fn test_track_marks_failures() {
        let tracker = tracker();
        let mut rx = tracker.events.subscribe();

        let reported = tracker
            .track("s1", "delete_file", "deleting", async {
                Ok(ToolExecutionResult::failed("permission denied"))
            })
            .await
            .unwrap();
        assert!(!reported.success);

        let errored: Result<()> = tracker
            .track("s1", "delete_file", "deleting", async {
                Err(CommanderError::ToolExecution("server gone".into()))
            })
            .await;
        assert!(errored.is_err());

        let kinds = drain(&mut rx);
        assert_eq!(kinds.iter().filter(|k| **k == "operationFailed").count(), 2);
        let finished = tracker.finished_operations().await;
        assert_eq!(finished[0].message.as_deref(), Some("permission denied"));
        assert!(finished[1].message.as_deref().unwrap().contains("server gone"));
    }

    #[tokio::test]
    async fn test_finished_list_is_bounded() {
        let tracker = OperationTracker::new(
            FeedbackConfig {
                finished_operation_limit: 3,
                ..FeedbackConfig::default()
            },
            EventBroadcaster::new(),
        );
        for _ in 0..5 {
            let id = tracker.start("s1", "list_directory", "listing").await;
            tracker.complete(id, None).await.unwrap();
        }
        assert_eq!(tracker.finished_operations().await.len(), 3);
    }
}
