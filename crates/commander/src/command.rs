use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::risk::RiskLevel;

/// A recognised utterance mapped onto a tool call. Immutable once produced by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCommand {
    pub id: Uuid,
    pub text: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: String,
    pub risk_level: RiskLevel,
    pub tool_name: Option<String>,
    #[ts(type = "Record<string, unknown>")]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl VoiceCommand {
    pub fn new(
        text: impl Into<String>,
        confidence: f64,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            risk_level: RiskLevel::Low,
            tool_name: None,
            parameters: HashMap::new(),
        }
    }

    pub fn with_tool(
        mut self,
        tool_name: impl Into<String>,
        parameters: HashMap<String, serde_json::Value>,
    ) -> Self {
        self.tool_name = Some(tool_name.into());
        self.parameters = parameters;
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn tool(&self) -> &str {
        self.tool_name.as_deref().unwrap_or("unknown")
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}
