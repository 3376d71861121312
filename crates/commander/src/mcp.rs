//! Contract for the external MCP tool-execution collaborator

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::Result;

/// Result returned by an MCP tool call
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub success: bool,
    #[ts(type = "unknown")]
    pub content: serde_json::Value,
    pub error: Option<String>,
}

impl ToolExecutionResult {
    pub fn ok(content: serde_json::Value) -> Self {
        Self {
            success: true,
            content,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Short text for speech playback
    pub fn summary(&self) -> String {
        if !self.success {
            return format!(
                "That didn't work: {}",
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
        match &self.content {
            serde_json::Value::Null => "Done.".to_string(),
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Array(items) => format!("Done. {} results.", items.len()),
            _ => "Done.".to_string(),
        }
    }
}

/// Executes tools on the aggregated MCP servers. Transport is the implementor's concern.
#[async_trait]
pub trait McpToolClient: Send + Sync {
    async fn call_tool(
        &self,
        name: &str,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<ToolExecutionResult>;
}
