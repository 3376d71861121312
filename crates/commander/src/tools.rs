//! Static dictionary of MCP tools the intent resolver may target

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use ts_rs::TS;

use crate::{risk::RiskLevel, CommanderError, Result};

/// Tool categories for organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum ToolCategory {
    Filesystem,
    Process,
    Search,
    Configuration,
    Calendar,
    System,
}

/// Parameter types for validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

/// Tool parameter definition
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ToolParameter {
    pub name: String,
    pub parameter_type: ParameterType,
    pub description: String,
    pub required: bool,
}

/// Definition of one MCP tool
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters: Vec<ToolParameter>,
    pub risk_level: RiskLevel,
    pub requires_confirmation: bool,
}

/// Read-only tool lookup table
#[derive(Debug, Clone, Default)]
pub struct ToolDictionary {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolDictionary {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Result<Self> {
        let mut tools = BTreeMap::new();
        for descriptor in descriptors {
            if descriptor.name.trim().is_empty() {
                return Err(CommanderError::DictionaryLoad(
                    "tool descriptor with empty name".to_string(),
                ));
            }
            if tools.contains_key(&descriptor.name) {
                return Err(CommanderError::DictionaryLoad(format!(
                    "duplicate tool name: {}",
                    descriptor.name
                )));
            }
            tools.insert(descriptor.name.clone(), descriptor);
        }
        Ok(Self { tools })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Check required parameters are present and typed as declared
    pub fn validate_parameters(
        &self,
        name: &str,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| CommanderError::UnknownTool(name.to_string()))?;

        for parameter in &descriptor.parameters {
            match parameters.get(&parameter.name) {
                Some(value) if !parameter.parameter_type.accepts(value) => {
                    return Err(CommanderError::Validation(format!(
                        "parameter {} of {} should be {:?}",
                        parameter.name, name, parameter.parameter_type
                    )));
                }
                None if parameter.required => {
                    return Err(CommanderError::Validation(format!(
                        "{} needs a {}",
                        name, parameter.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Render the dictionary as prompt lines for the intent service
    pub fn describe_for_prompt(&self) -> String {
        self.iter()
            .map(|tool| {
                let params = tool
                    .parameters
                    .iter()
                    .map(|p| {
                        format!(
                            "{}{}: {:?}",
                            p.name,
                            if p.required { "" } else { "?" },
                            p.parameter_type
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "- {}({}) [{} risk] {}",
                    tool.name, params, tool.risk_level, tool.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tools exposed by the desktop MCP servers plus calendar actions
    pub fn builtin() -> Self {
        use ParameterType::*;
        use ToolCategory::*;

        let descriptors = vec![
            tool("read_file", "Read the contents of a file", Filesystem, RiskLevel::Low, false)
                .param("path", String, "File to read", true),
            tool(
                "read_multiple_files",
                "Read several files at once",
                Filesystem,
                RiskLevel::Low,
                false,
            )
            .param("paths", Array, "Files to read", true),
            tool(
                "write_file",
                "Create or overwrite a file with new content",
                Filesystem,
                RiskLevel::Medium,
                true,
            )
            .param("path", String, "File to write", true)
            .param("content", String, "Content to write", true),
            tool(
                "edit_block",
                "Replace a block of text inside a file",
                Filesystem,
                RiskLevel::Medium,
                true,
            )
            .param("file_path", String, "File to edit", true)
            .param("old_string", String, "Text to replace", true)
            .param("new_string", String, "Replacement text", true),
            tool(
                "list_directory",
                "List the entries of a directory",
                Filesystem,
                RiskLevel::Low,
                false,
            )
            .param("path", String, "Directory to list", true),
            tool(
                "create_directory",
                "Create a directory",
                Filesystem,
                RiskLevel::Low,
                false,
            )
            .param("path", String, "Directory to create", true),
            tool(
                "move_file",
                "Move or rename a file",
                Filesystem,
                RiskLevel::Medium,
                true,
            )
            .param("source", String, "Current location", true)
            .param("destination", String, "New location", true),
            tool(
                "delete_file",
                "Permanently delete a file",
                Filesystem,
                RiskLevel::High,
                true,
            )
            .param("path", String, "File to delete", true),
            tool(
                "get_file_info",
                "Show size, dates and permissions of a file",
                Filesystem,
                RiskLevel::Low,
                false,
            )
            .param("path", String, "File to inspect", true),
            tool(
                "search_files",
                "Find files whose names match a pattern",
                Search,
                RiskLevel::Low,
                false,
            )
            .param("path", String, "Directory to search", true)
            .param("pattern", String, "Name pattern", true),
            tool(
                "search_code",
                "Search file contents for text",
                Search,
                RiskLevel::Low,
                false,
            )
            .param("path", String, "Directory to search", true)
            .param("pattern", String, "Text or regex to find", true),
            tool(
                "start_search",
                "Start a long-running background search",
                Search,
                RiskLevel::Low,
                false,
            )
            .param("path", String, "Directory to search", true)
            .param("pattern", String, "Pattern to search for", true),
            tool(
                "get_more_search_results",
                "Fetch more results from a background search",
                Search,
                RiskLevel::Low,
                false,
            )
            .param("session_id", String, "Search session", true),
            tool(
                "stop_search",
                "Stop a background search",
                Search,
                RiskLevel::Low,
                false,
            )
            .param("session_id", String, "Search session", true),
            tool(
                "execute_command",
                "Run a terminal command",
                Process,
                RiskLevel::Medium,
                true,
            )
            .param("command", String, "Command line to run", true)
            .param("timeout_ms", Number, "How long to wait for output", false),
            tool(
                "read_output",
                "Read new output from a running command",
                Process,
                RiskLevel::Low,
                false,
            )
            .param("pid", Number, "Process id", true),
            tool(
                "list_sessions",
                "List running terminal sessions",
                Process,
                RiskLevel::Low,
                false,
            ),
            tool(
                "list_processes",
                "List running processes",
                Process,
                RiskLevel::Low,
                false,
            ),
            tool(
                "kill_process",
                "Terminate a process by id",
                Process,
                RiskLevel::High,
                true,
            )
            .param("pid", Number, "Process id", true),
            tool(
                "force_terminate",
                "Force-terminate a terminal session",
                Process,
                RiskLevel::High,
                true,
            )
            .param("pid", Number, "Session process id", true),
            tool(
                "get_config",
                "Show the tool server configuration",
                Configuration,
                RiskLevel::Low,
                false,
            ),
            tool(
                "set_config_value",
                "Change a tool server configuration value",
                Configuration,
                RiskLevel::Medium,
                true,
            )
            .param("key", String, "Setting name", true)
            .param("value", String, "New value", true),
            tool(
                "list_events",
                "List calendar events",
                Calendar,
                RiskLevel::Low,
                false,
            )
            .param("date", String, "Day to list", false),
            tool(
                "create_event",
                "Create a calendar event",
                Calendar,
                RiskLevel::Medium,
                false,
            )
            .param("title", String, "Event title", true)
            .param("start", String, "Start time", true)
            .param("duration_minutes", Number, "Length of the event", false),
            tool(
                "delete_event",
                "Delete a calendar event",
                Calendar,
                RiskLevel::High,
                true,
            )
            .param("event_id", String, "Event to delete", true),
        ];

        Self {
            tools: descriptors
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }
}

fn tool(
    name: &str,
    description: &str,
    category: ToolCategory,
    risk_level: RiskLevel,
    requires_confirmation: bool,
) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        category,
        parameters: Vec::new(),
        risk_level,
        requires_confirmation,
    }
}

impl ToolDescriptor {
    fn param(
        mut self,
        name: &str,
        parameter_type: ParameterType,
        description: &str,
        required: bool,
    ) -> Self {
        self.parameters.push(ToolParameter {
            name: name.to_string(),
            parameter_type,
            description: description.to_string(),
            required,
        });
        self
    }
}

/// Where the tool dictionary is read from
#[derive(Debug, Clone)]
pub enum DictionarySource {
    BuiltIn,
    /// JSON array of [`ToolDescriptor`]
    File(PathBuf),
}

impl DictionarySource {
    pub fn from_config(path: Option<&str>) -> Self {
        match path {
            Some(path) if !path.trim().is_empty() => DictionarySource::File(PathBuf::from(path)),
            _ => DictionarySource::BuiltIn,
        }
    }

    pub async fn load(&self) -> Result<ToolDictionary> {
        match self {
            DictionarySource::BuiltIn => Ok(ToolDictionary::builtin()),
            DictionarySource::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    CommanderError::DictionaryLoad(format!("{}: {}", path.display(), e))
                })?;
                let descriptors: Vec<ToolDescriptor> = serde_json::from_str(&raw).map_err(|e| {
                    CommanderError::DictionaryLoad(format!("{}: {}", path.display(), e))
                })?;
                tracing::info!(
                    "Loaded {} tool descriptors from {}",
                    descriptors.len(),
                    path.display()
                );
                ToolDictionary::new(descriptors)
            }
        }
    }
}

/// Dictionary loaded at most once and shared by every caller.
/// A failed load leaves the cell empty so the next caller retries.
#[derive(Debug, Clone)]
pub struct SharedDictionary {
    source: DictionarySource,
    cell: Arc<OnceCell<Arc<ToolDictionary>>>,
}

impl SharedDictionary {
    pub fn new(source: DictionarySource) -> Self {
        Self {
            source,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Already-loaded dictionary
    pub fn preloaded(dictionary: ToolDictionary) -> Self {
        Self {
            source: DictionarySource::BuiltIn,
            cell: Arc::new(OnceCell::new_with(Some(Arc::new(dictionary)))),
        }
    }

    pub async fn get(&self) -> Result<Arc<ToolDictionary>> {
        self.cell
            .get_or_try_init(|| async {
                let dictionary = self.source.load().await?;
                tracing::info!("[TOOLS] Dictionary ready with {} tools", dictionary.len());
                Ok::<_, CommanderError>(Arc::new(dictionary))
            })
            .await
            .map(Arc::clone)
    }

    pub fn loaded(&self) -> Option<Arc<ToolDictionary>> {
        self.cell.get().cloned()
    }
}
