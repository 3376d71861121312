//! Configuration management for the Voice Commander CLI
//!
//! One TOML file (default `~/.vcmd/config.toml`) holds both the commander sections
//! (`[risk]`, `[confirmation]`, ...) and a `[cli]` section for this binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use commander::CommanderConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliSettings {
    #[serde(default = "default_user")]
    pub user: String,

    /// Print progress and session events while commands run
    #[serde(default = "default_true")]
    pub show_events: bool,

    #[serde(default)]
    pub history_file: Option<PathBuf>,
}

fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".to_string())
}

fn default_true() -> bool {
    true
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            user: default_user(),
            show_events: true,
            history_file: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CliFile {
    #[serde(default)]
    cli: CliSettings,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub path: PathBuf,
    pub commander: CommanderConfig,
    pub cli: CliSettings,
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vcmd")
            .join("config.toml")
    }

    /// Load the file if present, then `VCMD__*` overrides for the commander sections
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let commander = CommanderConfig::load(Some(path.as_path()))
            .with_context(|| format!("invalid configuration in {}", path.display()))?;

        let cli = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let file: CliFile = toml::from_str(&content)
                .with_context(|| format!("invalid [cli] section in {}", path.display()))?;
            file.cli
        } else {
            CliSettings::default()
        };

        Ok(Self {
            path,
            commander,
            cli,
        })
    }

    pub fn history_path(&self) -> PathBuf {
        self.cli.history_file.clone().unwrap_or_else(|| {
            self.path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("history.txt")
        })
    }

    /// Merged configuration as it would appear in the file
    pub fn to_toml(&self) -> Result<String> {
        let mut merged = toml::Value::try_from(&self.commander)?;
        if let toml::Value::Table(table) = &mut merged {
            table.insert("cli".to_string(), toml::Value::try_from(&self.cli)?);
        }
        Ok(toml::to_string_pretty(&merged)?)
    }
}
