//! Workflow configuration
//!
//! Settings are read from a JSON file. Missing fields fall back to their
//! defaults, and a couple of environment variables can override the file.
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Location of the sled database.
    pub db_path: PathBuf,
    /// Prefix of human readable request numbers, e.g. `EXP-2026-000001`.
    pub request_number_prefix: String,
    /// bech32 human readable part for request ids.
    pub id_prefix: String,
    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("expense-approval.db"),
            request_number_prefix: "EXP".to_string(),
            id_prefix: "exp_".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl WorkflowConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// `EXPENSE_DB_PATH` and `EXPENSE_LOG` take precedence over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("EXPENSE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(filter) = std::env::var("EXPENSE_LOG") {
            self.log_filter = filter;
        }
        self
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_uses_defaults() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "request_number_prefix": "SACCO" }"#)?;

        let config = WorkflowConfig::load(&path)?;
        assert_eq!(config.request_number_prefix, "SACCO");
        assert_eq!(config.id_prefix, "exp_");
        Ok(())
    }

    #[test]
    fn missing_file_falls_back_to_default() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let config = WorkflowConfig::load_or_default(&temp_dir.path().join("absent.json"))?;
        assert_eq!(config, WorkflowConfig::default());
        Ok(())
    }

    #[test]
    fn save_then_load() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("config.json");
        let config = WorkflowConfig {
            log_filter: "debug".into(),
            ..WorkflowConfig::default()
        };

        config.save(&path)?;
        assert_eq!(WorkflowConfig::load(&path)?, config);
        Ok(())
    }
}
