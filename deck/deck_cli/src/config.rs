//! `deck.toml`: engine settings plus the demo's user directory.

use anyhow::Context;
use deck_core::utils::{EngineConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A user the in-memory login service accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password: String,
    /// Second-factor code
    pub code: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Configuration of the `deckctl` binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    /// Engine settings kept in their own file, relative to this one.
    /// Replaces the `[engine]` section.
    pub engine_file: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    /// Simulated latency of the credential check
    pub verify_delay_ms: u64,
    /// How long the welcome screen stays up
    pub welcome_delay_ms: u64,
    /// Upper bound on one login run
    pub timeout_secs: u64,
    pub users: Vec<UserRecord>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            engine_file: None,
            log_level: None,
            verify_delay_ms: 150,
            welcome_delay_ms: 50,
            timeout_secs: 10,
            users: vec![UserRecord {
                username: "alice".to_string(),
                password: "wonderland".to_string(),
                code: "4242".to_string(),
                display_name: Some("Alice Liddell".to_string()),
            }],
        }
    }
}

impl CliConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        let mut config: CliConfig = toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;

        match &config.engine_file {
            Some(engine_file) => {
                let engine_path = match path.parent() {
                    Some(dir) => dir.join(engine_file),
                    None => engine_file.clone(),
                };
                config.engine = EngineConfig::load(&engine_path)
                    .with_context(|| format!("invalid engine file {}", engine_path.display()))?;
            }
            None => config
                .engine
                .validate()
                .with_context(|| format!("invalid engine section in {}", path.display()))?,
        }
        Ok(config)
    }

    /// `load` when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn welcome_delay(&self) -> Duration {
        Duration::from_millis(self.welcome_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
