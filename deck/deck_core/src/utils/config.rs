//! Engine configuration.
//!
//! `EngineConfig` is plain serde data so it can sit in a section of a larger
//! TOML file owned by the host application.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// What to do when a trigger fires after its activation has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StaleTriggerPolicy {
    /// Return `WorkflowError::StaleTrigger` to the caller.
    #[default]
    Reject,
    /// Log and return `Ok(())`.
    Ignore,
}

/// Tunables for the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on transitions processed while a step is still initializing
    #[serde(default = "default_max_chained_navigations")]
    pub max_chained_navigations: usize,

    /// Handling of triggers fired after their activation ended
    #[serde(default)]
    pub stale_trigger_policy: StaleTriggerPolicy,

    /// Warn about steps the start step cannot reach when a definition is built
    #[serde(default = "default_validate_reachability")]
    pub validate_reachability: bool,

    /// Prefix for names assigned to unnamed steps
    #[serde(default = "default_step_name_prefix")]
    pub default_step_name_prefix: String,
}

fn default_max_chained_navigations() -> usize {
    64
}

fn default_validate_reachability() -> bool {
    true
}

fn default_step_name_prefix() -> String {
    "step".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chained_navigations: default_max_chained_navigations(),
            stale_trigger_policy: StaleTriggerPolicy::default(),
            validate_reachability: default_validate_reachability(),
            default_step_name_prefix: default_step_name_prefix(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!(
                "Engine configuration {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Check the configured bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chained_navigations == 0 {
            return Err(ConfigError::Invalid(
                "max_chained_navigations must be at least 1".to_string(),
            ));
        }

        if self.default_step_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_step_name_prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder-style override of the navigation bound.
    pub fn with_max_chained_navigations(mut self, limit: usize) -> Self {
        self.max_chained_navigations = limit;
        self
    }

    /// Builder-style override of the stale trigger policy.
    pub fn with_stale_trigger_policy(mut self, policy: StaleTriggerPolicy) -> Self {
        self.stale_trigger_policy = policy;
        self
    }
}
