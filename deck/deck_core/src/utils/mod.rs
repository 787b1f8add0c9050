//! Utility types shared across the workspace: log levels and engine
//! configuration.

pub mod config;
pub mod logging;

pub use config::{EngineConfig, StaleTriggerPolicy};
pub use logging::LogLevel;
