//! # Deck Core
//!
//! `deck_core` holds the pieces every Deck crate agrees on: strongly-typed
//! identifiers, the error hierarchy, log levels with the `log_event!` macro,
//! and the engine configuration.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for the engine, the UI gateway and configuration
//! - **id**: Strongly-typed identifier types
//! - **utils**: Log levels and `EngineConfig`
//! - **macros**: Structured logging macro

pub mod error;
pub mod id;
pub mod macros;
pub mod utils;

pub use error::{ConfigError, DisposeError, Error, GatewayError, Result, WorkflowError};
pub use id::{ActivationId, EdgeId, StepId, TriggerId, ViewId, WorkflowId};
pub use utils::{EngineConfig, LogLevel, StaleTriggerPolicy};
