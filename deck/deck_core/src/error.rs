//! Error types for the Deck workflow engine.
//!
//! Errors are grouped by subsystem. The root `Error` wraps each of them so
//! callers at the process edge can handle everything uniformly, while the
//! engine itself returns the narrow subsystem error.

use crate::id::{StepId, WorkflowId};
use thiserror::Error;

/// Root error type for Deck.
#[derive(Debug, Error)]
pub enum Error {
    /// Workflow graph and transition errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// UI-thread gateway errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Resource release errors
    #[error("Dispose error: {0}")]
    Dispose(#[from] DisposeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by workflow definition, activation and transitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// `start` was called on a workflow that is running or complete
    #[error("Workflow {0} has already been started")]
    AlreadyStarted(WorkflowId),

    /// The operation needs a running workflow
    #[error("Workflow {0} is not running")]
    NotRunning(WorkflowId),

    /// The trigger's activation has already ended
    #[error("Trigger '{trigger}' belongs to an activation that has ended")]
    StaleTrigger {
        /// Name of the fired trigger
        trigger: String,
    },

    /// The trigger was created by a different workflow instance
    #[error("Trigger '{trigger}' does not belong to workflow {workflow}")]
    ForeignTrigger {
        /// Name of the fired trigger
        trigger: String,
        /// Workflow that rejected it
        workflow: WorkflowId,
    },

    /// The owning workflow no longer exists
    #[error("Trigger '{0}' outlived its workflow")]
    WorkflowDropped(String),

    /// No edge in the step's table matches the fired key
    #[error("Step '{step}' has no edge for '{key}'")]
    NoMatchingEdge {
        /// Name of the step that was current
        step: String,
        /// The key that was looked up
        key: String,
    },

    /// A property edge could not be bound to a trigger on the controller
    #[error("Step '{step}': edge '{edge}' does not select a trigger on its controller")]
    UnboundEdge {
        /// Step name
        step: String,
        /// Edge label
        edge: String,
    },

    /// The container could not produce an instance
    #[error("Resolution failed: {0}")]
    Resolution(String),

    /// Initialization-time navigation did not settle
    #[error("Navigation chain exceeded {limit} synchronous transitions")]
    NavigationLoop {
        /// Configured bound
        limit: usize,
    },

    /// Termination was requested while a transition is being processed
    #[error("Workflow {0} is in the middle of a transition")]
    TransitionInProgress(WorkflowId),

    /// Step referenced by id does not exist
    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    /// The workflow graph is malformed
    #[error("Workflow definition error: {0}")]
    Definition(String),

    /// A nested workflow hosted by a step ended with a fault
    #[error("Nested workflow in step '{step}' failed: {message}")]
    NestedFailed {
        /// Hosting step name
        step: String,
        /// Fault reported by the nested workflow
        message: String,
    },

    /// A controller's initialization hook failed
    #[error("Step '{step}' failed to initialize: {message}")]
    Initialization {
        /// Step name
        step: String,
        /// Failure description
        message: String,
    },
}

/// Errors reported when releasing a resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DisposeError {
    /// The resource had already been released; tolerated by the engine
    #[error("{0} was already disposed")]
    AlreadyDisposed(String),

    /// Release failed for another reason
    #[error("Failed to dispose {resource}: {reason}")]
    Failed {
        /// Resource label
        resource: String,
        /// Failure description
        reason: String,
    },
}

impl DisposeError {
    /// Whether this error only reports a repeated release.
    pub fn is_already_disposed(&self) -> bool {
        matches!(self, DisposeError::AlreadyDisposed(_))
    }
}

/// Errors raised by the UI-thread gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// No execution context has been registered
    #[error("No UI execution context is registered; call init() first")]
    NotInitialized,

    /// An execution context is already registered
    #[error("A UI execution context is already registered")]
    AlreadyInitialized,

    /// A blocking invoke was issued from the owner thread
    #[error("Blocking invoke called from the UI owner thread")]
    OwnerThread,

    /// The execution context went away before the job ran
    #[error("UI execution context disconnected")]
    Disconnected,
}

/// Errors in configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type used throughout Deck.
pub type Result<T> = std::result::Result<T, Error>;
