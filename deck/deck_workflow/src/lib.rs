//! Deck Workflow Engine
//!
//! A step-graph engine for UI processes. A workflow is a directed graph of
//! steps; each step builds a controller, a view, both, or a nested
//! workflow when it becomes current. Controllers expose triggers, and
//! firing a trigger moves the workflow along the edge it is bound to.
//!
//! # Features
//!
//! - Typed edges: an edge names the controller field holding its trigger
//! - Synchronous navigation: a controller may navigate from `initialize`,
//!   and intermediate views are never shown
//! - Nested workflows reporting outcomes to their hosting step
//! - Scoped shared state, released with the activation that registered it
//! - Idempotent disposal of every controller, view and registered resource
//! - A fixed runner protocol, checkable with `testing::ProtocolRecorder`
//! - A UI-thread gateway for handing background results to the workflow
//!
//! # Getting Started
//!
//! ```rust
//! use deck_workflow::testing::ProtocolRecorder;
//! use deck_workflow::{Controller, EdgeKey, Step, StepContext, Trigger, Workflow, WorkflowBuilder};
//! use deck_workflow::error::WorkflowError;
//!
//! struct Greeting {
//!     next: Trigger,
//! }
//! impl Controller for Greeting {}
//!
//! let hello = Step::new("Hello").with_controller(|ctx: &mut StepContext<'_>| {
//!     Ok::<_, WorkflowError>(Greeting { next: ctx.trigger("next") })
//! });
//! let bye = Step::new("Bye").finish_on(EdgeKey::named("done"));
//! let hello = hello.on(EdgeKey::property("next", |c: &Greeting| &c.next), bye.id);
//!
//! let definition = WorkflowBuilder::new("greeting")
//!     .add_step(hello).unwrap()
//!     .add_step(bye).unwrap()
//!     .build()
//!     .unwrap();
//!
//! let recorder = ProtocolRecorder::new();
//! let workflow = Workflow::new(definition);
//! workflow.start(recorder.runner()).unwrap();
//! assert_eq!(workflow.current_step().unwrap().name, "Hello");
//! ```

/// Steps, edges and workflow definitions
pub mod model;

/// Workflow instances and the transition algorithm
pub mod engine;

/// Shared-state scopes and disposal
pub mod scope;

/// Marshalling work onto the UI thread
pub mod gateway;

/// Runner doubles for tests and demos
pub mod testing;

pub use engine::{
    downcast_controller, downcast_view, Answer, AsAny, Completion, Controller, Question,
    RunState, Runner, StepContext, Trigger, View, ViewHandle, Workflow, WorkflowHandle,
    WorkflowInfo,
};
pub use gateway::{LocalKey, UiContext, UiGateway};
pub use model::{
    ActivationMode, DefinitionSummary, Edge, EdgeKey, EdgeTarget, Step, StepInfo,
    WorkflowBuilder, WorkflowDefinition,
};
pub use scope::{Disposable, DisposalGroup, DisposeFlag, ReleaseReport, Scope};

/// Error types used across the engine
pub mod error {
    pub use deck_core::error::{ConfigError, DisposeError, GatewayError, WorkflowError};
}

/// Create a new workflow definition
pub fn create_workflow(name: &str) -> WorkflowBuilder {
    WorkflowBuilder::new(name)
}
