//! Runtime: workflow instances, activations, triggers and the runner protocol.

pub(crate) mod activation;
pub mod component;
pub mod context;
pub mod runner;
pub mod trigger;
pub mod workflow;

pub use component::{downcast_controller, downcast_view, AsAny, Controller, View};
pub use context::StepContext;
pub use runner::{Answer, Question, Runner, ViewHandle, WorkflowInfo};
pub use trigger::Trigger;
pub use workflow::{Completion, RunState, Workflow, WorkflowHandle};
