pub mod definition;
pub mod edge;
pub mod step;

pub use definition::{DefinitionSummary, EdgeSummary, StepSummary, WorkflowBuilder, WorkflowDefinition};
pub use edge::{Edge, EdgeKey, EdgeTarget, TriggerAccessor};
pub use step::{ActivationMode, ControllerFactory, NestedFactory, Step, StepInfo, ViewFactory};
