use crate::engine::component::{downcast_controller, Controller};
use crate::engine::trigger::Trigger;
use deck_core::id::{EdgeId, StepId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Selects the trigger an edge is bound to from a constructed controller.
pub type TriggerAccessor = Rc<dyn Fn(&dyn Controller) -> Option<Trigger>>;

/// What has to happen for an edge to be taken.
#[derive(Clone)]
pub enum EdgeKey {
    /// A trigger field on the step's controller, selected by a typed accessor
    Property {
        /// Label used in diagnostics and summaries
        label: String,
        /// Accessor returning the controller's trigger
        accessor: TriggerAccessor,
    },
    /// Any trigger fired with this name during the activation
    Named(String),
    /// The nested workflow hosted by the step finished without an outcome
    Completed,
    /// The nested workflow hosted by the step reported this outcome
    Outcome(String),
}

impl EdgeKey {
    /// Key an edge on a trigger field of controller type `C`.
    ///
    /// ```
    /// use deck_workflow::{Controller, EdgeKey, Trigger};
    ///
    /// struct Credentials {
    ///     next: Trigger,
    /// }
    /// impl Controller for Credentials {}
    ///
    /// let key = EdgeKey::property("next", |c: &Credentials| &c.next);
    /// assert_eq!(key.label(), "next");
    /// ```
    pub fn property<C, F>(label: impl Into<String>, select: F) -> Self
    where
        C: Controller,
        F: Fn(&C) -> &Trigger + 'static,
    {
        let accessor = move |controller: &dyn Controller| {
            downcast_controller::<C>(controller).map(|concrete| select(concrete).clone())
        };
        EdgeKey::Property {
            label: label.into(),
            accessor: Rc::new(accessor),
        }
    }

    /// Key an edge on a trigger name.
    pub fn named(name: impl Into<String>) -> Self {
        EdgeKey::Named(name.into())
    }

    /// Key an edge on a named outcome of a nested workflow.
    pub fn outcome(name: impl Into<String>) -> Self {
        EdgeKey::Outcome(name.into())
    }

    /// Human-readable form of the key.
    pub fn label(&self) -> &str {
        match self {
            EdgeKey::Property { label, .. } => label,
            EdgeKey::Named(name) => name,
            EdgeKey::Completed => "completed",
            EdgeKey::Outcome(name) => name,
        }
    }

    /// Whether two keys would match the same event.
    pub fn same_key(&self, other: &EdgeKey) -> bool {
        match (self, other) {
            (EdgeKey::Property { label: a, .. }, EdgeKey::Property { label: b, .. }) => a == b,
            (EdgeKey::Named(a), EdgeKey::Named(b)) => a == b,
            (EdgeKey::Completed, EdgeKey::Completed) => true,
            (EdgeKey::Outcome(a), EdgeKey::Outcome(b)) => a == b,
            _ => false,
        }
    }

    /// Whether the key only makes sense on a step that hosts a nested workflow.
    pub fn needs_nested(&self) -> bool {
        matches!(self, EdgeKey::Completed | EdgeKey::Outcome(_))
    }
}

impl fmt::Debug for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKey::Property { label, .. } => write!(f, "Property({label})"),
            EdgeKey::Named(name) => write!(f, "Named({name})"),
            EdgeKey::Completed => write!(f, "Completed"),
            EdgeKey::Outcome(name) => write!(f, "Outcome({name})"),
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKey::Property { label, .. } => write!(f, "property:{label}"),
            EdgeKey::Named(name) => write!(f, "named:{name}"),
            EdgeKey::Completed => write!(f, "completed"),
            EdgeKey::Outcome(name) => write!(f, "outcome:{name}"),
        }
    }
}

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeTarget {
    /// Another step of the same definition
    Step(StepId),
    /// End the workflow
    Finish,
    /// End the workflow, reporting a named outcome to the parent step
    Outcome(String),
}

impl EdgeTarget {
    /// Whether taking the edge ends the workflow.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EdgeTarget::Step(_))
    }
}

/// An outgoing edge of a step
#[derive(Debug, Clone)]
pub struct Edge {
    /// Unique identifier for this edge
    pub id: EdgeId,

    /// Event that selects the edge
    pub key: EdgeKey,

    /// Where the edge leads
    pub target: EdgeTarget,
}

impl Edge {
    /// Create a new edge
    pub fn new(key: EdgeKey, target: EdgeTarget) -> Self {
        Edge {
            id: EdgeId::new(),
            key,
            target,
        }
    }

    /// Edge to another step
    pub fn to_step(key: EdgeKey, target: StepId) -> Self {
        Self::new(key, EdgeTarget::Step(target))
    }

    /// Edge that ends the workflow
    pub fn to_finish(key: EdgeKey) -> Self {
        Self::new(key, EdgeTarget::Finish)
    }
}
