use crate::engine::component::{Controller, View};
use crate::engine::context::StepContext;
use crate::engine::workflow::Workflow;
use crate::model::edge::{Edge, EdgeKey, EdgeTarget};
use deck_core::error::WorkflowError;
use deck_core::id::StepId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Builds the controller of an activation.
pub type ControllerFactory =
    Rc<dyn Fn(&mut StepContext<'_>) -> Result<Rc<dyn Controller>, WorkflowError>>;

/// Builds the view of an activation.
pub type ViewFactory = Rc<dyn Fn(&mut StepContext<'_>) -> Result<Rc<dyn View>, WorkflowError>>;

/// Builds the nested workflow an activation hosts. The engine starts it.
pub type NestedFactory = Rc<dyn Fn(&mut StepContext<'_>) -> Result<Workflow, WorkflowError>>;

/// Which components an activation of the step builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ActivationMode {
    /// Nothing to build; the step only routes
    #[default]
    Empty,
    /// A view without a controller
    ViewOnly,
    /// A view paired with a controller
    ViewController,
    /// A controller without a view
    ControllerOnly,
    /// A nested workflow
    Nested,
    /// A nested workflow combined with a view or controller (rejected at build)
    Conflicting,
}

impl fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationMode::Empty => write!(f, "Empty"),
            ActivationMode::ViewOnly => write!(f, "ViewOnly"),
            ActivationMode::ViewController => write!(f, "ViewController"),
            ActivationMode::ControllerOnly => write!(f, "ControllerOnly"),
            ActivationMode::Nested => write!(f, "Nested"),
            ActivationMode::Conflicting => write!(f, "Conflicting"),
        }
    }
}

/// Identity of a step, handed to runners and controllers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepInfo {
    /// Step id
    pub id: StepId,
    /// Step name
    pub name: String,
}

/// A vertex of a workflow graph
#[derive(Clone)]
pub struct Step {
    /// Unique identifier for this step
    pub id: StepId,

    /// Human-readable name; empty until the builder assigns a default
    pub name: String,

    view: Option<ViewFactory>,
    controller: Option<ControllerFactory>,
    nested: Option<NestedFactory>,
    edges: Vec<Edge>,
}

impl Step {
    /// Create a step with a name
    pub fn new(name: impl Into<String>) -> Self {
        Step {
            id: StepId::new(),
            name: name.into(),
            view: None,
            controller: None,
            nested: None,
            edges: Vec::new(),
        }
    }

    /// Create a step the builder will name
    pub fn unnamed() -> Self {
        Self::new(String::new())
    }

    /// Build a view of type `V` for every activation.
    pub fn with_view<V, F>(mut self, factory: F) -> Self
    where
        V: View,
        F: Fn(&mut StepContext<'_>) -> Result<V, WorkflowError> + 'static,
    {
        self.view = Some(Rc::new(move |ctx: &mut StepContext<'_>| {
            factory(ctx).map(|view| Rc::new(view) as Rc<dyn View>)
        }));
        self
    }

    /// Build a controller of type `C` for every activation.
    pub fn with_controller<C, F>(mut self, factory: F) -> Self
    where
        C: Controller,
        F: Fn(&mut StepContext<'_>) -> Result<C, WorkflowError> + 'static,
    {
        self.controller = Some(Rc::new(move |ctx: &mut StepContext<'_>| {
            factory(ctx).map(|controller| Rc::new(controller) as Rc<dyn Controller>)
        }));
        self
    }

    /// Host a nested workflow built fresh for every activation.
    pub fn with_nested<F>(mut self, factory: F) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> Result<Workflow, WorkflowError> + 'static,
    {
        self.nested = Some(Rc::new(factory));
        self
    }

    /// Add an outgoing edge. Duplicate keys are reported by the builder.
    pub fn with_edge(mut self, key: EdgeKey, target: EdgeTarget) -> Self {
        self.edges.push(Edge::new(key, target));
        self
    }

    /// Add an edge to another step
    pub fn on(self, key: EdgeKey, target: StepId) -> Self {
        self.with_edge(key, EdgeTarget::Step(target))
    }

    /// Add an edge that ends the workflow
    pub fn finish_on(self, key: EdgeKey) -> Self {
        self.with_edge(key, EdgeTarget::Finish)
    }

    /// Outgoing edges in declaration order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Which components an activation builds
    pub fn mode(&self) -> ActivationMode {
        match (
            self.view.is_some(),
            self.controller.is_some(),
            self.nested.is_some(),
        ) {
            (false, false, false) => ActivationMode::Empty,
            (true, false, false) => ActivationMode::ViewOnly,
            (true, true, false) => ActivationMode::ViewController,
            (false, true, false) => ActivationMode::ControllerOnly,
            (false, false, true) => ActivationMode::Nested,
            _ => ActivationMode::Conflicting,
        }
    }

    /// Id and name
    pub fn info(&self) -> StepInfo {
        StepInfo {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Find the edge whose key matches `key`
    pub fn edge(&self, key: &EdgeKey) -> Option<(usize, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .find(|(_, edge)| edge.key.same_key(key))
    }

    pub(crate) fn push_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub(crate) fn view_factory(&self) -> Option<&ViewFactory> {
        self.view.as_ref()
    }

    pub(crate) fn controller_factory(&self) -> Option<&ControllerFactory> {
        self.controller.as_ref()
    }

    pub(crate) fn nested_factory(&self) -> Option<&NestedFactory> {
        self.nested.as_ref()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("edges", &self.edges)
            .finish()
    }
}
