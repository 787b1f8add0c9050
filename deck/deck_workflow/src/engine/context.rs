//! What factories and `Controller::initialize` see of the engine.

use crate::engine::activation::Activation;
use crate::engine::runner::Runner;
use crate::engine::trigger::{Trigger, TriggerScope};
use crate::engine::workflow::{WorkflowCore, WorkflowHandle};
use crate::model::step::StepInfo;
use crate::scope::{Disposable, Scope};
use deck_core::error::{DisposeError, WorkflowError};
use deck_core::id::ActivationId;
use deck_core::utils::EngineConfig;
use std::any::Any;
use std::rc::Rc;

/// Access to the activation being built.
///
/// Lookups go through the activation scope, which falls back to the
/// workflow's root scope. The activation scope always holds the
/// `WorkflowHandle`, the `StepInfo` and the `Rc<dyn Runner>` of the
/// activation.
pub struct StepContext<'a> {
    core: &'a WorkflowCore,
    runner: Rc<dyn Runner>,
    activation: &'a mut Activation,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        core: &'a WorkflowCore,
        runner: Rc<dyn Runner>,
        activation: &'a mut Activation,
    ) -> Self {
        Self {
            core,
            runner,
            activation,
        }
    }

    /// Weak handle to the workflow running this step.
    pub fn workflow(&self) -> WorkflowHandle {
        self.core.handle()
    }

    /// The step being activated.
    pub fn step(&self) -> &StepInfo {
        &self.activation.step
    }

    /// Identity of this visit of the step.
    pub fn activation_id(&self) -> ActivationId {
        self.activation.id
    }

    /// The presentation gateway, for modal views and questions.
    pub fn runner(&self) -> Rc<dyn Runner> {
        self.runner.clone()
    }

    /// Engine settings of the workflow.
    pub fn config(&self) -> &EngineConfig {
        self.core.config()
    }

    /// The activation scope.
    pub fn scope(&self) -> &Scope {
        &self.activation.scope
    }

    /// Find a shared instance in this activation or its workflow.
    pub fn resolve<T: Any>(&self) -> Option<Rc<T>> {
        self.activation.scope.resolve::<T>()
    }

    /// Find a shared instance or fail with a resolution error.
    pub fn require<T: Any>(&self) -> Result<Rc<T>, WorkflowError> {
        self.activation.scope.require::<T>()
    }

    /// Register an instance that lives as long as this activation.
    pub fn register<T: Any>(&mut self, instance: T) -> Rc<T> {
        self.activation.scope.register(instance)
    }

    /// Create a fresh trigger owned by this activation.
    ///
    /// Every call returns a distinct trigger, even for the same name.
    pub fn trigger(&mut self, name: &str) -> Trigger {
        let trigger = Trigger::new(
            name,
            self.core.id(),
            TriggerScope::Activation(self.activation.id),
            self.core.weak(),
        );
        self.activation.adopt(&trigger);
        trigger
    }

    /// The activation's trigger for `name`, created on first use.
    ///
    /// Named edges match these by name.
    pub fn named_trigger(&mut self, name: &str) -> Trigger {
        if let Some(trigger) = self.activation.named_trigger(name) {
            return trigger.clone();
        }
        let trigger = self.trigger(name);
        self.activation.remember_named(&trigger);
        trigger
    }

    /// Fire the named trigger for `name` right away.
    pub fn navigate(&mut self, name: &str) -> Result<(), WorkflowError> {
        self.named_trigger(name).fire()
    }

    /// End the workflow with a declared outcome.
    pub fn outcome(&mut self, name: &str) -> Result<(), WorkflowError> {
        self.core.outcome_trigger(name)?.fire()
    }

    /// Run `release` when the activation ends.
    pub fn defer<F>(&mut self, resource: &str, release: F)
    where
        F: FnOnce() -> Result<(), DisposeError> + 'static,
    {
        self.activation.disposal().defer(resource, release);
    }

    /// Dispose `resource` when the activation ends.
    pub fn own(&mut self, resource: &str, disposable: Rc<dyn Disposable>) {
        self.activation.disposal().own(resource, disposable);
    }
}
