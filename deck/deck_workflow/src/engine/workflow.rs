//! Workflow instances and the transition algorithm.
//!
//! A `Workflow` runs one instance of a `WorkflowDefinition` on the thread
//! that created it. Firing a trigger appends an event to the workflow's
//! queue. An idle workflow drains the queue right away; a workflow that is
//! already processing an event picks new events up as soon as the step it
//! is activating is in place, which is how a controller can navigate from
//! its own `initialize` before its view is ever shown.
//!
//! Every change of the current step happens inside one runner cycle:
//!
//! ```text
//! begin_transition
//!   hide_view (old step, if shown)
//!   release old activation
//!   activate target, following synchronous navigation
//!   show_view (final step, if it has a view)
//! end_transition
//! ```
//!
//! A nested workflow reports its completion to the parent's queue as an
//! event of the hosting activation, routed through the hosting step's
//! `Completed` or `Outcome` edges.

use crate::engine::activation::Activation;
use crate::engine::context::StepContext;
use crate::engine::runner::{Runner, ViewHandle, WorkflowInfo};
use crate::engine::trigger::{Trigger, TriggerScope};
use crate::model::definition::WorkflowDefinition;
use crate::model::edge::{EdgeKey, EdgeTarget};
use crate::model::step::{NestedFactory, Step, StepInfo};
use crate::scope::Scope;
use chrono::{DateTime, Utc};
use deck_core::error::{DisposeError, WorkflowError};
use deck_core::id::{ActivationId, StepId, ViewId, WorkflowId};
use deck_core::log_event;
use deck_core::utils::{EngineConfig, LogLevel, StaleTriggerPolicy};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

/// Lifecycle of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RunState {
    /// Created; shared state may still be registered
    #[default]
    NotStarted,
    /// Started and not yet ended
    Running,
    /// Ended, normally or not
    Complete,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "NotStarted"),
            RunState::Running => write!(f, "Running"),
            RunState::Complete => write!(f, "Complete"),
        }
    }
}

/// How a workflow instance ended
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Completion {
    /// An edge led to `EdgeTarget::Finish`
    Finished,
    /// An edge or outcome trigger reported a named outcome
    Outcome(String),
    /// `end_task` was called
    Terminated,
    /// A transition failed; the workflow tree was torn down
    Faulted(String),
}

impl Completion {
    /// The outcome name, for `Completion::Outcome`.
    pub fn outcome(&self) -> Option<&str> {
        match self {
            Completion::Outcome(name) => Some(name),
            _ => None,
        }
    }

    /// Whether the workflow ended because of an error.
    pub fn is_faulted(&self) -> bool {
        matches!(self, Completion::Faulted(_))
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Finished => write!(f, "finished"),
            Completion::Outcome(name) => write!(f, "outcome:{}", name),
            Completion::Terminated => write!(f, "terminated"),
            Completion::Faulted(message) => write!(f, "faulted: {}", message),
        }
    }
}

enum Event {
    Fired(Trigger),
    ChildCompleted {
        activation: ActivationId,
        completion: Completion,
    },
}

impl Event {
    fn describe(&self) -> String {
        match self {
            Event::Fired(trigger) => trigger.name().to_string(),
            Event::ChildCompleted { completion, .. } => format!("nested {}", completion),
        }
    }
}

enum Target {
    Step(StepId),
    Finish(Completion),
}

struct ParentLink {
    workflow: Weak<WorkflowCore>,
    activation: ActivationId,
}

type Observer = Box<dyn FnOnce(&Completion)>;

pub(crate) struct WorkflowCore {
    id: WorkflowId,
    definition: Rc<WorkflowDefinition>,
    scope: Scope,
    self_ref: Weak<WorkflowCore>,
    state: Cell<RunState>,
    runner: OnceCell<Rc<dyn Runner>>,
    current: RefCell<Option<Activation>>,
    current_activation: Cell<Option<ActivationId>>,
    current_step: RefCell<Option<StepInfo>>,
    queue: RefCell<VecDeque<Event>>,
    dispatching: Cell<bool>,
    in_cycle: Cell<bool>,
    /// Set when the parent ends this workflow while one of its cycles is open.
    terminating: Cell<bool>,
    parent: RefCell<Option<ParentLink>>,
    parent_id: Cell<Option<WorkflowId>>,
    outcome_triggers: RefCell<HashMap<String, Trigger>>,
    observers: RefCell<Vec<Observer>>,
    history: RefCell<Vec<String>>,
    started_at: Cell<Option<DateTime<Utc>>>,
    completion: RefCell<Option<Completion>>,
}

impl WorkflowCore {
    pub(crate) fn id(&self) -> WorkflowId {
        self.id
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        self.definition.config()
    }

    pub(crate) fn weak(&self) -> Weak<WorkflowCore> {
        self.self_ref.clone()
    }

    pub(crate) fn handle(&self) -> WorkflowHandle {
        WorkflowHandle {
            id: self.id,
            core: self.weak(),
        }
    }

    fn info(&self) -> WorkflowInfo {
        WorkflowInfo {
            id: self.id,
            name: self.definition.name().to_string(),
            parent: self.parent_id.get(),
            started_at: self.started_at.get(),
        }
    }

    fn runner(&self) -> Result<Rc<dyn Runner>, WorkflowError> {
        self.runner
            .get()
            .cloned()
            .ok_or(WorkflowError::NotRunning(self.id))
    }

    fn current_step_name(&self) -> String {
        self.current_step
            .borrow()
            .as_ref()
            .map(|step| step.name.clone())
            .unwrap_or_default()
    }

    pub(crate) fn outcome_trigger(&self, name: &str) -> Result<Trigger, WorkflowError> {
        if !self.definition.declares_outcome(name) {
            return Err(WorkflowError::Definition(format!(
                "workflow '{}' declares no outcome '{}'",
                self.definition.name(),
                name
            )));
        }

        let mut triggers = self.outcome_triggers.borrow_mut();
        if let Some(trigger) = triggers.get(name) {
            return Ok(trigger.clone());
        }
        let trigger = Trigger::new(name, self.id, TriggerScope::Workflow, self.weak());
        if self.state.get() == RunState::Complete {
            trigger.revoke();
        }
        triggers.insert(name.to_string(), trigger.clone());
        Ok(trigger)
    }

    fn start(&self, runner: Rc<dyn Runner>) -> Result<(), WorkflowError> {
        if self.state.get() != RunState::NotStarted || self.runner.set(runner.clone()).is_err() {
            return Err(WorkflowError::AlreadyStarted(self.id));
        }

        self.scope.register::<Rc<dyn Runner>>(runner.clone());
        self.state.set(RunState::Running);
        self.started_at.set(Some(Utc::now()));

        let info = self.info();
        log_event!(LogLevel::Info, "workflow started",
            workflow => &info.name,
            id => info.id.short(),
            nested => info.parent.is_some(),
        );
        runner.begin_task(&info);

        let start = self.definition.start();
        self.dispatch_with(|core| core.run_cycle(|core| core.enter(start)))
    }

    fn end_task(&self) -> Result<(), WorkflowError> {
        if self.state.get() != RunState::Running {
            return Err(WorkflowError::NotRunning(self.id));
        }
        if self.dispatching.get() || self.in_cycle.get() {
            return Err(WorkflowError::TransitionInProgress(self.id));
        }

        log_event!(LogLevel::Info, "workflow termination requested",
            workflow => self.definition.name(),
            step => self.current_step_name(),
        );
        self.dispatch_with(|core| {
            core.run_cycle(|core| {
                core.deactivate();
                Ok(Some(Completion::Terminated))
            })
        })
    }

    pub(crate) fn trigger_fired(&self, trigger: &Trigger) -> Result<(), WorkflowError> {
        if trigger.workflow() != self.id {
            return Err(WorkflowError::ForeignTrigger {
                trigger: trigger.name().to_string(),
                workflow: self.id,
            });
        }

        match self.state.get() {
            RunState::NotStarted => return Err(WorkflowError::NotRunning(self.id)),
            RunState::Complete => return self.stale(trigger, "workflow has completed"),
            RunState::Running => {}
        }
        if trigger.is_revoked() {
            return self.stale(trigger, "activation has ended");
        }
        if let TriggerScope::Activation(id) = trigger.scope() {
            if self.current_activation.get() != Some(id) {
                return self.stale(trigger, "activation is not current");
            }
        }

        log_event!(LogLevel::Trace, "trigger fired",
            trigger => trigger,
            queued => self.dispatching.get(),
        );
        self.queue
            .borrow_mut()
            .push_back(Event::Fired(trigger.clone()));

        if self.dispatching.get() {
            return Ok(());
        }
        self.dispatch_with(|_| Ok(()))
    }

    fn stale(&self, trigger: &Trigger, reason: &str) -> Result<(), WorkflowError> {
        match self.config().stale_trigger_policy {
            StaleTriggerPolicy::Reject => {
                log_event!(LogLevel::Warning, "stale trigger rejected",
                    trigger => trigger,
                    reason => reason,
                );
                Err(WorkflowError::StaleTrigger {
                    trigger: trigger.name().to_string(),
                })
            }
            StaleTriggerPolicy::Ignore => {
                log_event!(LogLevel::Debug, "stale trigger ignored",
                    trigger => trigger,
                    reason => reason,
                );
                Ok(())
            }
        }
    }

    fn child_completed(
        &self,
        activation: ActivationId,
        completion: Completion,
    ) -> Result<(), WorkflowError> {
        if self.state.get() != RunState::Running
            || self.current_activation.get() != Some(activation)
        {
            log::debug!(
                "Workflow '{}' ignores completion of a nested workflow it no longer hosts",
                self.definition.name()
            );
            return Ok(());
        }

        self.queue.borrow_mut().push_back(Event::ChildCompleted {
            activation,
            completion,
        });
        if self.dispatching.get() {
            return Ok(());
        }
        self.dispatch_with(|_| Ok(()))
    }

    /// Run `first`, then every queued event, with the dispatching flag set.
    fn dispatch_with<F>(&self, first: F) -> Result<(), WorkflowError>
    where
        F: FnOnce(&WorkflowCore) -> Result<(), WorkflowError>,
    {
        let previous = self.dispatching.replace(true);
        let result = first(self).and_then(|()| self.drain());
        self.dispatching.set(previous);
        if result.is_err() {
            self.queue.borrow_mut().clear();
        }
        result
    }

    fn drain(&self) -> Result<(), WorkflowError> {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                return Ok(());
            };

            if self.state.get() != RunState::Running {
                log::debug!(
                    "Workflow '{}' dropped '{}' queued before it completed",
                    self.definition.name(),
                    event.describe()
                );
                continue;
            }
            if !self.is_current(&event) {
                self.log_stale(&event);
                continue;
            }
            self.transition(event)?;
        }
    }

    fn is_current(&self, event: &Event) -> bool {
        match event {
            Event::Fired(trigger) => {
                !trigger.is_revoked()
                    && match trigger.scope() {
                        TriggerScope::Workflow => true,
                        TriggerScope::Activation(id) => self.current_activation.get() == Some(id),
                    }
            }
            Event::ChildCompleted { activation, .. } => {
                self.current_activation.get() == Some(*activation)
            }
        }
    }

    fn log_stale(&self, event: &Event) {
        log_event!(LogLevel::Debug, "discarding event of an ended activation",
            workflow => self.definition.name(),
            event => event.describe(),
        );
    }

    /// Pop the first queued event that concerns the current activation.
    fn take_pending(&self) -> Option<Event> {
        loop {
            let event = self.queue.borrow_mut().pop_front()?;
            if self.is_current(&event) {
                return Some(event);
            }
            self.log_stale(&event);
        }
    }

    fn transition(&self, event: Event) -> Result<(), WorkflowError> {
        let from = self.current_step_name();
        match self.resolve(&event) {
            Ok(target) => {
                log_event!(LogLevel::Info, "transition",
                    workflow => self.definition.name(),
                    from => &from,
                    via => event.describe(),
                    to => self.describe_target(&target),
                );
                self.run_cycle(|core| {
                    core.deactivate();
                    if core.terminating.get() {
                        return Ok(None);
                    }
                    match target {
                        Target::Step(next) => core.enter(next),
                        Target::Finish(completion) => Ok(Some(completion)),
                    }
                })
            }
            Err(err) if matches!(event, Event::Fired(_)) => {
                log_event!(LogLevel::Warning, "trigger has no transition",
                    workflow => self.definition.name(),
                    step => &from,
                    error => &err,
                );
                Err(err)
            }
            Err(err) => self.run_cycle(|_| Err(err)),
        }
    }

    fn describe_target(&self, target: &Target) -> String {
        match target {
            Target::Step(id) => self
                .definition
                .step(id)
                .map(|step| step.name.clone())
                .unwrap_or_else(|| id.to_string()),
            Target::Finish(completion) => completion.to_string(),
        }
    }

    /// Wrap `body` in one runner cycle and settle the run state afterwards.
    fn run_cycle<F>(&self, body: F) -> Result<(), WorkflowError>
    where
        F: FnOnce(&WorkflowCore) -> Result<Option<Completion>, WorkflowError>,
    {
        let runner = self.runner()?;
        let info = self.info();

        self.in_cycle.set(true);
        runner.begin_transition(&info);
        let result = match body(self) {
            Ok(_) if self.terminating.get() => {
                self.deactivate();
                Ok(Some(Completion::Terminated))
            }
            Err(err) => {
                self.deactivate();
                Err(err)
            }
            settled => settled,
        };
        runner.end_transition(&info);
        self.in_cycle.set(false);

        match result {
            Ok(None) => Ok(()),
            Ok(Some(completion)) => self.complete(completion),
            Err(err) => {
                self.queue.borrow_mut().clear();
                log_event!(LogLevel::Error, "workflow faulted",
                    workflow => self.definition.name(),
                    error => &err,
                );
                if let Err(route) = self.complete(Completion::Faulted(err.to_string())) {
                    log::warn!(
                        "Workflow '{}' could not report its fault to its parent: {}",
                        self.definition.name(),
                        route
                    );
                }
                Err(err)
            }
        }
    }

    /// Activate `step` and follow synchronous navigation until a step
    /// stays current (its view is shown) or the workflow finishes.
    fn enter(&self, step: StepId) -> Result<Option<Completion>, WorkflowError> {
        let limit = self.config().max_chained_navigations;
        let mut next = step;
        let mut chained = 0usize;

        loop {
            self.activate(next)?;
            if self.terminating.get() {
                return Ok(None);
            }

            let Some(event) = self.take_pending() else {
                self.present();
                return Ok(None);
            };

            chained += 1;
            if chained > limit {
                return Err(WorkflowError::NavigationLoop { limit });
            }

            let from = self.current_step_name();
            let target = self.resolve(&event)?;
            log_event!(LogLevel::Debug, "chained navigation",
                workflow => self.definition.name(),
                from => &from,
                via => event.describe(),
                to => self.describe_target(&target),
                chain => chained,
            );
            self.deactivate();
            if self.terminating.get() {
                return Ok(None);
            }

            match target {
                Target::Step(id) => next = id,
                Target::Finish(completion) => return Ok(Some(completion)),
            }
        }
    }

    fn activate(&self, step_id: StepId) -> Result<(), WorkflowError> {
        let step = self
            .definition
            .step(&step_id)
            .ok_or(WorkflowError::StepNotFound(step_id))?;
        let runner = self.runner()?;

        let mut activation = Activation::new(step.info(), &self.scope);
        activation.scope.register(step.info());
        self.current_activation.set(Some(activation.id));
        *self.current_step.borrow_mut() = Some(step.info());
        self.history.borrow_mut().push(step.name.clone());

        log_event!(LogLevel::Debug, "activating step",
            workflow => self.definition.name(),
            step => &step.name,
            activation => activation.id.short(),
        );

        if let Err(err) = self.build(step, &runner, &mut activation) {
            activation.release();
            self.current_activation.set(None);
            *self.current_step.borrow_mut() = None;
            return Err(err);
        }

        let previous = self.current.borrow_mut().replace(activation);
        if let Some(mut previous) = previous {
            log::warn!(
                "Step '{}' was still active when '{}' was activated",
                previous.step.name,
                step.name
            );
            previous.release();
        }
        Ok(())
    }

    fn build(
        &self,
        step: &Step,
        runner: &Rc<dyn Runner>,
        activation: &mut Activation,
    ) -> Result<(), WorkflowError> {
        if let Some(factory) = step.nested_factory() {
            return self.build_nested(factory, runner, activation);
        }

        let controller = match step.controller_factory() {
            Some(factory) => {
                let controller = factory(&mut StepContext::new(self, runner.clone(), activation))?;
                let disposable = controller.clone();
                activation
                    .disposal()
                    .defer("controller", move || disposable.dispose());
                activation.controller = Some(controller.clone());
                Some(controller)
            }
            None => None,
        };

        if let Some(controller) = &controller {
            for (index, edge) in step.edges().iter().enumerate() {
                let EdgeKey::Property { label, accessor } = &edge.key else {
                    continue;
                };
                let unbound = || WorkflowError::UnboundEdge {
                    step: step.name.clone(),
                    edge: label.clone(),
                };

                let trigger = accessor(&**controller).ok_or_else(unbound)?;
                if trigger.workflow() != self.id {
                    return Err(WorkflowError::ForeignTrigger {
                        trigger: trigger.name().to_string(),
                        workflow: self.id,
                    });
                }
                if trigger.activation() != Some(activation.id) {
                    return Err(unbound());
                }
                if let Some(previous) = activation.bind(&trigger, index) {
                    return Err(WorkflowError::Definition(format!(
                        "edges '{}' and '{}' of step '{}' select the same trigger",
                        step.edges()[previous].key.label(),
                        label,
                        step.name
                    )));
                }
            }
        }

        if let Some(factory) = step.view_factory() {
            let view = factory(&mut StepContext::new(self, runner.clone(), activation))?;
            let disposable = view.clone();
            activation
                .disposal()
                .defer("view", move || disposable.dispose());
            if let Some(controller) = &controller {
                view.attach(controller.clone());
            }
            activation.view = Some(ViewHandle {
                id: ViewId::new(),
                step: activation.step.clone(),
                workflow: self.id,
                view,
                controller: controller.clone(),
            });
        }

        if let Some(controller) = controller {
            controller.initialize(&mut StepContext::new(self, runner.clone(), activation))?;
        }
        Ok(())
    }

    fn build_nested(
        &self,
        factory: &NestedFactory,
        runner: &Rc<dyn Runner>,
        activation: &mut Activation,
    ) -> Result<(), WorkflowError> {
        let child = factory(&mut StepContext::new(self, runner.clone(), activation))?;
        if child.run_state() != RunState::NotStarted {
            return Err(WorkflowError::AlreadyStarted(child.id()));
        }

        child.core.attach_parent(self.weak(), self.id, activation.id);
        let hosted = child.clone();
        activation
            .disposal()
            .defer("nested workflow", move || hosted.core.terminate_from_parent());
        activation.nested = Some(child.clone());

        child.start(runner.clone())
    }

    fn attach_parent(&self, parent: Weak<WorkflowCore>, parent_id: WorkflowId, activation: ActivationId) {
        self.parent_id.set(Some(parent_id));
        *self.parent.borrow_mut() = Some(ParentLink {
            workflow: parent,
            activation,
        });
    }

    /// End a nested workflow because its parent left the hosting step.
    /// Completion is not routed back to the parent.
    ///
    /// Inside an open cycle the termination is only recorded; the cycle
    /// drops the step it was building and completes once it has closed.
    fn terminate_from_parent(&self) -> Result<(), DisposeError> {
        self.parent.borrow_mut().take();
        let resource = format!("nested workflow '{}'", self.definition.name());

        if self.state.get() != RunState::Running {
            return Err(DisposeError::AlreadyDisposed(resource));
        }

        log_event!(LogLevel::Info, "nested workflow terminated by its parent",
            workflow => self.definition.name(),
            step => self.current_step_name(),
        );

        let result = if self.in_cycle.get() {
            log::debug!(
                "Workflow '{}' will terminate when its current transition ends",
                self.definition.name()
            );
            self.terminating.set(true);
            Ok(())
        } else {
            let previous = self.dispatching.replace(true);
            let result = self.run_cycle(|core| {
                core.deactivate();
                Ok(Some(Completion::Terminated))
            });
            self.dispatching.set(previous);
            result
        };
        self.queue.borrow_mut().clear();

        result.map_err(|err| DisposeError::Failed {
            resource,
            reason: err.to_string(),
        })
    }

    /// Hide the current view if shown, then release the current activation.
    fn deactivate(&self) {
        let previous = self.current.borrow_mut().take();
        self.current_activation.set(None);
        *self.current_step.borrow_mut() = None;

        let Some(mut activation) = previous else {
            return;
        };

        if let Some(view) = activation.shown_view() {
            if let Some(runner) = self.runner.get() {
                runner.hide_view(&view);
            }
        }

        let report = activation.release();
        if !report.is_clean() {
            log_event!(LogLevel::Warning, "activation released with failures",
                workflow => self.definition.name(),
                step => &activation.step.name,
                failures => report.failed.len(),
            );
        }
    }

    fn present(&self) {
        let view = self
            .current
            .borrow_mut()
            .as_mut()
            .and_then(|activation| activation.take_unshown_view());

        if let (Some(view), Some(runner)) = (view, self.runner.get()) {
            log_event!(LogLevel::Debug, "showing view",
                workflow => self.definition.name(),
                step => &view.step.name,
            );
            runner.show_view(&view);
        }
    }

    fn resolve(&self, event: &Event) -> Result<Target, WorkflowError> {
        if let Event::Fired(trigger) = event {
            if trigger.scope() == TriggerScope::Workflow {
                return Ok(Target::Finish(Completion::Outcome(
                    trigger.name().to_string(),
                )));
            }
        }

        let current = self.current.borrow();
        let activation = current
            .as_ref()
            .ok_or(WorkflowError::NotRunning(self.id))?;
        let step = self
            .definition
            .step(&activation.step.id)
            .ok_or(WorkflowError::StepNotFound(activation.step.id))?;

        let edge = match event {
            Event::Fired(trigger) => {
                let index = activation.binding(trigger).or_else(|| {
                    step.edge(&EdgeKey::named(trigger.name()))
                        .map(|(index, _)| index)
                });
                match index {
                    Some(index) => &step.edges()[index],
                    None => {
                        return Err(WorkflowError::NoMatchingEdge {
                            step: step.name.clone(),
                            key: trigger.name().to_string(),
                        })
                    }
                }
            }
            Event::ChildCompleted { completion, .. } => {
                let key = match completion {
                    Completion::Finished | Completion::Terminated => EdgeKey::Completed,
                    Completion::Outcome(name) => EdgeKey::outcome(name.clone()),
                    Completion::Faulted(message) => {
                        return Err(WorkflowError::NestedFailed {
                            step: step.name.clone(),
                            message: message.clone(),
                        })
                    }
                };
                match step.edge(&key) {
                    Some((_, edge)) => edge,
                    None => {
                        return Err(WorkflowError::NoMatchingEdge {
                            step: step.name.clone(),
                            key: key.to_string(),
                        })
                    }
                }
            }
        };

        Ok(match &edge.target {
            EdgeTarget::Step(id) => Target::Step(*id),
            EdgeTarget::Finish => Target::Finish(Completion::Finished),
            EdgeTarget::Outcome(name) => Target::Finish(Completion::Outcome(name.clone())),
        })
    }

    /// Mark the workflow complete, notify observers and the runner, and
    /// report the completion to a parent workflow.
    fn complete(&self, completion: Completion) -> Result<(), WorkflowError> {
        if self.state.get() == RunState::Complete {
            return Ok(());
        }
        self.state.set(RunState::Complete);
        self.current_activation.set(None);
        *self.current_step.borrow_mut() = None;
        for trigger in self.outcome_triggers.borrow().values() {
            trigger.revoke();
        }
        *self.completion.borrow_mut() = Some(completion.clone());

        let info = self.info();
        log_event!(LogLevel::Info, "workflow complete",
            workflow => &info.name,
            id => info.id.short(),
            completion => &completion,
        );

        let observers = std::mem::take(&mut *self.observers.borrow_mut());
        for observer in observers {
            observer(&completion);
        }

        if let Some(runner) = self.runner.get() {
            runner.end_task(&info);
        }

        let link = self.parent.borrow_mut().take();
        match link.and_then(|link| link.workflow.upgrade().map(|parent| (parent, link.activation))) {
            Some((parent, activation)) => parent.child_completed(activation, completion),
            None => Ok(()),
        }
    }
}

impl Drop for WorkflowCore {
    fn drop(&mut self) {
        if let Some(mut activation) = self.current.get_mut().take() {
            log::debug!(
                "Workflow '{}' dropped while step '{}' was active; releasing it",
                self.definition.name(),
                activation.step.name
            );
            activation.release();
        }
    }
}

/// A running or runnable workflow instance.
///
/// Cloning yields another handle to the same instance. All methods must be
/// called on the thread that created it.
#[derive(Clone)]
pub struct Workflow {
    core: Rc<WorkflowCore>,
}

impl Workflow {
    /// Create an instance of `definition` with an empty root scope.
    pub fn new(definition: WorkflowDefinition) -> Self {
        let definition = Rc::new(definition);
        let id = WorkflowId::new();
        let scope = Scope::root(format!("{}#{}", definition.name(), id.short()));

        let core = Rc::new_cyclic(|self_ref: &Weak<WorkflowCore>| WorkflowCore {
            id,
            definition,
            scope,
            self_ref: self_ref.clone(),
            state: Cell::new(RunState::NotStarted),
            runner: OnceCell::new(),
            current: RefCell::new(None),
            current_activation: Cell::new(None),
            current_step: RefCell::new(None),
            queue: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
            in_cycle: Cell::new(false),
            terminating: Cell::new(false),
            parent: RefCell::new(None),
            parent_id: Cell::new(None),
            outcome_triggers: RefCell::new(HashMap::new()),
            observers: RefCell::new(Vec::new()),
            history: RefCell::new(Vec::new()),
            started_at: Cell::new(None),
            completion: RefCell::new(None),
        });
        core.scope.register(core.handle());

        Self { core }
    }

    /// Instance id
    pub fn id(&self) -> WorkflowId {
        self.core.id
    }

    /// Definition name
    pub fn name(&self) -> &str {
        self.core.definition.name()
    }

    /// The graph this instance runs
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.core.definition
    }

    /// The root scope shared by every activation of this instance
    pub fn scope(&self) -> Scope {
        self.core.scope.clone()
    }

    /// Register shared state into the root scope. Only allowed before `start`.
    pub fn register<T: Any>(&self, instance: T) -> Result<Rc<T>, WorkflowError> {
        self.ensure_not_started()?;
        Ok(self.core.scope.register(instance))
    }

    /// Register already shared state into the root scope, for instance an
    /// object the parent workflow also holds.
    pub fn register_rc<T: Any>(&self, instance: Rc<T>) -> Result<(), WorkflowError> {
        self.ensure_not_started()?;
        self.core.scope.register_rc(instance);
        Ok(())
    }

    fn ensure_not_started(&self) -> Result<(), WorkflowError> {
        if self.core.state.get() != RunState::NotStarted {
            return Err(WorkflowError::AlreadyStarted(self.core.id));
        }
        Ok(())
    }

    /// Begin the task with `runner` and activate the start step.
    ///
    /// Synchronous navigation from the start step is followed before this
    /// returns. Fails with `AlreadyStarted` on a second call, leaving the
    /// instance untouched.
    pub fn start(&self, runner: Rc<dyn Runner>) -> Result<(), WorkflowError> {
        self.core.start(runner)
    }

    /// Terminate the workflow from whatever step is current.
    ///
    /// Must not be called while a transition of this workflow is being
    /// processed; that returns `TransitionInProgress`.
    pub fn end_task(&self) -> Result<(), WorkflowError> {
        self.core.end_task()
    }

    /// Call `observer` once when the workflow completes, or right away if
    /// it already has.
    pub fn on_complete<F>(&self, observer: F)
    where
        F: FnOnce(&Completion) + 'static,
    {
        let done = self.core.completion.borrow().clone();
        match done {
            Some(completion) => observer(&completion),
            None => self.core.observers.borrow_mut().push(Box::new(observer)),
        }
    }

    /// The trigger that ends this workflow with the declared outcome `name`.
    pub fn outcome_trigger(&self, name: &str) -> Result<Trigger, WorkflowError> {
        self.core.outcome_trigger(name)
    }

    /// Lifecycle state
    pub fn run_state(&self) -> RunState {
        self.core.state.get()
    }

    /// Whether the workflow is running
    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// The current step, while running
    pub fn current_step(&self) -> Option<StepInfo> {
        self.core.current_step.borrow().clone()
    }

    /// Identity as reported to the runner
    pub fn info(&self) -> WorkflowInfo {
        self.core.info()
    }

    /// Whether a parent workflow hosts this instance
    pub fn is_nested(&self) -> bool {
        self.core.parent_id.get().is_some()
    }

    /// Names of the steps activated so far, in order
    pub fn history(&self) -> Vec<String> {
        self.core.history.borrow().clone()
    }

    /// How the workflow ended, once it has
    pub fn completion(&self) -> Option<Completion> {
        self.core.completion.borrow().clone()
    }

    /// A weak handle that does not keep the instance alive
    pub fn handle(&self) -> WorkflowHandle {
        self.core.handle()
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.core.id)
            .field("name", &self.core.definition.name())
            .field("state", &self.core.state.get())
            .field("current_step", &self.core.current_step.borrow())
            .finish()
    }
}

/// Weak reference to a workflow instance.
///
/// Registered in the root scope of every workflow, so controllers can
/// resolve the workflow that runs them.
#[derive(Clone)]
pub struct WorkflowHandle {
    id: WorkflowId,
    core: Weak<WorkflowCore>,
}

impl WorkflowHandle {
    /// Instance id
    pub fn id(&self) -> WorkflowId {
        self.id
    }

    /// The workflow, if it still exists
    pub fn upgrade(&self) -> Option<Workflow> {
        self.core.upgrade().map(|core| Workflow { core })
    }

    /// Whether the workflow still exists
    pub fn is_alive(&self) -> bool {
        self.core.strong_count() > 0
    }
}

impl fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::component::Controller;
    use crate::model::definition::WorkflowBuilder;
    use crate::model::step::Step;
    use crate::testing::{ProtocolRecorder, RunnerEvent};

    struct Idle;
    impl Controller for Idle {}

    fn single_step(name: &str) -> WorkflowDefinition {
        WorkflowBuilder::new(name)
            .add_step(
                Step::new("Only")
                    .with_controller(|_| Ok(Idle))
                    .finish_on(EdgeKey::named("Done")),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_start_and_introspection() {
        let recorder = ProtocolRecorder::new();
        let workflow = Workflow::new(single_step("single"));
        assert_eq!(workflow.run_state(), RunState::NotStarted);
        assert!(workflow.current_step().is_none());

        workflow.start(recorder.runner()).unwrap();
        assert!(workflow.is_running());
        assert_eq!(workflow.current_step().unwrap().name, "Only");
        assert_eq!(workflow.history(), vec!["Only"]);
        assert!(workflow.info().started_at.is_some());
        assert!(!workflow.is_nested());
        assert!(recorder.violations().is_empty());
    }

    #[test]
    fn test_register_after_start_rejected() {
        let recorder = ProtocolRecorder::new();
        let workflow = Workflow::new(single_step("register"));
        workflow.register(5u32).unwrap();
        workflow.start(recorder.runner()).unwrap();

        assert!(matches!(
            workflow.register(6u32),
            Err(WorkflowError::AlreadyStarted(_))
        ));
        assert_eq!(*workflow.scope().require::<u32>().unwrap(), 5);
    }

    #[test]
    fn test_end_task_requires_running() {
        let workflow = Workflow::new(single_step("idle"));
        assert!(matches!(
            workflow.end_task(),
            Err(WorkflowError::NotRunning(_))
        ));
    }

    #[test]
    fn test_end_task_completes_once() {
        let recorder = ProtocolRecorder::new();
        let workflow = Workflow::new(single_step("terminate"));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        workflow.on_complete(move |completion| sink.borrow_mut().push(completion.clone()));

        workflow.start(recorder.runner()).unwrap();
        workflow.end_task().unwrap();

        assert_eq!(workflow.run_state(), RunState::Complete);
        assert_eq!(*seen.borrow(), vec![Completion::Terminated]);
        assert!(matches!(
            workflow.end_task(),
            Err(WorkflowError::NotRunning(_))
        ));
        assert_eq!(recorder.count(|e| matches!(e, RunnerEvent::EndTask { .. })), 1);
        assert!(recorder.violations().is_empty());
    }

    #[test]
    fn test_on_complete_after_completion_runs_immediately() {
        let recorder = ProtocolRecorder::new();
        let workflow = Workflow::new(single_step("late"));
        workflow.start(recorder.runner()).unwrap();
        workflow.end_task().unwrap();

        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        workflow.on_complete(move |_| flag.set(true));
        assert!(called.get());
    }

    #[test]
    fn test_undeclared_outcome_rejected() {
        let workflow = Workflow::new(single_step("outcomes"));
        assert!(matches!(
            workflow.outcome_trigger("Failed"),
            Err(WorkflowError::Definition(_))
        ));
    }

    #[test]
    fn test_handle_does_not_keep_workflow_alive() {
        let workflow = Workflow::new(single_step("weak"));
        let handle = workflow.handle();
        assert!(handle.upgrade().is_some());
        drop(workflow);
        assert!(!handle.is_alive());
    }
}
