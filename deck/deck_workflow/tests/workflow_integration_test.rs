//! Integration tests for the workflow engine.
//!
//! These drive complete workflows through the public API and check the
//! runner protocol, disposal and routing with `ProtocolRecorder`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::thread;
use std::time::Duration;

use deck_core::utils::{EngineConfig, StaleTriggerPolicy};
use deck_workflow::error::{DisposeError, WorkflowError};
use deck_workflow::testing::{ProtocolRecorder, RunnerEvent};
use deck_workflow::{
    Answer, Completion, Controller, Disposable, DisposeFlag, EdgeKey, EdgeTarget, Question,
    RunState, Runner, Step, StepContext, StepInfo, Trigger, UiGateway, View, Workflow,
    WorkflowBuilder, WorkflowDefinition, WorkflowHandle,
};

type Journal = Rc<RefCell<Vec<String>>>;

/// Controller with a single `next` trigger.
struct Form {
    next: Trigger,
    step: String,
    journal: Journal,
}

impl Controller for Form {
    fn dispose(&self) -> Result<(), DisposeError> {
        self.journal
            .borrow_mut()
            .push(format!("controller:{}", self.step));
        Ok(())
    }
}

/// Controller that navigates from `initialize`.
struct Hop {
    next: Trigger,
}

impl Controller for Hop {
    fn initialize(&self, _ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        self.next.fire()
    }
}

struct Idle;
impl Controller for Idle {}

/// Controller that fires a trigger it was handed while it initializes.
struct Relay {
    target: Trigger,
}

impl Controller for Relay {
    fn initialize(&self, _ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        self.target.fire()
    }
}

struct Details;
impl View for Details {}

struct Screen {
    step: String,
    journal: Journal,
    attached: Cell<bool>,
}

impl View for Screen {
    fn attach(&self, _controller: Rc<dyn Controller>) {
        self.attached.set(true);
    }

    fn dispose(&self) -> Result<(), DisposeError> {
        self.journal.borrow_mut().push(format!("view:{}", self.step));
        Ok(())
    }
}

/// View whose release can also happen outside the engine.
struct Fragile {
    flag: Rc<DisposeFlag>,
}

impl View for Fragile {
    fn dispose(&self) -> Result<(), DisposeError> {
        self.flag.mark("fragile view")
    }
}

struct Connection {
    flag: DisposeFlag,
}

impl Disposable for Connection {
    fn dispose(&self) -> Result<(), DisposeError> {
        self.flag.mark("connection")
    }
}

struct Marker;
struct MissingService;

#[derive(Clone, Default)]
struct Fixture {
    journal: Journal,
    triggers: Rc<RefCell<HashMap<String, Trigger>>>,
}

impl Fixture {
    fn new() -> Self {
        Self::default()
    }

    /// A step with a `Form` controller and no view.
    fn form_controller(&self, name: &str) -> Step {
        let journal = self.journal.clone();
        let triggers = self.triggers.clone();
        let step = name.to_string();
        Step::new(name).with_controller(move |ctx| {
            let next = ctx.trigger("next");
            triggers.borrow_mut().insert(step.clone(), next.clone());
            Ok(Form {
                next,
                step: step.clone(),
                journal: journal.clone(),
            })
        })
    }

    /// A step with a `Form` controller and a `Screen` view.
    fn form_step(&self, name: &str) -> Step {
        self.screen(self.form_controller(name))
    }

    /// A step whose `Hop` controller navigates during initialization.
    fn hop_step(&self, name: &str) -> Step {
        self.screen(Step::new(name).with_controller(|ctx| {
            Ok(Hop {
                next: ctx.trigger("next"),
            })
        }))
    }

    fn screen(&self, step: Step) -> Step {
        let journal = self.journal.clone();
        step.with_view(move |ctx| {
            Ok(Screen {
                step: ctx.step().name.clone(),
                journal: journal.clone(),
                attached: Cell::new(false),
            })
        })
    }

    fn trigger(&self, step: &str) -> Trigger {
        self.triggers.borrow()[step].clone()
    }

    fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }
}

fn next_key() -> EdgeKey {
    EdgeKey::property("next", |c: &Form| &c.next)
}

fn hop_key() -> EdgeKey {
    EdgeKey::property("next", |c: &Hop| &c.next)
}

fn linear(fx: &Fixture) -> WorkflowDefinition {
    let b = fx.form_step("B").finish_on(next_key());
    let a = fx.form_step("A").on(next_key(), b.id);
    WorkflowBuilder::new("linear")
        .add_step(a)
        .unwrap()
        .add_step(b)
        .unwrap()
        .build()
        .unwrap()
}

fn count_completions(workflow: &Workflow) -> Rc<Cell<u32>> {
    let count = Rc::new(Cell::new(0));
    let counter = count.clone();
    workflow.on_complete(move |_| counter.set(counter.get() + 1));
    count
}

#[test]
fn test_two_step_linear_flow() {
    let fx = Fixture::new();
    let recorder = ProtocolRecorder::new();
    let workflow = Workflow::new(linear(&fx));
    let completions = count_completions(&workflow);

    workflow.start(recorder.runner()).unwrap();
    assert_eq!(recorder.shown_steps(), vec!["A"]);
    assert_eq!(workflow.current_step().unwrap().name, "A");

    fx.trigger("A").fire().unwrap();
    assert_eq!(fx.journal(), vec!["view:A", "controller:A"]);
    assert_eq!(workflow.current_step().unwrap().name, "B");

    fx.trigger("B").fire().unwrap();
    assert_eq!(
        fx.journal(),
        vec!["view:A", "controller:A", "view:B", "controller:B"]
    );
    assert_eq!(workflow.run_state(), RunState::Complete);
    assert_eq!(workflow.completion(), Some(Completion::Finished));
    assert!(workflow.current_step().is_none());
    assert_eq!(completions.get(), 1);

    assert_eq!(
        recorder.trace(workflow.id()),
        vec![
            "begin_task", "begin", "show:A", "end", "begin", "hide:A", "show:B", "end",
            "begin", "hide:B", "end", "end_task"
        ]
    );
    assert_eq!(recorder.count(|e| matches!(e, RunnerEvent::BeginTask { .. })), 1);
    assert_eq!(recorder.count(|e| matches!(e, RunnerEvent::EndTask { .. })), 1);
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_start_twice_fails_without_side_effects() {
    let fx = Fixture::new();
    let recorder = ProtocolRecorder::new();
    let workflow = Workflow::new(linear(&fx));

    workflow.start(recorder.runner()).unwrap();
    let events = recorder.events().len();

    assert!(matches!(
        workflow.start(recorder.runner()),
        Err(WorkflowError::AlreadyStarted(id)) if id == workflow.id()
    ));
    assert_eq!(recorder.events().len(), events);
    assert_eq!(workflow.current_step().unwrap().name, "A");
    assert_eq!(workflow.history(), vec!["A"]);
}

#[test]
fn test_initialization_navigation_skips_views() {
    let fx = Fixture::new();
    let last = fx.form_step("Step6");
    let mut next = last.id;
    let mut chain = vec![last];
    for i in (1..=5).rev() {
        let step = fx.hop_step(&format!("Step{}", i)).on(hop_key(), next);
        next = step.id;
        chain.push(step);
    }
    chain.reverse();

    let mut builder = WorkflowBuilder::new("chain");
    for step in chain {
        builder = builder.add_step(step).unwrap();
    }
    let workflow = Workflow::new(builder.build().unwrap());
    let recorder = ProtocolRecorder::new();

    workflow.start(recorder.runner()).unwrap();

    assert_eq!(workflow.current_step().unwrap().name, "Step6");
    assert_eq!(recorder.shown_steps(), vec!["Step6"]);
    assert!(recorder.hidden_steps().is_empty());
    assert_eq!(
        workflow.history(),
        vec!["Step1", "Step2", "Step3", "Step4", "Step5", "Step6"]
    );
    // Skipped views were built and released without being shown.
    assert_eq!(
        fx.journal(),
        vec!["view:Step1", "view:Step2", "view:Step3", "view:Step4", "view:Step5"]
    );
    assert_eq!(
        recorder.count(|e| matches!(e, RunnerEvent::BeginTransition { .. })),
        1
    );
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_initialization_navigation_can_finish() {
    let fx = Fixture::new();
    let second = fx.hop_step("Second").finish_on(hop_key());
    let first = fx.hop_step("First").on(hop_key(), second.id);
    let definition = WorkflowBuilder::new("skip-all")
        .add_step(first)
        .unwrap()
        .add_step(second)
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    let recorder = ProtocolRecorder::new();

    workflow.start(recorder.runner()).unwrap();

    assert_eq!(workflow.completion(), Some(Completion::Finished));
    assert!(recorder.shown_steps().is_empty());
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_self_loop_is_bounded() {
    let fx = Fixture::new();
    let looping = fx.hop_step("Loop");
    let id = looping.id;
    let definition = WorkflowBuilder::new("loop")
        .with_config(EngineConfig::default().with_max_chained_navigations(8))
        .add_step(looping.on(hop_key(), id))
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    let recorder = ProtocolRecorder::new();

    let result = workflow.start(recorder.runner());

    assert!(matches!(result, Err(WorkflowError::NavigationLoop { limit: 8 })));
    assert_eq!(workflow.history().len(), 9);
    assert!(workflow.completion().unwrap().is_faulted());
    assert!(recorder.shown_steps().is_empty());
    assert_eq!(recorder.count(|e| matches!(e, RunnerEvent::EndTask { .. })), 1);
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_stale_trigger_rejected() {
    let fx = Fixture::new();
    let recorder = ProtocolRecorder::new();
    let workflow = Workflow::new(linear(&fx));
    workflow.start(recorder.runner()).unwrap();

    let old = fx.trigger("A");
    old.fire().unwrap();
    assert!(old.is_revoked());

    assert!(matches!(
        old.fire(),
        Err(WorkflowError::StaleTrigger { trigger }) if trigger == "next"
    ));
    assert_eq!(workflow.current_step().unwrap().name, "B");
    assert_eq!(old.fire_count(), 2);
}

#[test]
fn test_stale_trigger_ignored_by_config() {
    let fx = Fixture::new();
    let b = fx.form_step("B").finish_on(next_key());
    let a = fx.form_step("A").on(next_key(), b.id);
    let definition = WorkflowBuilder::new("lenient")
        .with_config(EngineConfig::default().with_stale_trigger_policy(StaleTriggerPolicy::Ignore))
        .add_step(a)
        .unwrap()
        .add_step(b)
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    workflow.start(ProtocolRecorder::new().runner()).unwrap();

    let old = fx.trigger("A");
    old.fire().unwrap();
    old.fire().unwrap();
    assert_eq!(workflow.current_step().unwrap().name, "B");
    assert_eq!(workflow.history(), vec!["A", "B"]);
}

#[test]
fn test_outcome_trigger_before_start() {
    let fx = Fixture::new();
    let definition = WorkflowBuilder::new("early")
        .add_step(fx.form_step("A").finish_on(next_key()))
        .unwrap()
        .outcome("Cancelled")
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);

    let cancel = workflow.outcome_trigger("Cancelled").unwrap();
    assert!(matches!(cancel.fire(), Err(WorkflowError::NotRunning(_))));
    assert_eq!(workflow.run_state(), RunState::NotStarted);
}

#[test]
fn test_end_task_mid_flow() {
    let fx = Fixture::new();
    let recorder = ProtocolRecorder::new();
    let workflow = Workflow::new(linear(&fx));
    let completions = count_completions(&workflow);

    workflow.start(recorder.runner()).unwrap();
    fx.trigger("A").fire().unwrap();
    workflow.end_task().unwrap();

    assert_eq!(workflow.run_state(), RunState::Complete);
    assert_eq!(workflow.completion(), Some(Completion::Terminated));
    assert_eq!(completions.get(), 1);
    assert!(fx.journal().contains(&"view:B".to_string()));
    assert!(fx.journal().contains(&"controller:B".to_string()));
    assert!(fx.trigger("B").is_revoked());

    let trace = recorder.trace(workflow.id());
    assert_eq!(&trace[trace.len() - 4..], ["begin", "hide:B", "end", "end_task"]);

    assert!(matches!(workflow.end_task(), Err(WorkflowError::NotRunning(_))));
    assert_eq!(completions.get(), 1);
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_activation_scope_released_on_leave() {
    let fx = Fixture::new();
    let marker: Rc<RefCell<Option<Weak<Marker>>>> = Rc::new(RefCell::new(None));
    let slot = marker.clone();

    // A registers a marker in its activation scope, then navigates to B
    // from `initialize`.
    let b = fx.form_step("B").finish_on(next_key());
    let a = Step::new("A")
        .with_controller(move |ctx| {
            let shared = ctx.register(Marker);
            *slot.borrow_mut() = Some(Rc::downgrade(&shared));
            Ok(Hop {
                next: ctx.trigger("next"),
            })
        })
        .on(hop_key(), b.id);
    let definition = WorkflowBuilder::new("scoped")
        .add_step(a)
        .unwrap()
        .add_step(b)
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    workflow.start(ProtocolRecorder::new().runner()).unwrap();

    assert_eq!(workflow.current_step().unwrap().name, "B");
    let weak = marker.borrow().clone().unwrap();
    assert!(weak.upgrade().is_none());
    assert!(!workflow.scope().contains::<Marker>());
}

#[test]
fn test_shared_state_resolves_from_root_scope() {
    struct Session {
        user: String,
    }

    let seen = Rc::new(RefCell::new(String::new()));
    let sink = seen.clone();
    let definition = WorkflowBuilder::new("shared")
        .add_step(
            Step::new("Only")
                .with_controller(move |ctx| {
                    let session = ctx.require::<Session>()?;
                    *sink.borrow_mut() = session.user.clone();
                    Ok(Idle)
                })
                .finish_on(EdgeKey::named("done")),
        )
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    workflow
        .register(Session {
            user: "alice".into(),
        })
        .unwrap();

    workflow.start(ProtocolRecorder::new().runner()).unwrap();
    assert_eq!(*seen.borrow(), "alice");
}

#[test]
fn test_disposal_tolerates_external_release() {
    let fx = Fixture::new();
    let view_flag = Rc::new(DisposeFlag::new());
    let connection = Rc::new(Connection {
        flag: DisposeFlag::new(),
    });

    let b = fx.form_step("B").finish_on(next_key());
    let flag = view_flag.clone();
    let owned = connection.clone();
    let a = Step::new("A")
        .with_controller(move |ctx| {
            ctx.own("connection", owned.clone());
            Ok(Hop {
                next: ctx.trigger("next"),
            })
        })
        .with_view(move |_| Ok(Fragile { flag: flag.clone() }))
        .on(hop_key(), b.id);
    let definition = WorkflowBuilder::new("fragile")
        .add_step(a)
        .unwrap()
        .add_step(b)
        .unwrap()
        .build()
        .unwrap();

    // Released by someone else before the activation ends.
    view_flag.mark("view").unwrap();
    connection.dispose().unwrap();

    let workflow = Workflow::new(definition);
    workflow.start(ProtocolRecorder::new().runner()).unwrap();

    assert_eq!(workflow.current_step().unwrap().name, "B");
    assert_eq!(view_flag.attempts(), 2);
    assert_eq!(connection.flag.attempts(), 2);
    assert!(workflow.is_running());
}

#[test]
fn test_resolution_failure_faults_workflow() {
    let fx = Fixture::new();
    let journal = fx.journal.clone();
    let broken = fx
        .form_controller("Broken")
        .with_view(move |ctx| {
            ctx.require::<MissingService>()?;
            Ok(Screen {
                step: "Broken".into(),
                journal: journal.clone(),
                attached: Cell::new(false),
            })
        })
        .finish_on(next_key());
    let definition = WorkflowBuilder::new("broken")
        .add_step(broken)
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    let completions = count_completions(&workflow);
    let recorder = ProtocolRecorder::new();

    let result = workflow.start(recorder.runner());

    match result {
        Err(WorkflowError::Resolution(message)) => assert!(message.contains("MissingService")),
        other => panic!("expected a resolution error, got {:?}", other),
    }
    assert_eq!(workflow.run_state(), RunState::Complete);
    assert!(workflow.completion().unwrap().is_faulted());
    assert_eq!(completions.get(), 1);
    // The controller built before the failure was released.
    assert_eq!(fx.journal(), vec!["controller:Broken"]);
    assert!(recorder.shown_steps().is_empty());
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_property_edge_on_wrong_controller() {
    let fx = Fixture::new();
    let b = fx.form_step("B").finish_on(next_key());
    let odd = Step::new("Odd")
        .with_controller(|_| Ok(Idle))
        .on(next_key(), b.id);
    let definition = WorkflowBuilder::new("unbound")
        .add_step(odd)
        .unwrap()
        .add_step(b)
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);

    let result = workflow.start(ProtocolRecorder::new().runner());
    assert!(matches!(
        result,
        Err(WorkflowError::UnboundEdge { step, edge }) if step == "Odd" && edge == "next"
    ));
}

struct Legacy {
    next: Trigger,
    other: Trigger,
}
impl Controller for Legacy {}

struct Skipper;
impl Controller for Skipper {
    fn initialize(&self, ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        ctx.navigate("Skip")
    }
}

#[test]
fn test_named_edges() {
    let fx = Fixture::new();
    let held: Rc<RefCell<Option<(Trigger, Trigger)>>> = Rc::new(RefCell::new(None));
    let slot = held.clone();

    let done = fx.form_step("Done").finish_on(next_key());
    let skipped = fx
        .screen(Step::new("Skipped").with_controller(|_| Ok(Skipper)))
        .on(EdgeKey::named("Skip"), done.id);
    let start = fx
        .screen(Step::new("Start").with_controller(move |ctx| {
            let legacy = Legacy {
                next: ctx.named_trigger("Next"),
                other: ctx.trigger("Other"),
            };
            assert_eq!(ctx.named_trigger("Next"), legacy.next);
            *slot.borrow_mut() = Some((legacy.next.clone(), legacy.other.clone()));
            Ok(legacy)
        }))
        .on(EdgeKey::named("Next"), skipped.id);

    let definition = WorkflowBuilder::new("legacy")
        .add_step(start)
        .unwrap()
        .add_step(skipped)
        .unwrap()
        .add_step(done)
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    let recorder = ProtocolRecorder::new();
    workflow.start(recorder.runner()).unwrap();

    let (next, other) = held.borrow().clone().unwrap();
    assert!(matches!(
        other.fire(),
        Err(WorkflowError::NoMatchingEdge { step, key }) if step == "Start" && key == "Other"
    ));
    assert_eq!(workflow.current_step().unwrap().name, "Start");
    assert!(workflow.is_running());

    next.fire().unwrap();
    assert_eq!(workflow.current_step().unwrap().name, "Done");
    assert_eq!(recorder.shown_steps(), vec!["Start", "Done"]);
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

struct Confirm;
impl Controller for Confirm {
    fn initialize(&self, ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        let question = Question::new("Continue", "Skip ahead?")
            .with_choice("Yes")
            .with_choice("No");
        match ctx.runner().ask_question(&question) {
            Answer::Choice(0) => ctx.navigate("Yes"),
            _ => Ok(()),
        }
    }
}

#[test]
fn test_question_answer_drives_navigation() {
    let fx = Fixture::new();
    let recorder = ProtocolRecorder::new();
    recorder.push_answer(Answer::Choice(0));

    let after = fx.form_step("After").finish_on(next_key());
    let ask = fx
        .screen(Step::new("Ask").with_controller(|_| Ok(Confirm)))
        .on(EdgeKey::named("Yes"), after.id);
    let definition = WorkflowBuilder::new("confirm")
        .add_step(ask)
        .unwrap()
        .add_step(after)
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    workflow.start(recorder.runner()).unwrap();

    assert_eq!(workflow.current_step().unwrap().name, "After");
    assert_eq!(
        recorder.count(|e| matches!(e, RunnerEvent::Question { answer: Answer::Choice(0), .. })),
        1
    );
}

#[test]
fn test_activation_scope_provides_engine_services() {
    let recorder = ProtocolRecorder::new();
    let seen = Rc::new(RefCell::new(None));
    let record = seen.clone();

    let inspect = Step::new("Inspect")
        .with_controller(move |ctx| {
            let handle = ctx.require::<WorkflowHandle>()?;
            let info = ctx.require::<StepInfo>()?;
            let runner = ctx.require::<Rc<dyn Runner>>()?;
            ctx.runner()
                .show_modal_view(Rc::new(Details), Some(Rc::new(Idle)));
            runner.ask_question(&Question::new("Details", "Keep the details open?"));
            *record.borrow_mut() = Some((handle.id(), info.name.clone(), info.id));
            Ok(Idle)
        })
        .finish_on(EdgeKey::named("done"));
    let inspect_id = inspect.id;
    let definition = WorkflowBuilder::new("inspect")
        .add_step(inspect)
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    workflow.start(recorder.runner()).unwrap();

    let (handle_id, step_name, step_id) = seen.borrow().clone().unwrap();
    assert_eq!(handle_id, workflow.id());
    assert_eq!(step_name, "Inspect");
    assert_eq!(step_id, inspect_id);
    assert_eq!(
        recorder.count(|e| matches!(e, RunnerEvent::ShowModal { with_controller: true })),
        1
    );
    assert_eq!(
        recorder.count(|e| matches!(e, RunnerEvent::ShowModal { with_controller: false })),
        0
    );
    assert_eq!(
        recorder.count(|e| matches!(e, RunnerEvent::Question { answer: Answer::Dismissed, .. })),
        1
    );
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

fn child_definition(fx: &Fixture, target: EdgeTarget) -> Result<WorkflowDefinition, WorkflowError> {
    WorkflowBuilder::new("second-factor")
        .add_step(fx.form_step("Inner").with_edge(next_key(), target))?
        .build()
}

/// Parent: Host (nested) -> After on completion, -> Rejected on "Failed".
fn nested_parent(
    fx: &Fixture,
    inner_target: EdgeTarget,
    children: Rc<RefCell<Vec<Workflow>>>,
) -> WorkflowDefinition {
    let after = fx.form_step("After").finish_on(next_key());
    let rejected = fx.form_step("Rejected").finish_on(next_key());
    let factory_fx = fx.clone();
    let host = Step::new("Host")
        .with_nested(move |_| {
            let child = Workflow::new(child_definition(&factory_fx, inner_target.clone())?);
            children.borrow_mut().push(child.clone());
            Ok(child)
        })
        .on(EdgeKey::Completed, after.id)
        .on(EdgeKey::outcome("Failed"), rejected.id);

    WorkflowBuilder::new("login")
        .add_step(host)
        .unwrap()
        .add_step(after)
        .unwrap()
        .add_step(rejected)
        .unwrap()
        .outcome("Cancelled")
        .build()
        .unwrap()
}

#[test]
fn test_nested_default_completion_routes_to_completed_edge() {
    let fx = Fixture::new();
    let children = Rc::new(RefCell::new(Vec::new()));
    let workflow = Workflow::new(nested_parent(&fx, EdgeTarget::Finish, children.clone()));
    let recorder = ProtocolRecorder::new();

    workflow.start(recorder.runner()).unwrap();
    let child = children.borrow()[0].clone();
    assert!(child.is_nested());
    assert_eq!(child.info().parent, Some(workflow.id()));
    assert_eq!(child.current_step().unwrap().name, "Inner");
    assert_eq!(workflow.current_step().unwrap().name, "Host");

    fx.trigger("Inner").fire().unwrap();

    assert_eq!(child.completion(), Some(Completion::Finished));
    assert_eq!(workflow.current_step().unwrap().name, "After");
    assert_eq!(recorder.trace(child.id()).first().unwrap(), "begin_task");
    assert_eq!(recorder.trace(child.id()).last().unwrap(), "end_task");
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_nested_outcome_routes_to_outcome_edge() {
    let fx = Fixture::new();
    let children = Rc::new(RefCell::new(Vec::new()));
    let workflow = Workflow::new(nested_parent(
        &fx,
        EdgeTarget::Outcome("Failed".into()),
        children.clone(),
    ));
    let recorder = ProtocolRecorder::new();

    workflow.start(recorder.runner()).unwrap();
    fx.trigger("Inner").fire().unwrap();

    let child = children.borrow()[0].clone();
    assert_eq!(child.completion(), Some(Completion::Outcome("Failed".into())));
    assert_eq!(workflow.current_step().unwrap().name, "Rejected");
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_nested_end_task_routes_to_completed_edge() {
    let fx = Fixture::new();
    let children = Rc::new(RefCell::new(Vec::new()));
    let workflow = Workflow::new(nested_parent(&fx, EdgeTarget::Finish, children.clone()));
    let recorder = ProtocolRecorder::new();

    workflow.start(recorder.runner()).unwrap();
    let child = children.borrow()[0].clone();
    child.end_task().unwrap();

    assert_eq!(child.completion(), Some(Completion::Terminated));
    assert_eq!(workflow.current_step().unwrap().name, "After");
}

#[test]
fn test_parent_leaving_terminates_child() {
    let fx = Fixture::new();
    let children = Rc::new(RefCell::new(Vec::new()));
    let workflow = Workflow::new(nested_parent(&fx, EdgeTarget::Finish, children.clone()));
    let recorder = ProtocolRecorder::new();

    workflow.start(recorder.runner()).unwrap();
    workflow.outcome_trigger("Cancelled").unwrap().fire().unwrap();

    let child = children.borrow()[0].clone();
    assert_eq!(child.completion(), Some(Completion::Terminated));
    assert_eq!(workflow.completion(), Some(Completion::Outcome("Cancelled".into())));
    assert!(fx.journal().contains(&"view:Inner".to_string()));
    assert!(fx.trigger("Inner").is_revoked());
    assert_eq!(recorder.count(|e| matches!(e, RunnerEvent::EndTask { .. })), 2);
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_parent_end_task_terminates_child() {
    let fx = Fixture::new();
    let children = Rc::new(RefCell::new(Vec::new()));
    let workflow = Workflow::new(nested_parent(&fx, EdgeTarget::Finish, children.clone()));
    let recorder = ProtocolRecorder::new();

    workflow.start(recorder.runner()).unwrap();
    workflow.end_task().unwrap();

    let child = children.borrow()[0].clone();
    assert_eq!(child.run_state(), RunState::Complete);
    assert_eq!(child.completion(), Some(Completion::Terminated));
    assert_eq!(workflow.completion(), Some(Completion::Terminated));
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_parent_finishing_while_child_step_initializes() {
    let fx = Fixture::new();
    let children = Rc::new(RefCell::new(Vec::new()));
    let recorder = ProtocolRecorder::new();

    // The child's second step ends the parent from its initialize hook.
    let factory_fx = fx.clone();
    let host_children = children.clone();
    let host = Step::new("Host").with_nested(move |ctx| {
        let parent = ctx
            .workflow()
            .upgrade()
            .ok_or_else(|| WorkflowError::Resolution("hosting workflow is gone".into()))?;
        let cancel = parent.outcome_trigger("Cancelled")?;
        let relay = factory_fx
            .screen(Step::new("Relay").with_controller(move |_| {
                Ok(Relay {
                    target: cancel.clone(),
                })
            }))
            .finish_on(EdgeKey::named("done"));
        let inner = factory_fx.form_step("Inner").on(next_key(), relay.id);
        let child = Workflow::new(
            WorkflowBuilder::new("child")
                .add_step(inner)?
                .add_step(relay)?
                .build()?,
        );
        host_children.borrow_mut().push(child.clone());
        Ok(child)
    });
    let definition = WorkflowBuilder::new("parent")
        .add_step(host.finish_on(EdgeKey::Completed))
        .unwrap()
        .outcome("Cancelled")
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    workflow.start(recorder.runner()).unwrap();

    fx.trigger("Inner").fire().unwrap();

    let child = children.borrow()[0].clone();
    assert_eq!(workflow.completion(), Some(Completion::Outcome("Cancelled".into())));
    assert_eq!(child.completion(), Some(Completion::Terminated));
    assert_eq!(
        recorder.trace(child.id()),
        vec!["begin_task", "begin", "show:Inner", "end", "begin", "hide:Inner", "end", "end_task"]
    );
    assert!(!recorder.shown_steps().contains(&"Relay".to_string()));
    assert!(fx.journal().contains(&"view:Relay".to_string()));
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_nested_fault_faults_parent() {
    let fx = Fixture::new();
    let children = Rc::new(RefCell::new(Vec::new()));
    let recorder = ProtocolRecorder::new();

    // The child's second step cannot be built.
    let factory_fx = fx.clone();
    let host_children = children.clone();
    let host = Step::new("Host").with_nested(move |_| {
        let broken = Step::new("Broken").with_controller(|ctx| {
            ctx.require::<MissingService>()?;
            Ok(Idle)
        });
        let inner = factory_fx.form_step("Inner").on(next_key(), broken.id);
        let child = Workflow::new(
            WorkflowBuilder::new("child")
                .add_step(inner)?
                .add_step(broken.finish_on(EdgeKey::named("done")))?
                .build()?,
        );
        host_children.borrow_mut().push(child.clone());
        Ok(child)
    });
    let definition = WorkflowBuilder::new("parent")
        .add_step(host.finish_on(EdgeKey::Completed))
        .unwrap()
        .build()
        .unwrap();
    let workflow = Workflow::new(definition);
    workflow.start(recorder.runner()).unwrap();

    let result = fx.trigger("Inner").fire();
    assert!(matches!(result, Err(WorkflowError::Resolution(_))));

    let child = children.borrow()[0].clone();
    assert!(child.completion().unwrap().is_faulted());
    match workflow.completion() {
        Some(Completion::Faulted(message)) => {
            assert!(message.contains("Nested workflow in step 'Host'"), "{}", message)
        }
        other => panic!("expected the parent to fault, got {:?}", other),
    }
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}

#[test]
fn test_trigger_fired_through_gateway() {
    let fx = Fixture::new();
    let gateway = UiGateway::new();
    let ui = gateway.init().unwrap();
    let recorder = ProtocolRecorder::new();
    let workflow = Workflow::new(linear(&fx));
    workflow.start(recorder.runner()).unwrap();

    let key = ui.stash(fx.trigger("A"));
    let worker_gateway = gateway.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        worker_gateway.post(move |ctx| {
            if let Some(trigger) = ctx.get(key) {
                trigger.fire().expect("trigger fired on the owner thread");
            }
        })
    });
    worker.join().unwrap().unwrap();

    let arrived = ui.run_until(
        || workflow.current_step().map(|step| step.name == "B").unwrap_or(false),
        Duration::from_secs(5),
    );
    assert!(arrived);
    assert!(recorder.violations().is_empty(), "{:?}", recorder.violations());
}
