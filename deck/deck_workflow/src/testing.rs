//! Test doubles for the runner protocol.
//!
//! `ProtocolRecorder` is a `Runner` that records every call and checks the
//! per-workflow ordering rules as they happen:
//!
//! - `begin_task` comes first and only once; `end_task` comes last and only
//!   once, outside any cycle and with no view left on screen.
//! - Transition cycles do not nest and are always closed.
//! - Within one cycle there is at most one `show_view` and one `hide_view`,
//!   both inside the cycle.
//! - A view is never shown while another view of the same workflow is,
//!   and `hide_view` only targets the view on screen.
//!
//! Breaches are collected as messages and read back with `violations()`.

use crate::engine::component::{Controller, View};
use crate::engine::runner::{Answer, Question, Runner, ViewHandle, WorkflowInfo};
use deck_core::id::{ViewId, WorkflowId};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// One recorded runner call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    BeginTask { workflow: WorkflowId, name: String },
    EndTask { workflow: WorkflowId, name: String },
    BeginTransition { workflow: WorkflowId },
    EndTransition { workflow: WorkflowId },
    ShowView { workflow: WorkflowId, step: String, view: ViewId },
    HideView { workflow: WorkflowId, step: String, view: ViewId },
    ShowModal { with_controller: bool },
    Question { title: String, answer: Answer },
}

#[derive(Debug, Default)]
struct Track {
    begun: bool,
    ended: bool,
    in_cycle: bool,
    shows: u32,
    hides: u32,
    shown: Option<ViewId>,
}

#[derive(Default)]
struct RecorderInner {
    events: RefCell<Vec<RunnerEvent>>,
    tracks: RefCell<HashMap<WorkflowId, Track>>,
    violations: RefCell<Vec<String>>,
    answers: RefCell<VecDeque<Answer>>,
}

/// Recording, validating `Runner`.
#[derive(Clone, Default)]
pub struct ProtocolRecorder {
    inner: Rc<RecorderInner>,
}

impl ProtocolRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner handle sharing this recorder's log.
    pub fn runner(&self) -> Rc<dyn Runner> {
        Rc::new(self.clone())
    }

    /// Queue the answer for the next `ask_question`.
    pub fn push_answer(&self, answer: Answer) {
        self.inner.answers.borrow_mut().push_back(answer);
    }

    pub fn events(&self) -> Vec<RunnerEvent> {
        self.inner.events.borrow().clone()
    }

    /// Protocol breaches observed so far.
    pub fn violations(&self) -> Vec<String> {
        self.inner.violations.borrow().clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count<P>(&self, pred: P) -> usize
    where
        P: Fn(&RunnerEvent) -> bool,
    {
        self.inner.events.borrow().iter().filter(|e| pred(e)).count()
    }

    /// Step names passed to `show_view`, in order.
    pub fn shown_steps(&self) -> Vec<String> {
        self.inner
            .events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                RunnerEvent::ShowView { step, .. } => Some(step.clone()),
                _ => None,
            })
            .collect()
    }

    /// Step names passed to `hide_view`, in order.
    pub fn hidden_steps(&self) -> Vec<String> {
        self.inner
            .events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                RunnerEvent::HideView { step, .. } => Some(step.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded events that concern `workflow`, as compact labels such as
    /// `"show:Credentials"`.
    pub fn trace(&self, workflow: WorkflowId) -> Vec<String> {
        self.inner
            .events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                RunnerEvent::BeginTask { workflow: id, .. } if *id == workflow => {
                    Some("begin_task".to_string())
                }
                RunnerEvent::EndTask { workflow: id, .. } if *id == workflow => {
                    Some("end_task".to_string())
                }
                RunnerEvent::BeginTransition { workflow: id } if *id == workflow => {
                    Some("begin".to_string())
                }
                RunnerEvent::EndTransition { workflow: id } if *id == workflow => {
                    Some("end".to_string())
                }
                RunnerEvent::ShowView {
                    workflow: id, step, ..
                } if *id == workflow => Some(format!("show:{}", step)),
                RunnerEvent::HideView {
                    workflow: id, step, ..
                } if *id == workflow => Some(format!("hide:{}", step)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: RunnerEvent) {
        self.inner.events.borrow_mut().push(event);
    }

    fn violation(&self, message: String) {
        log::error!("Runner protocol violation: {}", message);
        self.inner.violations.borrow_mut().push(message);
    }

    fn with_track<F>(&self, workflow: WorkflowId, check: F)
    where
        F: FnOnce(&mut Track) -> Vec<String>,
    {
        let problems = {
            let mut tracks = self.inner.tracks.borrow_mut();
            check(tracks.entry(workflow).or_default())
        };
        for problem in problems {
            self.violation(format!("workflow {}: {}", workflow.short(), problem));
        }
    }
}

impl Runner for ProtocolRecorder {
    fn begin_task(&self, workflow: &WorkflowInfo) {
        self.record(RunnerEvent::BeginTask {
            workflow: workflow.id,
            name: workflow.name.clone(),
        });
        self.with_track(workflow.id, |track| {
            let mut problems = Vec::new();
            if track.begun {
                problems.push("begin_task called twice".to_string());
            }
            track.begun = true;
            problems
        });
    }

    fn end_task(&self, workflow: &WorkflowInfo) {
        self.record(RunnerEvent::EndTask {
            workflow: workflow.id,
            name: workflow.name.clone(),
        });
        self.with_track(workflow.id, |track| {
            let mut problems = Vec::new();
            if !track.begun {
                problems.push("end_task before begin_task".to_string());
            }
            if track.ended {
                problems.push("end_task called twice".to_string());
            }
            if track.in_cycle {
                problems.push("end_task inside a transition cycle".to_string());
            }
            if track.shown.is_some() {
                problems.push("end_task while a view is still shown".to_string());
            }
            track.ended = true;
            problems
        });
    }

    fn begin_transition(&self, workflow: &WorkflowInfo) {
        self.record(RunnerEvent::BeginTransition {
            workflow: workflow.id,
        });
        self.with_track(workflow.id, |track| {
            let mut problems = Vec::new();
            if !track.begun || track.ended {
                problems.push("begin_transition outside the task".to_string());
            }
            if track.in_cycle {
                problems.push("begin_transition inside an open cycle".to_string());
            }
            track.in_cycle = true;
            track.shows = 0;
            track.hides = 0;
            problems
        });
    }

    fn end_transition(&self, workflow: &WorkflowInfo) {
        self.record(RunnerEvent::EndTransition {
            workflow: workflow.id,
        });
        self.with_track(workflow.id, |track| {
            let mut problems = Vec::new();
            if !track.in_cycle {
                problems.push("end_transition without begin_transition".to_string());
            }
            track.in_cycle = false;
            problems
        });
    }

    fn show_view(&self, view: &ViewHandle) {
        self.record(RunnerEvent::ShowView {
            workflow: view.workflow,
            step: view.step.name.clone(),
            view: view.id,
        });
        self.with_track(view.workflow, |track| {
            let mut problems = Vec::new();
            if !track.in_cycle {
                problems.push(format!("show_view({}) outside a cycle", view.step.name));
            }
            track.shows += 1;
            if track.shows > 1 {
                problems.push(format!("second show_view({}) in one cycle", view.step.name));
            }
            if track.shown.is_some() {
                problems.push(format!(
                    "show_view({}) while another view is shown",
                    view.step.name
                ));
            }
            track.shown = Some(view.id);
            problems
        });
    }

    fn hide_view(&self, view: &ViewHandle) {
        self.record(RunnerEvent::HideView {
            workflow: view.workflow,
            step: view.step.name.clone(),
            view: view.id,
        });
        self.with_track(view.workflow, |track| {
            let mut problems = Vec::new();
            if !track.in_cycle {
                problems.push(format!("hide_view({}) outside a cycle", view.step.name));
            }
            track.hides += 1;
            if track.hides > 1 {
                problems.push(format!("second hide_view({}) in one cycle", view.step.name));
            }
            if track.shown != Some(view.id) {
                problems.push(format!(
                    "hide_view({}) targets a view that is not shown",
                    view.step.name
                ));
            }
            track.shown = None;
            problems
        });
    }

    fn show_modal_view(&self, _view: Rc<dyn View>, controller: Option<Rc<dyn Controller>>) {
        self.record(RunnerEvent::ShowModal {
            with_controller: controller.is_some(),
        });
    }

    fn ask_question(&self, question: &Question) -> Answer {
        let answer = self
            .inner
            .answers
            .borrow_mut()
            .pop_front()
            .unwrap_or(Answer::Dismissed);
        self.record(RunnerEvent::Question {
            title: question.title.clone(),
            answer,
        });
        answer
    }
}
