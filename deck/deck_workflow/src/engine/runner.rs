//! The presentation protocol a workflow drives.
//!
//! Per workflow instance the runner sees `begin_task` once, then any number
//! of `begin_transition .. end_transition` cycles, each containing at most
//! one `show_view` and at most one `hide_view`, then `end_task` once.

use crate::engine::component::{Controller, View};
use crate::model::step::StepInfo;
use chrono::{DateTime, Utc};
use deck_core::id::{ViewId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Identity of a workflow instance as seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    /// Instance id
    pub id: WorkflowId,
    /// Definition name
    pub name: String,
    /// Enclosing workflow, for nested instances
    pub parent: Option<WorkflowId>,
    /// When `start` was called
    pub started_at: Option<DateTime<Utc>>,
}

/// A view the workflow asks the runner to present.
#[derive(Clone)]
pub struct ViewHandle {
    /// Identifier of this presentation
    pub id: ViewId,
    /// Step whose activation built the view
    pub step: StepInfo,
    /// Workflow the step belongs to
    pub workflow: WorkflowId,
    /// The view itself
    pub view: Rc<dyn View>,
    /// Controller paired with the view, if the step has one
    pub controller: Option<Rc<dyn Controller>>,
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandle")
            .field("id", &self.id)
            .field("step", &self.step.name)
            .field("workflow", &self.workflow)
            .field("has_controller", &self.controller.is_some())
            .finish()
    }
}

/// A blocking question put to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Dialog title
    pub title: String,
    /// Question text
    pub text: String,
    /// Offered answers, in display order
    pub choices: Vec<String>,
}

impl Question {
    /// Create a question without choices.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            choices: Vec::new(),
        }
    }

    /// Append a choice.
    pub fn with_choice(mut self, choice: impl Into<String>) -> Self {
        self.choices.push(choice.into());
        self
    }
}

/// The user's reply to a `Question`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Answer {
    /// Index into `Question::choices`
    Choice(usize),
    /// Closed without choosing
    Dismissed,
}

/// Presents views on behalf of running workflows.
///
/// All calls arrive on the thread that owns the workflow tree.
pub trait Runner {
    /// A workflow instance started.
    fn begin_task(&self, workflow: &WorkflowInfo);

    /// A workflow instance ended. No further calls mention it.
    fn end_task(&self, workflow: &WorkflowInfo);

    /// A transition cycle opened.
    fn begin_transition(&self, workflow: &WorkflowInfo);

    /// The open transition cycle closed.
    fn end_transition(&self, workflow: &WorkflowInfo);

    /// Present the view of the current step.
    fn show_view(&self, view: &ViewHandle);

    /// Withdraw a view presented earlier.
    fn hide_view(&self, view: &ViewHandle);

    /// Present a view modally, outside the transition cycle.
    fn show_modal_view(&self, view: Rc<dyn View>, controller: Option<Rc<dyn Controller>>) {
        let _ = (view, controller);
        log::debug!("Runner does not support modal views; ignoring");
    }

    /// Ask the user a question and wait for the answer.
    fn ask_question(&self, question: &Question) -> Answer {
        log::debug!("Runner cannot ask '{}'; dismissing", question.title);
        Answer::Dismissed
    }
}
