//! A `Runner` that presents screens as text on stdout.

use deck_core::error::DisposeError;
use deck_workflow::{
    downcast_view, Answer, Controller, DisposeFlag, Question, Runner, View, ViewHandle,
    WorkflowInfo,
};
use std::cell::RefCell;
use std::rc::Rc;

/// A text screen: a title and a few lines.
pub struct ScreenView {
    title: String,
    lines: RefCell<Vec<String>>,
    disposed: DisposeFlag,
}

impl ScreenView {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: RefCell::new(Vec::new()),
            disposed: DisposeFlag::new(),
        }
    }

    pub fn line(self, line: impl Into<String>) -> Self {
        self.lines.borrow_mut().push(line.into());
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Render as printable text.
    pub fn render(&self) -> String {
        let mut text = format!("== {} ==", self.title);
        for line in self.lines.borrow().iter() {
            text.push_str("\n   ");
            text.push_str(line);
        }
        text
    }
}

impl View for ScreenView {
    fn dispose(&self) -> Result<(), DisposeError> {
        self.disposed.mark(&self.title)
    }
}

/// Prints shown screens; non-interactive, so questions are dismissed.
#[derive(Default)]
pub struct ConsoleRunner {
    depth: RefCell<usize>,
    transcript: RefCell<Vec<String>>,
}

impl ConsoleRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything printed so far.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.borrow().clone()
    }

    fn emit(&self, text: String) {
        let indent = "  ".repeat(self.depth.borrow().saturating_sub(1));
        for line in text.lines() {
            println!("{}{}", indent, line);
        }
        self.transcript.borrow_mut().push(text);
    }
}

impl Runner for ConsoleRunner {
    fn begin_task(&self, workflow: &WorkflowInfo) {
        *self.depth.borrow_mut() += 1;
        log::debug!("Task '{}' ({}) started", workflow.name, workflow.id.short());
    }

    fn end_task(&self, workflow: &WorkflowInfo) {
        let mut depth = self.depth.borrow_mut();
        *depth = depth.saturating_sub(1);
        log::debug!("Task '{}' ({}) ended", workflow.name, workflow.id.short());
    }

    fn begin_transition(&self, workflow: &WorkflowInfo) {
        log::trace!("Transition of '{}' begins", workflow.name);
    }

    fn end_transition(&self, workflow: &WorkflowInfo) {
        log::trace!("Transition of '{}' ends", workflow.name);
    }

    fn show_view(&self, view: &ViewHandle) {
        match downcast_view::<ScreenView>(&*view.view) {
            Some(screen) => self.emit(screen.render()),
            None => self.emit(format!("== {} ==", view.step.name)),
        }
    }

    fn hide_view(&self, view: &ViewHandle) {
        log::trace!("Hiding step '{}'", view.step.name);
    }

    fn show_modal_view(&self, view: Rc<dyn View>, _controller: Option<Rc<dyn Controller>>) {
        if let Some(screen) = downcast_view::<ScreenView>(&*view) {
            self.emit(format!("[modal]\n{}", screen.render()));
        }
    }

    fn ask_question(&self, question: &Question) -> Answer {
        let mut text = format!("? {}: {}", question.title, question.text);
        for (index, choice) in question.choices.iter().enumerate() {
            text.push_str(&format!("\n   {}) {}", index + 1, choice));
        }
        self.emit(text);
        Answer::Dismissed
    }
}
