//! One visit of a step: the objects built for it and their release.

use crate::engine::component::Controller;
use crate::engine::runner::ViewHandle;
use crate::engine::trigger::Trigger;
use crate::engine::workflow::Workflow;
use crate::model::step::StepInfo;
use crate::scope::{DisposalGroup, ReleaseReport, Scope};
use deck_core::id::{ActivationId, TriggerId};
use std::collections::HashMap;
use std::rc::Rc;

/// Everything created when a step becomes current.
///
/// The activation owns its scope, components, triggers and disposal group.
/// `release` ends it; dropping an unreleased activation releases it too.
pub(crate) struct Activation {
    pub(crate) id: ActivationId,
    pub(crate) step: StepInfo,
    pub(crate) scope: Scope,
    pub(crate) controller: Option<Rc<dyn Controller>>,
    pub(crate) view: Option<ViewHandle>,
    pub(crate) nested: Option<Workflow>,
    bindings: HashMap<TriggerId, usize>,
    named: HashMap<String, Trigger>,
    triggers: Vec<Trigger>,
    disposal: DisposalGroup,
    shown: bool,
    released: bool,
}

impl Activation {
    pub(crate) fn new(step: StepInfo, parent_scope: &Scope) -> Self {
        let id = ActivationId::new();
        let label = format!("{}#{}", step.name, id.short());
        Self {
            id,
            scope: parent_scope.child(label.clone()),
            step,
            controller: None,
            view: None,
            nested: None,
            bindings: HashMap::new(),
            named: HashMap::new(),
            triggers: Vec::new(),
            disposal: DisposalGroup::new(label),
            shown: false,
            released: false,
        }
    }

    /// Track a trigger created for this activation.
    pub(crate) fn adopt(&mut self, trigger: &Trigger) {
        self.triggers.push(trigger.clone());
    }

    pub(crate) fn named_trigger(&self, name: &str) -> Option<&Trigger> {
        self.named.get(name)
    }

    pub(crate) fn remember_named(&mut self, trigger: &Trigger) {
        self.named
            .insert(trigger.name().to_string(), trigger.clone());
    }

    /// Route `trigger` to the edge at `edge_index`. Returns the index of an
    /// edge that already claimed the trigger.
    pub(crate) fn bind(&mut self, trigger: &Trigger, edge_index: usize) -> Option<usize> {
        self.bindings.insert(trigger.id(), edge_index)
    }

    pub(crate) fn binding(&self, trigger: &Trigger) -> Option<usize> {
        self.bindings.get(&trigger.id()).copied()
    }

    pub(crate) fn disposal(&mut self) -> &mut DisposalGroup {
        &mut self.disposal
    }

    /// The view to present, unless it was presented already.
    pub(crate) fn take_unshown_view(&mut self) -> Option<ViewHandle> {
        if self.shown {
            return None;
        }
        let handle = self.view.clone()?;
        self.shown = true;
        Some(handle)
    }

    /// The view currently presented, if any.
    pub(crate) fn shown_view(&self) -> Option<ViewHandle> {
        if self.shown {
            self.view.clone()
        } else {
            None
        }
    }

    /// End the activation: revoke its triggers, run its release actions in
    /// reverse order and empty its scope. Later calls do nothing.
    pub(crate) fn release(&mut self) -> ReleaseReport {
        if self.released {
            return ReleaseReport::default();
        }
        self.released = true;

        for trigger in &self.triggers {
            trigger.revoke();
        }

        let report = self.disposal.release();

        self.bindings.clear();
        self.named.clear();
        self.triggers.clear();
        self.controller = None;
        self.view = None;
        self.nested = None;
        self.scope.clear();

        log::trace!(
            "Released activation {} of step '{}' ({} released, {} already released)",
            self.id.short(),
            self.step.name,
            report.released,
            report.already_disposed
        );
        report
    }
}

impl Drop for Activation {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}
