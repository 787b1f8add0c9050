//! Triggers: handles that request a transition when fired.
//!
//! A trigger belongs to one workflow instance and, unless it is a
//! workflow-level outcome trigger, to one activation. It holds only a weak
//! reference to its workflow, so a controller keeping a trigger does not
//! keep the workflow alive. Triggers are `Rc`-backed and therefore `!Send`;
//! background work hands results back through the UI gateway instead.

use crate::engine::workflow::WorkflowCore;
use deck_core::error::WorkflowError;
use deck_core::id::{ActivationId, TriggerId, WorkflowId};
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

/// What a trigger's validity is tied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerScope {
    /// Valid while the activation is current
    Activation(ActivationId),
    /// Valid while the workflow runs
    Workflow,
}

struct TriggerInner {
    id: TriggerId,
    name: String,
    workflow: WorkflowId,
    scope: TriggerScope,
    owner: Weak<WorkflowCore>,
    revoked: Cell<bool>,
    fired: Cell<u32>,
}

/// A named request to leave the current step.
#[derive(Clone)]
pub struct Trigger {
    inner: Rc<TriggerInner>,
}

impl Trigger {
    pub(crate) fn new(
        name: impl Into<String>,
        workflow: WorkflowId,
        scope: TriggerScope,
        owner: Weak<WorkflowCore>,
    ) -> Self {
        Self {
            inner: Rc::new(TriggerInner {
                id: TriggerId::new(),
                name: name.into(),
                workflow,
                scope,
                owner,
                revoked: Cell::new(false),
                fired: Cell::new(0),
            }),
        }
    }

    /// Unique identity of this trigger.
    pub fn id(&self) -> TriggerId {
        self.inner.id
    }

    /// Logical name, matched against named edges.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Workflow instance the trigger belongs to.
    pub fn workflow(&self) -> WorkflowId {
        self.inner.workflow
    }

    /// Activation the trigger belongs to; `None` for outcome triggers.
    pub fn activation(&self) -> Option<ActivationId> {
        match self.inner.scope {
            TriggerScope::Activation(id) => Some(id),
            TriggerScope::Workflow => None,
        }
    }

    /// Whether the owning activation or workflow has ended.
    pub fn is_revoked(&self) -> bool {
        self.inner.revoked.get()
    }

    /// How many times `fire` was called.
    pub fn fire_count(&self) -> u32 {
        self.inner.fired.get()
    }

    /// Request the transition this trigger stands for.
    ///
    /// When the workflow is idle the transition runs before this returns.
    /// When it is already processing a transition, for example because a
    /// controller fires from `initialize`, the request is queued and taken
    /// as soon as the current activation is in place.
    pub fn fire(&self) -> Result<(), WorkflowError> {
        self.inner.fired.set(self.inner.fired.get() + 1);
        let core = self
            .inner
            .owner
            .upgrade()
            .ok_or_else(|| WorkflowError::WorkflowDropped(self.inner.name.clone()))?;
        core.trigger_fired(self)
    }

    pub(crate) fn scope(&self) -> TriggerScope {
        self.inner.scope
    }

    pub(crate) fn revoke(&self) {
        self.inner.revoked.set(true);
    }
}

impl PartialEq for Trigger {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Trigger {}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id.short())
            .field("scope", &self.inner.scope)
            .field("revoked", &self.inner.revoked.get())
            .finish()
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.name, self.inner.id.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(name: &str) -> Trigger {
        Trigger::new(
            name,
            WorkflowId::new(),
            TriggerScope::Activation(ActivationId::new()),
            Weak::new(),
        )
    }

    #[test]
    fn test_identity() {
        let a = detached("Next");
        let b = detached("Next");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.name(), "Next");
        assert!(a.activation().is_some());
    }

    #[test]
    fn test_fire_without_workflow() {
        let trigger = detached("Next");
        let err = trigger.fire().unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowDropped(name) if name == "Next"));
        assert_eq!(trigger.fire_count(), 1);
    }

    #[test]
    fn test_revoke_is_shared_by_clones() {
        let trigger = detached("Done");
        let held_by_controller = trigger.clone();
        trigger.revoke();
        assert!(held_by_controller.is_revoked());
    }
}
