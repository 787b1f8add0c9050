//! Controller and view contracts.
//!
//! Components are built fresh for every activation by the step's factories
//! and are shared behind `Rc`. Methods take `&self`; components that hold
//! state keep it in `Cell`/`RefCell` so the engine can release them while
//! one of their own methods is still on the stack.

use crate::engine::context::StepContext;
use deck_core::error::{DisposeError, WorkflowError};
use std::any::Any;
use std::rc::Rc;

/// Upcast to `Any` for typed edge accessors and view/controller pairing.
pub trait AsAny: Any {
    /// Borrow as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Mediates between a step's view and its workflow.
pub trait Controller: AsAny {
    /// Runs once after the controller, its view and its edge bindings exist.
    ///
    /// Firing a trigger from here navigates before the view is ever shown.
    fn initialize(&self, _ctx: &mut StepContext<'_>) -> Result<(), WorkflowError> {
        Ok(())
    }

    /// Releases the controller. Called once when its activation ends.
    fn dispose(&self) -> Result<(), DisposeError> {
        Ok(())
    }
}

/// A rendering surface. Presentation is the runner's business.
pub trait View: AsAny {
    /// Associates the view with the controller of the same activation.
    fn attach(&self, _controller: Rc<dyn Controller>) {}

    /// Releases the view. Called once when its activation ends.
    fn dispose(&self) -> Result<(), DisposeError> {
        Ok(())
    }
}

/// Borrow a controller as its concrete type.
///
/// Takes `&dyn Controller`; pass `&*rc` when holding an `Rc<dyn Controller>`.
pub fn downcast_controller<C: Controller>(controller: &dyn Controller) -> Option<&C> {
    controller.as_any().downcast_ref::<C>()
}

/// Borrow a view as its concrete type.
pub fn downcast_view<V: View>(view: &dyn View) -> Option<&V> {
    view.as_any().downcast_ref::<V>()
}
