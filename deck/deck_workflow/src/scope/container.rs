//! Hierarchical, type-keyed instance scopes.
//!
//! A `Scope` maps a type to one shared instance. Lookups walk from the
//! scope towards the root, so a child sees everything its ancestors hold
//! while registrations in the child stay invisible to the parent. The
//! engine uses one root scope per workflow instance and one child scope per
//! step activation.

use deck_core::error::WorkflowError;
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

struct Entry {
    type_name: &'static str,
    instance: Rc<dyn Any>,
}

struct ScopeInner {
    label: String,
    parent: Option<Scope>,
    depth: usize,
    entries: RefCell<HashMap<TypeId, Entry>>,
}

/// A node in the scope hierarchy. Cloning yields another handle to the
/// same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create a scope without a parent.
    pub fn root(label: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                label: label.into(),
                parent: None,
                depth: 0,
                entries: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Create a child scope whose lookups fall back to `self`.
    pub fn child(&self, label: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                label: label.into(),
                parent: Some(self.clone()),
                depth: self.inner.depth + 1,
                entries: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Register an instance, replacing any earlier instance of the same
    /// type in this scope. Returns the shared handle.
    pub fn register<T: Any>(&self, instance: T) -> Rc<T> {
        let shared = Rc::new(instance);
        self.register_rc(shared.clone());
        shared
    }

    /// Register an already shared instance.
    pub fn register_rc<T: Any>(&self, instance: Rc<T>) {
        let previous = self.inner.entries.borrow_mut().insert(
            TypeId::of::<T>(),
            Entry {
                type_name: type_name::<T>(),
                instance,
            },
        );
        if previous.is_some() {
            log::debug!(
                "Scope '{}' replaced registration of {}",
                self.inner.label,
                type_name::<T>()
            );
        }
    }

    /// Find an instance of `T` here or in an ancestor.
    pub fn resolve<T: Any>(&self) -> Option<Rc<T>> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            let found = current
                .inner
                .entries
                .borrow()
                .get(&TypeId::of::<T>())
                .map(|entry| entry.instance.clone());
            if let Some(instance) = found {
                return instance.downcast::<T>().ok();
            }
            scope = current.inner.parent.as_ref();
        }
        None
    }

    /// Like `resolve`, but a missing instance is a resolution error.
    pub fn require<T: Any>(&self) -> Result<Rc<T>, WorkflowError> {
        self.resolve::<T>().ok_or_else(|| {
            WorkflowError::Resolution(format!(
                "no instance of {} is registered in scope '{}' or its ancestors",
                type_name::<T>(),
                self.inner.label
            ))
        })
    }

    /// Whether `T` is registered in this scope itself.
    pub fn contains_local<T: Any>(&self) -> bool {
        self.inner
            .entries
            .borrow()
            .contains_key(&TypeId::of::<T>())
    }

    /// Whether `T` resolves from this scope.
    pub fn contains<T: Any>(&self) -> bool {
        self.resolve::<T>().is_some()
    }

    /// Drop every instance registered in this scope.
    pub fn clear(&self) -> usize {
        let drained: Vec<Entry> = self
            .inner
            .entries
            .borrow_mut()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        drained.len()
    }

    /// Names of the types registered locally, sorted.
    pub fn local_types(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .inner
            .entries
            .borrow()
            .values()
            .map(|entry| entry.type_name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Scope label.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Distance from the root scope.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// The parent scope, if any.
    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("label", &self.inner.label)
            .field("depth", &self.inner.depth)
            .field("types", &self.local_types())
            .finish()
    }
}
