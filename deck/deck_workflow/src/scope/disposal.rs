//! Disposal groups: resources released together, exactly once.
//!
//! Every activation owns one group. Release actions run in reverse
//! acquisition order, either when the group is released explicitly or when
//! it is dropped. Failures are logged and never stop the remaining releases.

use deck_core::error::DisposeError;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Something that exposes a release contract.
pub trait Disposable {
    /// Release the resource. Returning `DisposeError::AlreadyDisposed` on a
    /// repeated call is expected and tolerated.
    fn dispose(&self) -> Result<(), DisposeError>;
}

/// Tracks whether a resource was released.
///
/// Components embed one to implement the "second release reports
/// `AlreadyDisposed`" half of the contract.
#[derive(Debug, Default)]
pub struct DisposeFlag {
    disposed: Cell<bool>,
    count: Cell<u32>,
}

impl DisposeFlag {
    /// Create an unreleased flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as released. Fails with `AlreadyDisposed` if it already was.
    pub fn mark(&self, resource: &str) -> Result<(), DisposeError> {
        self.count.set(self.count.get() + 1);
        if self.disposed.replace(true) {
            return Err(DisposeError::AlreadyDisposed(resource.to_string()));
        }
        Ok(())
    }

    /// Whether `mark` has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Number of release attempts, including rejected ones.
    pub fn attempts(&self) -> u32 {
        self.count.get()
    }
}

type ReleaseFn = Box<dyn FnOnce() -> Result<(), DisposeError>>;

/// Outcome of releasing a group.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Actions that completed without error
    pub released: usize,
    /// Actions whose resource had already been released
    pub already_disposed: usize,
    /// Actions that failed for another reason
    pub failed: Vec<DisposeError>,
}

impl ReleaseReport {
    /// True when nothing failed (repeated releases do not count).
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// An ordered set of release actions.
pub struct DisposalGroup {
    label: String,
    entries: Vec<(String, ReleaseFn)>,
    released: bool,
}

impl DisposalGroup {
    /// Create an empty group. The label shows up in log lines.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Vec::new(),
            released: false,
        }
    }

    /// Record a release action for `resource`.
    ///
    /// Actions added after the group was released run immediately.
    pub fn defer<F>(&mut self, resource: impl Into<String>, release: F)
    where
        F: FnOnce() -> Result<(), DisposeError> + 'static,
    {
        let resource = resource.into();
        if self.released {
            log::warn!(
                "Disposal group '{}' already released; releasing {} immediately",
                self.label,
                resource
            );
            let mut report = ReleaseReport::default();
            Self::run_one(&self.label, &resource, Box::new(release), &mut report);
            return;
        }
        self.entries.push((resource, Box::new(release)));
    }

    /// Record a `Disposable` for release.
    pub fn own(&mut self, resource: impl Into<String>, disposable: Rc<dyn Disposable>) {
        self.defer(resource, move || disposable.dispose());
    }

    /// Number of pending release actions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no release actions are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `release` has already run.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The group label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run every pending action in reverse acquisition order.
    ///
    /// Calling this twice is harmless: the second call has nothing to do.
    pub fn release(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        self.released = true;

        while let Some((resource, action)) = self.entries.pop() {
            Self::run_one(&self.label, &resource, action, &mut report);
        }

        if !report.is_clean() {
            log::warn!(
                "Disposal group '{}' released with {} failure(s)",
                self.label,
                report.failed.len()
            );
        }
        report
    }

    fn run_one(label: &str, resource: &str, action: ReleaseFn, report: &mut ReleaseReport) {
        match action() {
            Ok(()) => {
                log::trace!("[{}] released {}", label, resource);
                report.released += 1;
            }
            Err(err) if err.is_already_disposed() => {
                log::debug!("[{}] {} was already released", label, resource);
                report.already_disposed += 1;
            }
            Err(err) => {
                log::warn!("[{}] failed to release {}: {}", label, resource, err);
                report.failed.push(err);
            }
        }
    }
}

impl Drop for DisposalGroup {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.release();
        }
    }
}

impl fmt::Debug for DisposalGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposalGroup")
            .field("label", &self.label)
            .field("pending", &self.entries.len())
            .field("released", &self.released)
            .finish()
    }
}
