//! Instance scopes and resource ownership for step activations.

pub mod container;
pub mod disposal;

pub use container::Scope;
pub use disposal::{Disposable, DisposalGroup, DisposeFlag, ReleaseReport};
