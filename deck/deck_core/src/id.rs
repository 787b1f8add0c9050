//! Strongly-typed identifiers for the Deck workflow engine.
//!
//! Every entity the engine tracks (steps, edges, triggers, activations,
//! workflow instances, views) carries an identifier of its own type. The
//! identifiers share one representation, a UUID tagged with a marker type,
//! so a `TriggerId` can never be passed where a `StepId` is expected.
//!
//! # Examples
//!
//! ```
//! use deck_core::id::{StepId, TriggerId};
//! use std::str::FromStr;
//!
//! let step = StepId::new();
//! let trigger = TriggerId::new();
//! assert_ne!(step.to_string(), trigger.to_string());
//!
//! let parsed = StepId::from_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
//! assert_eq!(parsed.to_string(), "550e8400-e29b-41d4-a716-446655440000");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// A type-safe identifier based on UUID.
///
/// The marker `T` only exists at compile time. It is wrapped in a function
/// pointer so identifiers stay `Send + Sync` whatever the marker is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Wrap a known UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// The underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The nil identifier (all zeros).
    pub fn nil() -> Self {
        Self::from_uuid(Uuid::nil())
    }

    /// Check if this is the nil identifier.
    pub fn is_nil(&self) -> bool {
        self.uuid.is_nil()
    }

    /// First eight hex digits, enough to tell instances apart in logs.
    pub fn short(&self) -> String {
        let mut text = self.uuid.simple().to_string();
        text.truncate(8);
        text
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

/// Marker type for workflow steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepMarker;
/// Identifier for a step in a workflow graph.
pub type StepId = Id<StepMarker>;

/// Marker type for edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeMarker;
/// Identifier for an outgoing edge of a step.
pub type EdgeId = Id<EdgeMarker>;

/// Marker type for triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerMarker;
/// Identifier for a trigger handle.
pub type TriggerId = Id<TriggerMarker>;

/// Marker type for activation scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivationMarker;
/// Identifier for one visit of a step.
pub type ActivationId = Id<ActivationMarker>;

/// Marker type for workflow instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowMarker;
/// Identifier for a running workflow instance.
pub type WorkflowId = Id<WorkflowMarker>;

/// Marker type for views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewMarker;
/// Identifier for a view created inside an activation.
pub type ViewId = Id<ViewMarker>;
