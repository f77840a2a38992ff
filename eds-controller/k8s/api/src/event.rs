//! Watch events, tagged with the kind of resource they carry.

use crate::{Endpoints, Node};

/// A single change to a watched resource.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<T> {
    Add(T),

    Update { old: T, new: T },

    Delete(T),

    /// The resource was removed before its deletion was observed, so only the last known state
    /// is available.
    DeleteFinalStateUnknown { key: String, last_known: T },
}

/// An event for any of the resource kinds the controller indexes.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceEvent {
    Endpoints(Event<Endpoints>),
    Node(Event<Node>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Endpoints,
    Node,
}

// === impl ResourceEvent ===

impl ResourceEvent {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Endpoints(_) => Kind::Endpoints,
            Self::Node(_) => Kind::Node,
        }
    }
}

impl From<Event<Endpoints>> for ResourceEvent {
    fn from(ev: Event<Endpoints>) -> Self {
        Self::Endpoints(ev)
    }
}

impl From<Event<Node>> for ResourceEvent {
    fn from(ev: Event<Node>) -> Self {
        Self::Node(ev)
    }
}

// === impl Kind ===

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Endpoints => "Endpoints".fmt(f),
            Self::Node => "Node".fmt(f),
        }
    }
}
