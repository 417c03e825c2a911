use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::{ConstructId, Locator};

/// Identity-relevant mutations. Every typed mutator stages its change and then hands one of these
/// to the consistency monitor of the owning topic map, which decides whether
/// the mutation made the construct equivalent to an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationEvent {
    ItemIdentifierAdded(Locator),
    ItemIdentifierRemoved(Locator),
    SubjectIdentifierAdded(Locator),
    SubjectIdentifierRemoved(Locator),
    SubjectLocatorAdded(Locator),
    SubjectLocatorRemoved(Locator),
    /// Old type, new type
    TypeSet {
        old: ConstructId,
        new: ConstructId,
    },
    ThemeAdded(ConstructId),
    ThemeRemoved(ConstructId),
    ValueChanged,
    /// Role added to or removed from an association
    RolesChanged(ConstructId),
    PlayerSet {
        old: ConstructId,
        new: ConstructId,
    },
    /// `old == None` marks an attach of a freshly created construct
    ParentChanged {
        old: Option<ConstructId>,
        new: ConstructId,
    },
    ReifierSet {
        old: Option<ConstructId>,
        new: Option<ConstructId>,
    },
    ReifiedSet {
        old: Option<ConstructId>,
        new: Option<ConstructId>,
    },
}

impl Display for MutationEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MutationEvent::ItemIdentifierAdded(_) => write!(f, "ItemIdentifierAdded"),
            MutationEvent::ItemIdentifierRemoved(_) => write!(f, "ItemIdentifierRemoved"),
            MutationEvent::SubjectIdentifierAdded(_) => write!(f, "SubjectIdentifierAdded"),
            MutationEvent::SubjectIdentifierRemoved(_) => write!(f, "SubjectIdentifierRemoved"),
            MutationEvent::SubjectLocatorAdded(_) => write!(f, "SubjectLocatorAdded"),
            MutationEvent::SubjectLocatorRemoved(_) => write!(f, "SubjectLocatorRemoved"),
            MutationEvent::TypeSet { .. } => write!(f, "TypeSet"),
            MutationEvent::ThemeAdded(_) => write!(f, "ThemeAdded"),
            MutationEvent::ThemeRemoved(_) => write!(f, "ThemeRemoved"),
            MutationEvent::ValueChanged => write!(f, "ValueChanged"),
            MutationEvent::RolesChanged(_) => write!(f, "RolesChanged"),
            MutationEvent::PlayerSet { .. } => write!(f, "PlayerSet"),
            MutationEvent::ParentChanged { .. } => write!(f, "ParentChanged"),
            MutationEvent::ReifierSet { .. } => write!(f, "ReifierSet"),
            MutationEvent::ReifiedSet { .. } => write!(f, "ReifiedSet"),
        }
    }
}

/// Notices published to subscribers after a mutation was committed to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    Saved(ConstructId),
    Removed(ConstructId),
    Merged {
        absorbed: ConstructId,
        survivor: ConstructId,
    },
}

impl Display for StoreEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            StoreEvent::Saved(id) => write!(f, "Saved({id})"),
            StoreEvent::Removed(id) => write!(f, "Removed({id})"),
            StoreEvent::Merged { absorbed, survivor } => {
                write!(f, "Merged({absorbed} -> {survivor})")
            }
        }
    }
}
