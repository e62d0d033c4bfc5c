//! Lifecycle state of a single-valued relation.

use entilink_engine::{Entity, EntityId, EngineResult, TargetBox};
use std::fmt;

/// Lifecycle of a to-one relation target.
///
/// A closed sum type so that resolution is an exhaustive match; adding
/// a state without handling it everywhere is a compile error.
///
/// | State | `entity()` | `entity_id()` |
/// |---|---|---|
/// | `None` | - | - |
/// | `Unstored` | yes | - |
/// | `Lazy` | - | yes |
/// | `Stored` | yes | yes |
/// | `Unresolvable` | - | yes |
#[derive(Clone)]
pub enum ReferenceState<T> {
    /// No target.
    None,
    /// Target object set by the caller; the target has no id yet.
    Unstored(T),
    /// Only the target's id is known; the object has not been fetched.
    Lazy(EntityId<T>),
    /// Target fetched and cached alongside its id.
    Stored(EntityId<T>, T),
    /// A fetch for this id found nothing. Terminal for this id; a new
    /// id assignment recovers the reference.
    Unresolvable(EntityId<T>),
}

impl<T: Entity> ReferenceState<T> {
    /// Builds the state for a caller-assigned target.
    ///
    /// `None` clears the reference; a target without an id becomes
    /// `Unstored`; a persisted target is cached as `Stored`.
    pub fn from_target(target: Option<T>) -> Self {
        match target {
            None => Self::None,
            Some(entity) if entity.id().is_unassigned() => Self::Unstored(entity),
            Some(entity) => Self::Stored(entity.id(), entity),
        }
    }

    /// Returns the cached target object, if any.
    pub fn entity(&self) -> Option<&T> {
        match self {
            Self::Unstored(entity) | Self::Stored(_, entity) => Some(entity),
            Self::None | Self::Lazy(_) | Self::Unresolvable(_) => None,
        }
    }

    /// Returns the target's id, if known.
    pub fn entity_id(&self) -> Option<EntityId<T>> {
        match self {
            Self::Lazy(id) | Self::Stored(id, _) | Self::Unresolvable(id) => Some(*id),
            Self::None | Self::Unstored(_) => None,
        }
    }

    /// Returns `true` unless the reference is empty.
    pub fn has_value(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Attempts to load the target for a `Lazy` reference.
    ///
    /// Only `Lazy` transitions: a hit becomes `Stored`, a miss becomes
    /// `Unresolvable`. Every other state is returned unchanged, so
    /// resolving twice without an intervening set is idempotent and a
    /// miss is never retried implicitly.
    pub fn resolve(self, target_box: &dyn TargetBox<T>) -> EngineResult<Self> {
        match self {
            Self::Lazy(id) => match target_box.get(id)? {
                Some(entity) => Ok(Self::Stored(id, entity)),
                None => Ok(Self::Unresolvable(id)),
            },
            other => Ok(other),
        }
    }
}

impl<T> Default for ReferenceState<T> {
    fn default() -> Self {
        Self::None
    }
}

// Manual Debug: entities are not required to implement `Debug`.
impl<T> fmt::Debug for ReferenceState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Unstored(_) => write!(f, "Unstored"),
            Self::Lazy(id) => write!(f, "Lazy({id})"),
            Self::Stored(id, _) => write!(f, "Stored({id})"),
            Self::Unresolvable(id) => write!(f, "Unresolvable({id})"),
        }
    }
}
