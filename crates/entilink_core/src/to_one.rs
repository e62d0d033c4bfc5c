//! Single-valued lazy relation proxy.

use crate::error::RelationResult;
use crate::state::ReferenceState;
use entilink_engine::{Entity, EntityId, TargetBox};
use std::fmt;
use std::sync::Arc;

/// A lazy reference from a host entity to at most one target entity.
///
/// A `ToOne` holds a [`ReferenceState`] plus an optional accessor into
/// the engine's box for `T`. The accessor is absent until the host is
/// attached to a live store (first successful put, or entity load); a
/// detached proxy still accepts targets and ids, it just cannot fetch.
///
/// Reads never write: only the host's own put persists the reference.
///
/// # Example
///
/// ```rust,ignore
/// let mut author = post.author; // ToOne<Author>
/// author.set_target_id(Some(author_id));
/// assert_eq!(author.target_id(), Some(author_id));
/// let loaded = author.target()?; // fetches on first access
/// ```
#[derive(Clone)]
pub struct ToOne<T: Entity> {
    state: ReferenceState<T>,
    target_box: Option<Arc<dyn TargetBox<T>>>,
}

impl<T: Entity> ToOne<T> {
    /// Creates an empty reference.
    #[must_use]
    pub fn none() -> Self {
        Self {
            state: ReferenceState::None,
            target_box: None,
        }
    }

    /// Creates a reference to the given target, if any.
    #[must_use]
    pub fn new(target: Option<T>) -> Self {
        Self {
            state: ReferenceState::from_target(target),
            target_box: None,
        }
    }

    /// Creates an id-only reference bound to a box.
    ///
    /// Used by binding code when loading a host entity from the store:
    /// the target id comes off the wire, the object is fetched only on
    /// first access.
    #[must_use]
    pub fn lazy(id: EntityId<T>, target_box: Arc<dyn TargetBox<T>>) -> Self {
        Self {
            state: ReferenceState::Lazy(id),
            target_box: Some(target_box),
        }
    }

    /// Binds the accessor for `T`'s box.
    ///
    /// Binding hook: invoked once, right after the host's first
    /// successful put (or at entity load). Idempotent re-binding to the
    /// same store is harmless.
    pub fn attach(&mut self, target_box: Arc<dyn TargetBox<T>>) {
        self.target_box = Some(target_box);
    }

    /// Returns `true` if an accessor is bound.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.target_box.is_some()
    }

    /// Returns the target, fetching it on first access.
    ///
    /// For an id-only reference this performs the fetch: a hit is
    /// cached, a miss marks the id unresolvable and yields `Ok(None)`
    /// (a miss is data, not an error). Without a bound accessor an
    /// id-only reference also yields `Ok(None)` and stays lazy.
    ///
    /// # Errors
    ///
    /// Propagates engine read failures unchanged.
    pub fn target(&mut self) -> RelationResult<Option<&T>> {
        if let ReferenceState::Lazy(id) = self.state {
            match &self.target_box {
                Some(target_box) => {
                    self.state = ReferenceState::Lazy(id).resolve(target_box.as_ref())?;
                }
                None => return Ok(None),
            }
        }
        Ok(self.state.entity())
    }

    /// Sets the target object.
    ///
    /// `None` clears the reference. A target that has no id yet is held
    /// as unstored until the host is put; a persisted target is cached
    /// with its id.
    pub fn set_target(&mut self, target: Option<T>) {
        self.state = ReferenceState::from_target(target);
    }

    /// Returns the target's id, if known.
    ///
    /// Never fetches; an unstored target has no id yet.
    #[must_use]
    pub fn target_id(&self) -> Option<EntityId<T>> {
        self.state.entity_id()
    }

    /// Sets the target by id, discarding any cached object.
    ///
    /// The object is not fetched; the reference becomes lazy and
    /// resolves on the next [`target`](Self::target) call. `None`
    /// clears the reference.
    pub fn set_target_id(&mut self, id: Option<EntityId<T>>) {
        self.state = match id {
            Some(id) => ReferenceState::Lazy(id),
            None => ReferenceState::None,
        };
    }

    /// Returns `true` if a target object or id is present.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.state.has_value()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> &ReferenceState<T> {
        &self.state
    }
}

impl<T: Entity> Default for ToOne<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: Entity> From<T> for ToOne<T> {
    fn from(target: T) -> Self {
        Self::new(Some(target))
    }
}

impl<T: Entity> fmt::Debug for ToOne<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToOne")
            .field("state", &self.state)
            .field("attached", &self.is_attached())
            .finish()
    }
}
