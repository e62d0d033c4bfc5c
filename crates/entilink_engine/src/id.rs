//! Entity and relation identifiers.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Unique identifier for an entity, scoped to its entity type.
///
/// Entity IDs are 64-bit values assigned by the engine on first put:
/// - `0` means "not yet assigned" (see [`EntityId::unassigned`])
/// - Immutable once non-zero; never reused within a store
/// - Scoped by the target type `T`, so an id for one entity type cannot
///   be passed where another type's id is expected
///
/// The type parameter is phantom (`fn() -> T`), so an `EntityId<T>` is
/// `Copy`, `Send` and `Sync` regardless of `T`.
pub struct EntityId<T> {
    raw: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EntityId<T> {
    /// Creates an entity ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns the unassigned ID (`0`).
    ///
    /// An entity carries this value until its first successful put.
    #[inline]
    #[must_use]
    pub const fn unassigned() -> Self {
        Self::new(0)
    }

    /// Returns the raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.raw
    }

    /// Returns `true` if this ID has not been assigned yet.
    #[inline]
    #[must_use]
    pub const fn is_unassigned(self) -> bool {
        self.raw == 0
    }
}

// Manual impls: derives would put bounds on `T`, which the phantom
// parameter does not require.

impl<T> Clone for EntityId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntityId<T> {}

impl<T> PartialEq for EntityId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for EntityId<T> {}

impl<T> PartialOrd for EntityId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for EntityId<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for EntityId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> Default for EntityId<T> {
    fn default() -> Self {
        Self::unassigned()
    }
}

impl<T> fmt::Debug for EntityId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.raw)
    }
}

impl<T> fmt::Display for EntityId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl<T> From<u64> for EntityId<T> {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl<T> From<EntityId<T>> for u64 {
    fn from(id: EntityId<T>) -> Self {
        id.raw
    }
}

/// Identifier for a standalone relation (link table) in the engine schema.
///
/// Relation IDs are stable and assigned by the schema/code generator when
/// a standalone relation is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationId(pub u32);

impl RelationId {
    /// Creates a new relation ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rel:{}", self.0)
    }
}
