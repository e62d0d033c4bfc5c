//! Engine capability traits.

use crate::entity::Entity;
use crate::error::EngineResult;
use crate::id::{EntityId, RelationId};

/// Per-entity-type access to the external engine.
///
/// A `TargetBox<T>` is the proxy layer's only path to entities of type
/// `T`. Real implementations are thin wrappers over the precompiled
/// engine's box handle; [`crate::MemoryBox`] is the in-memory reference.
///
/// # Invariants
///
/// - `put` assigns a fresh, never-reused id when the entity's id is
///   unassigned, and upserts in place otherwise
/// - `get` returns exactly the committed state; it never observes
///   another transaction's staged writes
/// - Implementations must be `Send + Sync`; the proxy layer shares the
///   box behind an `Arc`
pub trait TargetBox<T: Entity>: Send + Sync {
    /// Fetches an entity by id.
    ///
    /// Returns `Ok(None)` if no entity with that id exists. A miss is
    /// not an error.
    fn get(&self, id: EntityId<T>) -> EngineResult<Option<T>>;

    /// Persists an entity, assigning an id if it has none.
    ///
    /// Re-putting an entity with an already-assigned id is an upsert.
    /// The assigned id is written back through `Entity::set_id` and
    /// also returned.
    fn put(&self, entity: &mut T) -> EngineResult<EntityId<T>>;

    /// Returns all entities whose named to-one field points at `source`.
    ///
    /// `field` is the property name of a to-one relation declared on
    /// `T`; `source` is the raw id of the host being back-linked.
    /// Results come back in ascending id order.
    fn query_backlink(&self, field: &'static str, source: u64) -> EngineResult<Vec<T>>;
}

/// Link-table access and write transactions on the external engine.
///
/// Standalone relations are stored as rows in a link table keyed
/// `(source, target)`, independent of either entity's own record. All
/// link mutations must happen inside a write transaction; the engine
/// serializes write transactions (single-writer semantics).
pub trait RelationStore: Send + Sync {
    /// Returns the target ids linked to `source`, ascending.
    fn link_targets(&self, relation: RelationId, source: u64) -> EngineResult<Vec<u64>>;

    /// Returns the source ids linked to `target`, ascending.
    ///
    /// This is the backlink read of a forward link table.
    fn link_sources(&self, relation: RelationId, target: u64) -> EngineResult<Vec<u64>>;

    /// Inserts a link row. Inserting an existing row is a no-op.
    ///
    /// Requires an active write transaction on the calling thread.
    fn link_insert(&self, relation: RelationId, source: u64, target: u64) -> EngineResult<()>;

    /// Deletes a link row. Deleting a missing row is a no-op.
    ///
    /// Requires an active write transaction on the calling thread.
    fn link_delete(&self, relation: RelationId, source: u64, target: u64) -> EngineResult<()>;

    /// Begins a write transaction on the calling thread.
    ///
    /// Blocks until no other thread holds one. Fails if the calling
    /// thread already holds one (transactions do not nest).
    fn begin_write(&self) -> EngineResult<()>;

    /// Commits the calling thread's write transaction.
    fn commit_write(&self) -> EngineResult<()>;

    /// Rolls back the calling thread's write transaction, discarding
    /// all staged writes.
    fn rollback_write(&self) -> EngineResult<()>;
}
