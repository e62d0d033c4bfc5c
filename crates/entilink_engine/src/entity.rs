//! The entity contract implemented by binding structs.

use crate::id::EntityId;

/// Contract between generated binding structs and the relation layer.
///
/// Implementations are normally produced by the schema/code generator;
/// tests implement it by hand. The only obligations are a stable
/// collection name and access to the entity's own identity. Entities
/// must be `Send + Sync`: boxes hold them and are shared across
/// threads behind an `Arc`.
///
/// # Identity
///
/// An entity starts with [`EntityId::unassigned`] and receives its id
/// from the engine on first put. The id never changes afterwards;
/// `set_id` exists solely so the engine binding can record that first
/// assignment.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Name of the collection this entity type is stored in.
    const COLLECTION: &'static str;

    /// Returns this entity's identity.
    fn id(&self) -> EntityId<Self>;

    /// Records the identity assigned by the engine.
    fn set_id(&mut self, id: EntityId<Self>);

    /// Returns `true` once the entity has been persisted at least once.
    fn is_persisted(&self) -> bool {
        !self.id().is_unassigned()
    }
}
