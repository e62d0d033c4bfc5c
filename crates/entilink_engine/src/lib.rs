//! # entilink engine surface
//!
//! Capability traits and identity types for the external persistence
//! engine that entilink binds to.
//!
//! The engine itself (storage, query execution, indexing, sync) lives
//! outside this workspace; the relation proxy layer only ever reaches it
//! through the narrow traits defined here:
//!
//! - [`TargetBox`] - per-entity-type get/put/backlink-query
//! - [`RelationStore`] - link-table access and write transactions
//!
//! The crate also ships [`MemoryEngine`]/[`MemoryBox`], an in-memory
//! implementation of both traits. It exists for tests and doubles as
//! executable documentation of the semantics a real engine must provide
//! (single-writer transactions, staged writes, ascending-id read order).
//!
//! ## Example
//!
//! ```rust
//! use entilink_engine::{Entity, EntityId, MemoryBox, MemoryEngine, TargetBox};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone)]
//! struct Note {
//!     id: EntityId<Note>,
//!     text: String,
//! }
//!
//! impl Entity for Note {
//!     const COLLECTION: &'static str = "notes";
//!     fn id(&self) -> EntityId<Note> {
//!         self.id
//!     }
//!     fn set_id(&mut self, id: EntityId<Note>) {
//!         self.id = id;
//!     }
//! }
//!
//! let engine = Arc::new(MemoryEngine::new());
//! let notes = MemoryBox::<Note>::new(Arc::clone(&engine));
//!
//! let mut note = Note { id: EntityId::unassigned(), text: "hi".into() };
//! let id = notes.put(&mut note).unwrap();
//! assert!(!id.is_unassigned());
//! assert_eq!(notes.get(id).unwrap().unwrap().text, "hi");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod id;
mod memory;
mod traits;

pub use entity::Entity;
pub use error::{EngineError, EngineResult};
pub use id::{EntityId, RelationId};
pub use memory::{MemoryBox, MemoryEngine, TxnParticipant};
pub use traits::{RelationStore, TargetBox};
