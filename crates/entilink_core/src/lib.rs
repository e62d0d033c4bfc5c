//! # entilink core
//!
//! Lazy relation proxies for entilink, the binding layer over an
//! external persistence engine.
//!
//! This crate provides:
//! - [`ToOne`] - single-valued relation proxy with lazy resolution
//! - [`ToMany`] - collection relation proxy with an edit buffer and
//!   diff-based reconciliation
//! - [`ReferenceState`] - the lifecycle of a single-valued reference
//! - [`Diff`] - the id-set difference reconciliation is built on
//!
//! The engine itself is out of scope; it is reached only through the
//! capability traits in [`entilink_engine`]. Reads never trigger
//! writes: a `ToMany` buffers edits locally until
//! [`ToMany::apply_to_db`] reconciles them inside a single write
//! transaction.
//!
//! ## Example
//!
//! ```rust,ignore
//! // `Project` and `Task` implement `Entity`; `Project` declares
//! // `tasks: ToMany<Project, Task>` over a standalone relation.
//! let mut project = Project::new("launch");
//! project.tasks.push(Task::new("write docs"));
//! project.tasks.push(Task::new("cut release"));
//!
//! let id = projects.put(&mut project)?;          // host gets its id
//! project.tasks.attach(id, tasks_box, store)?;   // binding hook
//! project.tasks.apply_to_db()?;                  // reconcile
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reconcile;
mod state;
mod to_many;
mod to_one;

pub use error::{RelationError, RelationResult};
pub use reconcile::Diff;
pub use state::ReferenceState;
pub use to_many::{RelationKind, ToMany};
pub use to_one::ToOne;

pub use entilink_engine::{Entity, EntityId, EngineError, EngineResult, RelationId};
