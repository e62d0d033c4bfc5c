//! In-memory reference engine for testing.

use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};
use crate::id::{EntityId, RelationId};
use crate::traits::{RelationStore, TargetBox};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

/// A staged link-table mutation.
enum LinkOp {
    Insert(RelationId, u64, u64),
    Delete(RelationId, u64, u64),
}

/// State of the active write transaction, if any.
struct TxnState {
    owner: ThreadId,
    staged: Vec<LinkOp>,
}

struct EngineInner {
    /// Link tables: relation -> set of (source, target) rows.
    links: HashMap<RelationId, BTreeSet<(u64, u64)>>,
    /// The single active write transaction.
    txn: Option<TxnState>,
}

/// An in-memory engine implementing [`RelationStore`].
///
/// This engine stands in for the external persistence engine in tests
/// and documents the semantics a real engine binding must provide:
///
/// - One id sequence shared by all boxes; ids start at 1, never reused
/// - Single-writer transactions: `begin_write` blocks until the current
///   holder commits or rolls back
/// - Link and entity writes issued inside a transaction are staged and
///   only become visible on commit; rollback discards them
/// - Link-table reads return rows in ascending id order
///
/// Every write (entity put, link insert, link delete) increments an
/// observable counter, so tests can assert that no-op reconciliations
/// perform zero writes.
///
/// # Thread Safety
///
/// The engine is thread-safe and shared across threads behind an `Arc`.
pub struct MemoryEngine {
    inner: Mutex<EngineInner>,
    txn_released: Condvar,
    next_id: AtomicU64,
    writes: AtomicU64,
    participants: Mutex<Vec<Arc<dyn TxnParticipant>>>,
}

impl MemoryEngine {
    /// Creates a new empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                links: HashMap::new(),
                txn: None,
            }),
            txn_released: Condvar::new(),
            next_id: AtomicU64::new(1),
            writes: AtomicU64::new(0),
            participants: Mutex::new(Vec::new()),
        }
    }

    /// Returns the total number of writes issued so far.
    ///
    /// Counts entity puts and link insert/delete operations, including
    /// staged ones. Reads never count.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of committed rows in a link table.
    #[must_use]
    pub fn link_count(&self, relation: RelationId) -> usize {
        let inner = self.inner.lock();
        inner.links.get(&relation).map_or(0, BTreeSet::len)
    }

    /// Registers a participant to be notified on commit/rollback.
    ///
    /// Boxes register themselves on creation so their staged puts share
    /// the engine's transaction boundary.
    pub fn register_participant(&self, participant: Arc<dyn TxnParticipant>) {
        self.participants.lock().push(participant);
    }

    pub(crate) fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn note_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns `true` if the calling thread holds the write transaction.
    pub(crate) fn txn_active_here(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .txn
            .as_ref()
            .is_some_and(|txn| txn.owner == thread::current().id())
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("write_count", &self.write_count())
            .finish_non_exhaustive()
    }
}

impl RelationStore for MemoryEngine {
    fn link_targets(&self, relation: RelationId, source: u64) -> EngineResult<Vec<u64>> {
        let inner = self.inner.lock();
        let Some(rows) = inner.links.get(&relation) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range((source, u64::MIN)..=(source, u64::MAX))
            .map(|&(_, target)| target)
            .collect())
    }

    fn link_sources(&self, relation: RelationId, target: u64) -> EngineResult<Vec<u64>> {
        let inner = self.inner.lock();
        let Some(rows) = inner.links.get(&relation) else {
            return Ok(Vec::new());
        };
        // Rows are keyed (source, target); a backlink read scans.
        Ok(rows
            .iter()
            .filter(|&&(_, t)| t == target)
            .map(|&(source, _)| source)
            .collect())
    }

    fn link_insert(&self, relation: RelationId, source: u64, target: u64) -> EngineResult<()> {
        self.stage_link_op(LinkOp::Insert(relation, source, target))
    }

    fn link_delete(&self, relation: RelationId, source: u64, target: u64) -> EngineResult<()> {
        self.stage_link_op(LinkOp::Delete(relation, source, target))
    }

    fn begin_write(&self) -> EngineResult<()> {
        let me = thread::current().id();
        let mut inner = self.inner.lock();
        loop {
            match &inner.txn {
                None => break,
                Some(txn) if txn.owner == me => return Err(EngineError::NestedTransaction),
                Some(_) => self.txn_released.wait(&mut inner),
            }
        }
        inner.txn = Some(TxnState {
            owner: me,
            staged: Vec::new(),
        });
        Ok(())
    }

    fn commit_write(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let txn = self.take_owned_txn(&mut inner)?;
        let staged = txn.staged.len();
        for op in txn.staged {
            match op {
                LinkOp::Insert(relation, source, target) => {
                    inner
                        .links
                        .entry(relation)
                        .or_default()
                        .insert((source, target));
                }
                LinkOp::Delete(relation, source, target) => {
                    if let Some(rows) = inner.links.get_mut(&relation) {
                        rows.remove(&(source, target));
                    }
                }
            }
        }
        for participant in self.participants.lock().iter() {
            participant.commit_staged();
        }
        self.txn_released.notify_all();
        debug!(staged, "write transaction committed");
        Ok(())
    }

    fn rollback_write(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let txn = self.take_owned_txn(&mut inner)?;
        for participant in self.participants.lock().iter() {
            participant.discard_staged();
        }
        self.txn_released.notify_all();
        debug!(discarded = txn.staged.len(), "write transaction rolled back");
        Ok(())
    }
}

impl MemoryEngine {
    fn stage_link_op(&self, op: LinkOp) -> EngineResult<()> {
        let me = thread::current().id();
        let mut inner = self.inner.lock();
        match &mut inner.txn {
            Some(txn) if txn.owner == me => {
                txn.staged.push(op);
                self.note_write();
                Ok(())
            }
            _ => Err(EngineError::NoActiveTransaction),
        }
    }

    /// Removes and returns the active transaction if the calling thread
    /// owns it.
    fn take_owned_txn(&self, inner: &mut EngineInner) -> EngineResult<TxnState> {
        match inner.txn.take() {
            Some(txn) if txn.owner == thread::current().id() => Ok(txn),
            other => {
                inner.txn = other;
                Err(EngineError::NoActiveTransaction)
            }
        }
    }
}

/// Receives commit/rollback notifications from [`MemoryEngine`].
///
/// Implemented by [`MemoryBox`] so entity puts staged during a write
/// transaction share the engine's atomicity.
pub trait TxnParticipant: Send + Sync {
    /// Makes all staged writes visible.
    fn commit_staged(&self);

    /// Discards all staged writes.
    fn discard_staged(&self);
}

/// An in-memory entity box implementing [`TargetBox`].
///
/// Rows live in an ordered map keyed by raw id, so scans (and therefore
/// backlink queries) return entities in ascending id order. Puts issued
/// while the calling thread holds the engine's write transaction are
/// staged and applied on commit; puts outside a transaction apply
/// immediately, as a real engine would wrap them in an implicit one.
///
/// Backlink queries require the to-one field to be registered up front
/// with [`MemoryBox::register_backlink`], standing in for the metadata
/// a code generator would emit.
pub struct MemoryBox<T: Entity> {
    engine: Arc<MemoryEngine>,
    rows: Mutex<BTreeMap<u64, T>>,
    staged: Mutex<Vec<T>>,
    backlinks: Mutex<HashMap<&'static str, fn(&T) -> u64>>,
}

impl<T: Entity> MemoryBox<T> {
    /// Creates a box on the given engine and registers it for
    /// transaction notifications.
    #[must_use]
    pub fn new(engine: Arc<MemoryEngine>) -> Arc<Self> {
        let this = Arc::new(Self {
            engine: Arc::clone(&engine),
            rows: Mutex::new(BTreeMap::new()),
            staged: Mutex::new(Vec::new()),
            backlinks: Mutex::new(HashMap::new()),
        });
        engine.register_participant(Arc::clone(&this) as Arc<dyn TxnParticipant>);
        this
    }

    /// Registers the extractor for a to-one field on `T`, enabling
    /// backlink queries against that field.
    ///
    /// The extractor returns the raw target id of the field, `0` when
    /// the field is empty.
    pub fn register_backlink(&self, field: &'static str, raw_target_id: fn(&T) -> u64) {
        self.backlinks.lock().insert(field, raw_target_id);
    }

    /// Returns the number of committed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns `true` if no entities are committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Returns `true` if an entity with the given id is committed.
    #[must_use]
    pub fn contains(&self, id: EntityId<T>) -> bool {
        self.rows.lock().contains_key(&id.as_u64())
    }
}

impl<T: Entity> TargetBox<T> for MemoryBox<T> {
    fn get(&self, id: EntityId<T>) -> EngineResult<Option<T>> {
        Ok(self.rows.lock().get(&id.as_u64()).cloned())
    }

    fn put(&self, entity: &mut T) -> EngineResult<EntityId<T>> {
        let mut id = entity.id();
        if id.is_unassigned() {
            id = EntityId::new(self.engine.allocate_id());
            entity.set_id(id);
        }
        self.engine.note_write();
        if self.engine.txn_active_here() {
            self.staged.lock().push(entity.clone());
        } else {
            self.rows.lock().insert(id.as_u64(), entity.clone());
        }
        Ok(id)
    }

    fn query_backlink(&self, field: &'static str, source: u64) -> EngineResult<Vec<T>> {
        let extract = self
            .backlinks
            .lock()
            .get(field)
            .copied()
            .ok_or_else(|| EngineError::unknown_backlink_field(field))?;
        let rows = self.rows.lock();
        Ok(rows
            .values()
            .filter(|entity| extract(entity) == source)
            .cloned()
            .collect())
    }
}

impl<T: Entity> TxnParticipant for MemoryBox<T> {
    fn commit_staged(&self) {
        let mut rows = self.rows.lock();
        for entity in self.staged.lock().drain(..) {
            rows.insert(entity.id().as_u64(), entity);
        }
    }

    fn discard_staged(&self) {
        self.staged.lock().clear();
    }
}

impl<T: Entity> std::fmt::Debug for MemoryBox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBox")
            .field("collection", &T::COLLECTION)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: EntityId<Item>,
        label: String,
    }

    impl Item {
        fn new(label: &str) -> Self {
            Self {
                id: EntityId::unassigned(),
                label: label.into(),
            }
        }
    }

    impl Entity for Item {
        const COLLECTION: &'static str = "items";

        fn id(&self) -> EntityId<Self> {
            self.id
        }

        fn set_id(&mut self, id: EntityId<Self>) {
            self.id = id;
        }
    }

    #[test]
    fn put_assigns_monotonic_ids() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(Arc::clone(&engine));

        let mut a = Item::new("a");
        let mut b = Item::new("b");
        let id_a = items.put(&mut a).unwrap();
        let id_b = items.put(&mut b).unwrap();

        assert!(!id_a.is_unassigned());
        assert!(id_a < id_b);
        assert_eq!(a.id, id_a);
    }

    #[test]
    fn put_with_assigned_id_is_upsert() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(Arc::clone(&engine));

        let mut item = Item::new("before");
        let id = items.put(&mut item).unwrap();

        item.label = "after".into();
        let id2 = items.put(&mut item).unwrap();

        assert_eq!(id, id2);
        assert_eq!(items.len(), 1);
        assert_eq!(items.get(id).unwrap().unwrap().label, "after");
    }

    #[test]
    fn get_missing_is_none() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(engine);
        assert!(items.get(EntityId::new(99)).unwrap().is_none());
    }

    #[test]
    fn link_ops_require_transaction() {
        let engine = MemoryEngine::new();
        let rel = RelationId::new(1);
        let result = engine.link_insert(rel, 1, 2);
        assert!(matches!(result, Err(EngineError::NoActiveTransaction)));
    }

    #[test]
    fn commit_applies_link_ops() {
        let engine = MemoryEngine::new();
        let rel = RelationId::new(1);

        engine.begin_write().unwrap();
        engine.link_insert(rel, 1, 10).unwrap();
        engine.link_insert(rel, 1, 5).unwrap();
        engine.commit_write().unwrap();

        // Ascending target order.
        assert_eq!(engine.link_targets(rel, 1).unwrap(), vec![5, 10]);
        assert_eq!(engine.link_count(rel), 2);
    }

    #[test]
    fn rollback_discards_link_ops() {
        let engine = MemoryEngine::new();
        let rel = RelationId::new(1);

        engine.begin_write().unwrap();
        engine.link_insert(rel, 1, 10).unwrap();
        engine.rollback_write().unwrap();

        assert!(engine.link_targets(rel, 1).unwrap().is_empty());
    }

    #[test]
    fn rollback_discards_staged_puts() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(Arc::clone(&engine));

        engine.begin_write().unwrap();
        let mut item = Item::new("ghost");
        items.put(&mut item).unwrap();
        engine.rollback_write().unwrap();

        // Id was assigned, row was not.
        assert!(!item.id.is_unassigned());
        assert!(!items.contains(item.id));
    }

    #[test]
    fn commit_applies_staged_puts() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(Arc::clone(&engine));

        engine.begin_write().unwrap();
        let mut item = Item::new("kept");
        items.put(&mut item).unwrap();
        // Not visible before commit.
        assert!(!items.contains(item.id));
        engine.commit_write().unwrap();

        assert!(items.contains(item.id));
    }

    #[test]
    fn nested_begin_fails() {
        let engine = MemoryEngine::new();
        engine.begin_write().unwrap();
        assert!(matches!(
            engine.begin_write(),
            Err(EngineError::NestedTransaction)
        ));
        engine.rollback_write().unwrap();
    }

    #[test]
    fn commit_without_begin_fails() {
        let engine = MemoryEngine::new();
        assert!(matches!(
            engine.commit_write(),
            Err(EngineError::NoActiveTransaction)
        ));
    }

    #[test]
    fn write_counter_counts_puts_and_links() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(Arc::clone(&engine));
        let rel = RelationId::new(1);

        assert_eq!(engine.write_count(), 0);

        let mut item = Item::new("x");
        items.put(&mut item).unwrap();
        assert_eq!(engine.write_count(), 1);

        engine.begin_write().unwrap();
        engine.link_insert(rel, 1, 2).unwrap();
        engine.link_delete(rel, 1, 3).unwrap();
        engine.commit_write().unwrap();
        assert_eq!(engine.write_count(), 3);

        // Reads do not count.
        engine.link_targets(rel, 1).unwrap();
        items.get(item.id).unwrap();
        assert_eq!(engine.write_count(), 3);
    }

    #[test]
    fn link_sources_reads_backwards() {
        let engine = MemoryEngine::new();
        let rel = RelationId::new(2);

        engine.begin_write().unwrap();
        engine.link_insert(rel, 7, 100).unwrap();
        engine.link_insert(rel, 3, 100).unwrap();
        engine.link_insert(rel, 3, 200).unwrap();
        engine.commit_write().unwrap();

        assert_eq!(engine.link_sources(rel, 100).unwrap(), vec![3, 7]);
        assert_eq!(engine.link_sources(rel, 200).unwrap(), vec![3]);
    }

    #[test]
    fn duplicate_link_insert_is_single_row() {
        let engine = MemoryEngine::new();
        let rel = RelationId::new(1);

        engine.begin_write().unwrap();
        engine.link_insert(rel, 1, 2).unwrap();
        engine.link_insert(rel, 1, 2).unwrap();
        engine.commit_write().unwrap();

        assert_eq!(engine.link_count(rel), 1);
    }

    #[test]
    fn backlink_query_uses_registered_field() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(Arc::clone(&engine));
        // Pretend the label's length is a raw target id.
        items.register_backlink("owner", |item| item.label.len() as u64);

        let mut a = Item::new("xx");
        let mut b = Item::new("yyy");
        let mut c = Item::new("zz");
        items.put(&mut a).unwrap();
        items.put(&mut b).unwrap();
        items.put(&mut c).unwrap();

        let matched = items.query_backlink("owner", 2).unwrap();
        assert_eq!(matched.len(), 2);
        // Ascending id order.
        assert_eq!(matched[0].id, a.id);
        assert_eq!(matched[1].id, c.id);
    }

    #[test]
    fn box_is_shared_across_threads() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(Arc::clone(&engine));

        let worker = Arc::clone(&items);
        let id = thread::spawn(move || {
            let mut item = Item::new("cross-thread");
            worker.put(&mut item).unwrap()
        })
        .join()
        .unwrap();

        assert!(items.contains(id));
        assert_eq!(items.get(id).unwrap().unwrap().label, "cross-thread");
    }

    #[test]
    fn backlink_query_unknown_field_fails() {
        let engine = Arc::new(MemoryEngine::new());
        let items = MemoryBox::<Item>::new(engine);
        let result = items.query_backlink("nope", 1);
        assert!(matches!(
            result,
            Err(EngineError::UnknownBacklinkField { .. })
        ));
    }
}
