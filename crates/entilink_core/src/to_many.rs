//! Collection-valued lazy relation proxy.

use crate::error::{RelationError, RelationResult};
use crate::reconcile::Diff;
use entilink_engine::{Entity, EntityId, RelationId, RelationStore, TargetBox};
use std::fmt;
use std::slice;
use std::sync::Arc;
use tracing::debug;

/// How a to-many relation is represented in the engine.
pub enum RelationKind<T> {
    /// The host owns rows in a standalone link table keyed
    /// `(host id, target id)`.
    Standalone {
        /// The link table.
        relation: RelationId,
    },
    /// Derived as the inverse of another host's [`Standalone`]
    /// relation: rows live in the forward table with roles swapped.
    ///
    /// [`Standalone`]: RelationKind::Standalone
    StandaloneBacklink {
        /// The forward link table.
        relation: RelationId,
    },
    /// Derived as the inverse of a to-one field on `T` that points back
    /// at the host.
    PropertyBacklink {
        /// Property name of the to-one field, as the engine knows it.
        field: &'static str,
        /// Writes a raw host id into the field (`0` clears it).
        /// Registered by binding code alongside the field name.
        set: fn(&mut T, u64),
    },
}

impl<T> Clone for RelationKind<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RelationKind<T> {}

impl<T> fmt::Debug for RelationKind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone { relation } => {
                f.debug_struct("Standalone").field("relation", relation).finish()
            }
            Self::StandaloneBacklink { relation } => f
                .debug_struct("StandaloneBacklink")
                .field("relation", relation)
                .finish(),
            Self::PropertyBacklink { field, .. } => f
                .debug_struct("PropertyBacklink")
                .field("field", field)
                .finish(),
        }
    }
}

/// Engine capabilities bound to an attached proxy.
struct Attachment<T> {
    targets: Arc<dyn TargetBox<T>>,
    relations: Arc<dyn RelationStore>,
}

impl<T> Clone for Attachment<T> {
    fn clone(&self) -> Self {
        Self {
            targets: Arc::clone(&self.targets),
            relations: Arc::clone(&self.relations),
        }
    }
}

/// A lazy, edit-buffering reference from a host entity `H` to many
/// target entities `T`.
///
/// The proxy keeps two ordered lists: a `baseline` snapshot of what the
/// engine last reported, loaded lazily on first read, and a `local`
/// buffer the caller mutates freely. Mutation never touches the engine;
/// only [`apply_to_db`](Self::apply_to_db) writes, by diffing the two
/// id sets and applying the minimal add/remove work inside one write
/// transaction.
///
/// A proxy starts detached and empty when its host is constructed. Once
/// the host is persisted, binding code calls
/// [`attach`](Self::attach) - the binding hook - after which the proxy
/// can interact with the engine.
///
/// # Concurrency
///
/// All mutating operations take `&mut self`; sharing one instance
/// across threads requires caller-side synchronization. Distinct
/// proxies over the same engine serialize through the engine's
/// single-writer transactions.
#[derive(Clone)]
pub struct ToMany<H: Entity, T: Entity> {
    kind: RelationKind<T>,
    source_id: EntityId<H>,
    attachment: Option<Attachment<T>>,
    baseline: Option<Vec<T>>,
    local: Vec<T>,
}

impl<H: Entity, T: Entity> ToMany<H, T> {
    /// Creates a detached, empty proxy of the given kind.
    #[must_use]
    pub fn new(kind: RelationKind<T>) -> Self {
        Self {
            kind,
            source_id: EntityId::unassigned(),
            attachment: None,
            baseline: None,
            local: Vec::new(),
        }
    }

    /// Creates a proxy over a standalone link table.
    #[must_use]
    pub fn standalone(relation: RelationId) -> Self {
        Self::new(RelationKind::Standalone { relation })
    }

    /// Creates a proxy over the inverse of a standalone link table.
    #[must_use]
    pub fn standalone_backlink(relation: RelationId) -> Self {
        Self::new(RelationKind::StandaloneBacklink { relation })
    }

    /// Creates a proxy over the inverse of a to-one field on `T`.
    #[must_use]
    pub fn property_backlink(field: &'static str, set: fn(&mut T, u64)) -> Self {
        Self::new(RelationKind::PropertyBacklink { field, set })
    }

    /// Binds the proxy to a live store.
    ///
    /// Binding hook: invoked once, right after the host's first
    /// successful put (when its id goes from unassigned to assigned),
    /// or when the host is loaded from the store. For forward
    /// standalone relations, targets pushed while the host was unsaved
    /// are materialized immediately by running a reconciliation.
    ///
    /// # Errors
    ///
    /// Propagates engine failures from the materialization write.
    pub fn attach(
        &mut self,
        source_id: EntityId<H>,
        targets: Arc<dyn TargetBox<T>>,
        relations: Arc<dyn RelationStore>,
    ) -> RelationResult<()> {
        self.source_id = source_id;
        self.attachment = Some(Attachment { targets, relations });
        if matches!(self.kind, RelationKind::Standalone { .. })
            && !self.local.is_empty()
            && self.baseline.is_none()
            && self.can_interact_with_db()
        {
            self.apply_to_db()?;
        }
        Ok(())
    }

    /// Returns `true` once the host is persisted and the proxy is
    /// bound to a store.
    #[must_use]
    pub fn can_interact_with_db(&self) -> bool {
        !self.source_id.is_unassigned() && self.attachment.is_some()
    }

    /// Returns the host's id (`unassigned` until attached).
    #[must_use]
    pub fn source_id(&self) -> EntityId<H> {
        self.source_id
    }

    /// Returns the number of targets in the local buffer.
    ///
    /// Faults in the baseline on first read.
    ///
    /// # Errors
    ///
    /// Propagates engine read failures from the baseline load.
    pub fn len(&mut self) -> RelationResult<usize> {
        self.ensure_loaded()?;
        Ok(self.local.len())
    }

    /// Returns `true` if the local buffer is empty.
    ///
    /// # Errors
    ///
    /// Propagates engine read failures from the baseline load.
    pub fn is_empty(&mut self) -> RelationResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the target at `index`, if any.
    ///
    /// # Errors
    ///
    /// Propagates engine read failures from the baseline load.
    pub fn get(&mut self, index: usize) -> RelationResult<Option<&T>> {
        self.ensure_loaded()?;
        Ok(self.local.get(index))
    }

    /// Returns the local buffer as a slice.
    ///
    /// # Errors
    ///
    /// Propagates engine read failures from the baseline load.
    pub fn targets(&mut self) -> RelationResult<&[T]> {
        self.ensure_loaded()?;
        Ok(&self.local)
    }

    /// Iterates over the local buffer.
    ///
    /// # Errors
    ///
    /// Propagates engine read failures from the baseline load.
    pub fn iter(&mut self) -> RelationResult<slice::Iter<'_, T>> {
        Ok(self.targets()?.iter())
    }

    /// Returns the ids of all targets in the local buffer.
    ///
    /// Unsaved targets report [`EntityId::unassigned`].
    ///
    /// # Errors
    ///
    /// Propagates engine read failures from the baseline load.
    pub fn ids(&mut self) -> RelationResult<Vec<EntityId<T>>> {
        self.ensure_loaded()?;
        Ok(self.local.iter().map(Entity::id).collect())
    }

    /// Returns `true` if a target with the given id is in the local
    /// buffer.
    ///
    /// # Errors
    ///
    /// Propagates engine read failures from the baseline load.
    pub fn contains_id(&mut self, id: EntityId<T>) -> RelationResult<bool> {
        self.ensure_loaded()?;
        Ok(self.local.iter().any(|target| target.id() == id))
    }

    /// Appends a target to the local buffer. No I/O.
    pub fn push(&mut self, target: T) {
        self.local.push(target);
    }

    /// Inserts a target at `index` in the local buffer. No I/O.
    ///
    /// Indices refer to the buffer as the caller has observed it; read
    /// first if positional edits against persisted state are intended.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`, like `Vec::insert`.
    pub fn insert(&mut self, index: usize, target: T) {
        self.local.insert(index, target);
    }

    /// Removes and returns the target at `index`. No I/O.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`, like `Vec::remove`.
    pub fn remove(&mut self, index: usize) -> T {
        self.local.remove(index)
    }

    /// Keeps only the targets for which `keep` returns `true`. No I/O.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.local.retain(keep);
    }

    /// Replaces the entire local buffer. No I/O.
    ///
    /// This is clear-then-extend; the next
    /// [`apply_to_db`](Self::apply_to_db) reconciles it through the
    /// same diff as any other edit.
    pub fn replace_with(&mut self, targets: impl IntoIterator<Item = T>) {
        self.local.clear();
        self.local.extend(targets);
    }

    /// Empties the local buffer. No I/O.
    pub fn clear(&mut self) {
        self.local.clear();
    }

    /// Discards the local buffer and the baseline snapshot.
    ///
    /// All unapplied local edits are lost; the next read reloads from
    /// the engine. Reload order is ascending target id (link tables are
    /// ordered by id, as are backlink query results).
    pub fn reset(&mut self) {
        self.baseline = None;
        self.local.clear();
    }

    /// Reconciles the local buffer against persisted state.
    ///
    /// Computes the id-set diff between the baseline and the local
    /// buffer and applies the minimal add/remove work inside one engine
    /// write transaction. Targets that were never persisted are put
    /// first, inside the same transaction. An empty diff skips the
    /// transaction entirely - applying an untouched proxy performs zero
    /// writes.
    ///
    /// On success the baseline snapshot is advanced to the local
    /// buffer. On failure the transaction is rolled back and
    /// `local`/`baseline` are left as they were before the call - ids
    /// assigned to unsaved targets during the failed attempt are
    /// reverted - so a retry redoes the same work.
    ///
    /// # Errors
    ///
    /// [`RelationError::UnsavedHost`] if the host has not been
    /// persisted; engine failures are propagated unchanged after
    /// rollback.
    pub fn apply_to_db(&mut self) -> RelationResult<()> {
        if !self.can_interact_with_db() {
            return Err(RelationError::UnsavedHost);
        }
        self.ensure_loaded()?;
        let Some(attachment) = self.attachment.clone() else {
            return Err(RelationError::UnsavedHost);
        };

        // No-op fast path: nothing unsaved and an empty diff.
        let fresh: Vec<usize> = self
            .local
            .iter()
            .enumerate()
            .filter(|(_, target)| !target.is_persisted())
            .map(|(index, _)| index)
            .collect();
        if fresh.is_empty() && self.current_diff().is_empty() {
            return Ok(());
        }

        attachment.relations.begin_write()?;
        match self.apply_ops(&attachment) {
            Ok(()) => {
                attachment.relations.commit_write()?;
                self.baseline = Some(self.local.clone());
                Ok(())
            }
            Err(err) => {
                // Surface the original failure, not the rollback's.
                let _ = attachment.relations.rollback_write();
                // The rollback discarded the entity rows staged for
                // targets that were unsaved at entry, but the put loop
                // wrote ids into the buffer. Forget them so a retry
                // re-puts those targets instead of linking to rows
                // that no longer exist.
                for &index in &fresh {
                    if let Some(target) = self.local.get_mut(index) {
                        target.set_id(EntityId::unassigned());
                    }
                }
                Err(err)
            }
        }
    }

    /// Loads the baseline snapshot if the proxy can reach the engine.
    ///
    /// Edits made before the first load stay in the buffer; the loaded
    /// rows are placed ahead of them.
    fn ensure_loaded(&mut self) -> RelationResult<()> {
        if self.baseline.is_some() || !self.can_interact_with_db() {
            return Ok(());
        }
        let Some(attachment) = self.attachment.clone() else {
            return Ok(());
        };
        let source = self.source_id.as_u64();
        let loaded = match self.kind {
            RelationKind::Standalone { relation } => {
                let ids = attachment.relations.link_targets(relation, source)?;
                Self::resolve_ids(attachment.targets.as_ref(), &ids)?
            }
            RelationKind::StandaloneBacklink { relation } => {
                let ids = attachment.relations.link_sources(relation, source)?;
                Self::resolve_ids(attachment.targets.as_ref(), &ids)?
            }
            RelationKind::PropertyBacklink { field, .. } => {
                attachment.targets.query_backlink(field, source)?
            }
        };
        let pending = std::mem::take(&mut self.local);
        self.baseline = Some(loaded.clone());
        self.local = loaded;
        self.local.extend(pending);
        Ok(())
    }

    fn resolve_ids(target_box: &dyn TargetBox<T>, ids: &[u64]) -> RelationResult<Vec<T>> {
        let mut resolved = Vec::with_capacity(ids.len());
        for &id in ids {
            match target_box.get(EntityId::new(id))? {
                Some(target) => resolved.push(target),
                // Dangling link row; the target was deleted out of band.
                None => debug!(id, "linked target not found, skipping"),
            }
        }
        Ok(resolved)
    }

    fn current_diff(&self) -> Diff {
        let baseline_ids = self
            .baseline
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|target| target.id().as_u64());
        let local_ids = self.local.iter().map(|target| target.id().as_u64());
        Diff::between(baseline_ids, local_ids)
    }

    /// Applies the reconciliation inside the already-open transaction.
    fn apply_ops(&mut self, attachment: &Attachment<T>) -> RelationResult<()> {
        let source = self.source_id.as_u64();

        // Persist unsaved targets first so every local element carries
        // an identity the diff can see.
        for target in &mut self.local {
            if !target.is_persisted() {
                attachment.targets.put(target)?;
            }
        }

        let diff = self.current_diff();
        debug!(
            source,
            added = diff.to_add.len(),
            removed = diff.to_remove.len(),
            "applying relation diff"
        );

        match self.kind {
            RelationKind::Standalone { relation } => {
                for &id in &diff.to_add {
                    attachment.relations.link_insert(relation, source, id)?;
                }
                for &id in &diff.to_remove {
                    attachment.relations.link_delete(relation, source, id)?;
                }
            }
            RelationKind::StandaloneBacklink { relation } => {
                // Rows live in the forward table with roles swapped.
                for &id in &diff.to_add {
                    attachment.relations.link_insert(relation, id, source)?;
                }
                for &id in &diff.to_remove {
                    attachment.relations.link_delete(relation, id, source)?;
                }
            }
            RelationKind::PropertyBacklink { set, .. } => {
                // Additions come from the caller's buffer, so the local
                // object is the source of truth; removals write back the
                // engine's current record.
                for &id in &diff.to_add {
                    if let Some(mut target) = self.find_local(attachment, id)? {
                        set(&mut target, source);
                        attachment.targets.put(&mut target)?;
                    }
                }
                for &id in &diff.to_remove {
                    if let Some(mut target) = self.find_stored(attachment, id)? {
                        set(&mut target, 0);
                        attachment.targets.put(&mut target)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Finds a target by id, preferring the caller's buffer.
    fn find_local(&self, attachment: &Attachment<T>, id: u64) -> RelationResult<Option<T>> {
        let cached = self.local.iter().find(|target| target.id().as_u64() == id);
        if let Some(target) = cached {
            return Ok(Some(target.clone()));
        }
        Ok(attachment.targets.get(EntityId::new(id))?)
    }

    /// Finds a target by id, preferring the engine's current record.
    fn find_stored(&self, attachment: &Attachment<T>, id: u64) -> RelationResult<Option<T>> {
        if let Some(target) = attachment.targets.get(EntityId::new(id))? {
            return Ok(Some(target));
        }
        Ok(self
            .baseline
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .find(|target| target.id().as_u64() == id)
            .cloned())
    }
}

impl<H: Entity, T: Entity> fmt::Debug for ToMany<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToMany")
            .field("kind", &self.kind)
            .field("source_id", &self.source_id)
            .field("loaded", &self.baseline.is_some())
            .field("local_len", &self.local.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entilink_engine::{MemoryBox, MemoryEngine};

    #[derive(Debug, Clone, PartialEq)]
    struct Host {
        id: EntityId<Host>,
    }

    impl Entity for Host {
        const COLLECTION: &'static str = "hosts";

        fn id(&self) -> EntityId<Self> {
            self.id
        }

        fn set_id(&mut self, id: EntityId<Self>) {
            self.id = id;
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Task {
        id: EntityId<Task>,
        title: String,
    }

    impl Task {
        fn new(title: &str) -> Self {
            Self {
                id: EntityId::unassigned(),
                title: title.into(),
            }
        }
    }

    impl Entity for Task {
        const COLLECTION: &'static str = "tasks";

        fn id(&self) -> EntityId<Self> {
            self.id
        }

        fn set_id(&mut self, id: EntityId<Self>) {
            self.id = id;
        }
    }

    const REL: RelationId = RelationId::new(1);

    fn fixture() -> (Arc<MemoryEngine>, Arc<MemoryBox<Task>>) {
        let engine = Arc::new(MemoryEngine::new());
        let tasks = MemoryBox::<Task>::new(Arc::clone(&engine));
        (engine, tasks)
    }

    fn attached_proxy(
        engine: &Arc<MemoryEngine>,
        tasks: &Arc<MemoryBox<Task>>,
        source: u64,
    ) -> ToMany<Host, Task> {
        let mut rel = ToMany::standalone(REL);
        rel.attach(
            EntityId::new(source),
            tasks.clone() as Arc<dyn TargetBox<Task>>,
            engine.clone() as Arc<dyn RelationStore>,
        )
        .unwrap();
        rel
    }

    #[test]
    fn detached_proxy_buffers_without_io() {
        let mut rel = ToMany::<Host, Task>::standalone(REL);
        assert!(!rel.can_interact_with_db());

        rel.push(Task::new("a"));
        rel.push(Task::new("b"));
        assert_eq!(rel.len().unwrap(), 2);
        assert_eq!(rel.get(0).unwrap().unwrap().title, "a");
    }

    #[test]
    fn apply_on_unsaved_host_fails_and_keeps_buffer() {
        let mut rel = ToMany::<Host, Task>::standalone(REL);
        rel.push(Task::new("kept"));

        let result = rel.apply_to_db();
        assert!(matches!(result, Err(RelationError::UnsavedHost)));
        assert_eq!(rel.len().unwrap(), 1);
        assert_eq!(rel.get(0).unwrap().unwrap().title, "kept");
    }

    #[test]
    fn noop_apply_performs_zero_writes() {
        let (engine, tasks) = fixture();
        let mut rel = attached_proxy(&engine, &tasks, 5);

        let before = engine.write_count();
        rel.apply_to_db().unwrap();
        assert_eq!(engine.write_count(), before);

        // Still a no-op once loaded and unchanged.
        rel.len().unwrap();
        rel.apply_to_db().unwrap();
        assert_eq!(engine.write_count(), before);
    }

    #[test]
    fn remove_retain_replace_mutate_local_only() {
        let (engine, tasks) = fixture();
        let mut rel = attached_proxy(&engine, &tasks, 5);

        rel.push(Task::new("a"));
        rel.push(Task::new("b"));
        rel.push(Task::new("c"));

        let removed = rel.remove(0);
        assert_eq!(removed.title, "a");

        rel.retain(|task| task.title != "b");
        assert_eq!(rel.len().unwrap(), 1);

        rel.replace_with([Task::new("x"), Task::new("y")]);
        assert_eq!(rel.len().unwrap(), 2);

        // Nothing written yet.
        assert_eq!(engine.link_count(REL), 0);
    }

    #[test]
    fn reset_discards_unapplied_edits() {
        let (engine, tasks) = fixture();
        let mut rel = attached_proxy(&engine, &tasks, 5);

        rel.push(Task::new("unapplied"));
        rel.reset();
        assert_eq!(rel.len().unwrap(), 0);
    }

    #[test]
    fn apply_persists_unsaved_targets_and_links_them() {
        let (engine, tasks) = fixture();
        let mut rel = attached_proxy(&engine, &tasks, 5);

        rel.push(Task::new("t1"));
        rel.push(Task::new("t2"));
        rel.apply_to_db().unwrap();

        let ids = rel.ids().unwrap();
        assert!(ids.iter().all(|id| !id.is_unassigned()));
        assert_eq!(engine.link_count(REL), 2);
        assert_eq!(
            engine.link_targets(REL, 5).unwrap(),
            ids.iter().map(|id| id.as_u64()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn baseline_advances_on_apply() {
        let (engine, tasks) = fixture();
        let mut rel = attached_proxy(&engine, &tasks, 5);

        rel.push(Task::new("t"));
        rel.apply_to_db().unwrap();

        // Re-applying is now a no-op.
        let before = engine.write_count();
        rel.apply_to_db().unwrap();
        assert_eq!(engine.write_count(), before);
    }

    #[test]
    fn duplicate_pushes_collapse_to_one_link() {
        let (engine, tasks) = fixture();
        let mut task = Task::new("dup");
        tasks.put(&mut task).unwrap();

        let mut rel = attached_proxy(&engine, &tasks, 5);
        rel.push(task.clone());
        rel.push(task);
        rel.apply_to_db().unwrap();

        assert_eq!(engine.link_count(REL), 1);
    }

    #[test]
    fn debug_output_is_compact() {
        let rel = ToMany::<Host, Task>::standalone(REL);
        let rendered = format!("{rel:?}");
        assert!(rendered.contains("Standalone"));
        assert!(rendered.contains("local_len"));
    }
}
