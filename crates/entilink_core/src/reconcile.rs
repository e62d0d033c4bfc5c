//! Diff computation for collection reconciliation.

use std::collections::BTreeSet;

/// The minimal link/unlink work needed to make persisted state match a
/// local buffer.
///
/// Computed by id-set difference: duplicates collapse to a single link,
/// and unassigned ids (`0`) carry no identity so they are ignored (the
/// reconciler persists such targets first and re-diffs with their real
/// ids). Both sides of every reconciliation, whatever the relation
/// mode, flow through this one computation; there is no separate
/// "replace" path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Ids present locally but not in the baseline, ascending.
    pub to_add: Vec<u64>,
    /// Ids present in the baseline but not locally, ascending.
    pub to_remove: Vec<u64>,
}

impl Diff {
    /// Computes the diff between a baseline id set and a local id set.
    pub fn between(
        baseline: impl IntoIterator<Item = u64>,
        local: impl IntoIterator<Item = u64>,
    ) -> Self {
        let baseline: BTreeSet<u64> = baseline.into_iter().filter(|&id| id != 0).collect();
        let local: BTreeSet<u64> = local.into_iter().filter(|&id| id != 0).collect();
        Self {
            to_add: local.difference(&baseline).copied().collect(),
            to_remove: baseline.difference(&local).copied().collect(),
        }
    }

    /// Returns `true` if there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn equal_sets_are_empty_diff() {
        let diff = Diff::between([1, 2, 3], [3, 2, 1]);
        assert!(diff.is_empty());
    }

    #[test]
    fn adds_and_removes() {
        let diff = Diff::between([1, 2, 3], [2, 3, 4, 5]);
        assert_eq!(diff.to_add, vec![4, 5]);
        assert_eq!(diff.to_remove, vec![1]);
    }

    #[test]
    fn duplicates_collapse() {
        let diff = Diff::between([], [7, 7, 7]);
        assert_eq!(diff.to_add, vec![7]);
    }

    #[test]
    fn unassigned_ids_are_ignored() {
        let diff = Diff::between([0, 1], [0, 0, 1]);
        assert!(diff.is_empty());
    }

    #[test]
    fn empty_baseline_adds_everything() {
        let diff = Diff::between([], [3, 1, 2]);
        assert_eq!(diff.to_add, vec![1, 2, 3]);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn empty_local_removes_everything() {
        let diff = Diff::between([3, 1], []);
        assert!(diff.to_add.is_empty());
        assert_eq!(diff.to_remove, vec![1, 3]);
    }

    proptest! {
        #[test]
        fn diff_is_minimal(
            baseline in proptest::collection::vec(0u64..20, 0..30),
            local in proptest::collection::vec(0u64..20, 0..30),
        ) {
            let diff = Diff::between(baseline.iter().copied(), local.iter().copied());
            let baseline_set: BTreeSet<u64> =
                baseline.iter().copied().filter(|&id| id != 0).collect();
            let local_set: BTreeSet<u64> =
                local.iter().copied().filter(|&id| id != 0).collect();

            // to_add disjoint from baseline, to_remove disjoint from local.
            prop_assert!(diff.to_add.iter().all(|id| !baseline_set.contains(id)));
            prop_assert!(diff.to_remove.iter().all(|id| !local_set.contains(id)));
        }

        #[test]
        fn applying_diff_reaches_local(
            baseline in proptest::collection::vec(0u64..20, 0..30),
            local in proptest::collection::vec(0u64..20, 0..30),
        ) {
            let diff = Diff::between(baseline.iter().copied(), local.iter().copied());
            let mut applied: BTreeSet<u64> =
                baseline.iter().copied().filter(|&id| id != 0).collect();
            for id in &diff.to_remove {
                applied.remove(id);
            }
            for id in &diff.to_add {
                applied.insert(*id);
            }
            let local_set: BTreeSet<u64> =
                local.iter().copied().filter(|&id| id != 0).collect();
            prop_assert_eq!(applied, local_set);
        }
    }
}
