//! engine::merge
//!
//! Three-way merge of trees.
//!
//! # Algorithm
//!
//! For every name in the union of `base`, `ours` and `theirs`, entries are
//! compared by `(mode, kind, sha)`; contents are never read.
//!
//! | situation                                   | result              |
//! |---------------------------------------------|---------------------|
//! | ours == theirs (including both absent)      | take ours           |
//! | base == ours                                | take theirs         |
//! | base == theirs                              | take ours           |
//! | a tree on two or more sides, no blob on     | recurse             |
//! | ours or theirs                              |                     |
//! | anything else                               | conflict at path    |
//!
//! "Take" of an absent entry is a deletion. When recursing, a side without
//! the directory contributes an empty tree, so deleting a directory on one
//! side and editing a file in it on the other conflicts at that file. A
//! sub-tree whose merge leaves no entries is dropped from its parent.
//!
//! # Writes
//!
//! Merging runs in two passes. Planning only reads trees and collects
//! conflicts. Only if the conflict set is empty are the merged sub-trees
//! written, children before parents. A conflicted merge writes nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use crate::core::types::Oid;
use crate::store::{EntryMode, ObjectStore, StoreError, TreeEntry};

/// Outcome of a three-way tree merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merged root tree, already written to the store.
    Clean(Oid),
    /// Slash-separated paths that changed differently on both sides.
    Conflicted(BTreeSet<String>),
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, MergeOutcome::Clean(_))
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Merged directory, not yet written.
#[derive(Debug, Default)]
struct TreePlan {
    entries: Vec<PlannedEntry>,
    conflicts: BTreeSet<String>,
}

#[derive(Debug)]
enum PlannedEntry {
    /// An existing object, used as is.
    Keep(TreeEntry),
    /// A sub-tree that has to be written from its own plan.
    Merged { name: String, plan: TreePlan },
}

/// Per-name decision.
enum Resolution<'e> {
    Take(Option<&'e TreeEntry>),
    Recurse,
    Conflict,
}

fn same(a: Option<&TreeEntry>, b: Option<&TreeEntry>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same_object(b),
        _ => false,
    }
}

fn resolve<'e>(
    base: Option<&'e TreeEntry>,
    ours: Option<&'e TreeEntry>,
    theirs: Option<&'e TreeEntry>,
) -> Resolution<'e> {
    if same(ours, theirs) || same(base, theirs) {
        Resolution::Take(ours)
    } else if same(base, ours) {
        Resolution::Take(theirs)
    } else {
        let is_tree = |e: Option<&TreeEntry>| e.is_some_and(TreeEntry::is_tree);
        let trees = [base, ours, theirs].into_iter().filter(|e| is_tree(*e)).count();
        let sides_are_trees = [ours, theirs].into_iter().all(|e| e.is_none() || is_tree(e));
        if trees >= 2 && sides_are_trees {
            Resolution::Recurse
        } else {
            Resolution::Conflict
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Three-way tree merger over an object store.
pub struct TreeMerger<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> TreeMerger<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Merge `theirs` into `ours`, using `base` as the common ancestor.
    ///
    /// # Errors
    ///
    /// Store failures propagate unchanged. Conflicts are not errors; they
    /// are reported as [`MergeOutcome::Conflicted`].
    pub async fn merge(
        &self,
        base: &Oid,
        ours: &Oid,
        theirs: &Oid,
    ) -> Result<MergeOutcome, StoreError> {
        if ours == theirs || base == theirs {
            return Ok(MergeOutcome::Clean(ours.clone()));
        }
        if base == ours {
            return Ok(MergeOutcome::Clean(theirs.clone()));
        }

        let mut plan = self
            .plan(
                Some(base.clone()),
                Some(ours.clone()),
                Some(theirs.clone()),
                String::new(),
            )
            .await?;

        if !plan.conflicts.is_empty() {
            let conflicts = std::mem::take(&mut plan.conflicts);
            tracing::debug!(count = conflicts.len(), ?conflicts, "tree merge conflicted");
            return Ok(MergeOutcome::Conflicted(conflicts));
        }

        let merged = self.materialize(plan).await?;
        tracing::debug!(tree = %merged.short(7), "tree merge clean");
        Ok(MergeOutcome::Clean(merged))
    }

    /// Entries of `sha`, or none for a side that lacks the directory.
    async fn entries(&self, sha: Option<&Oid>) -> Result<Vec<TreeEntry>, StoreError> {
        match sha {
            Some(sha) => Ok(self.store.get_tree(sha).await?.entries),
            None => Ok(Vec::new()),
        }
    }

    /// Read the three trees at `prefix` and decide every entry.
    fn plan(
        &self,
        base: Option<Oid>,
        ours: Option<Oid>,
        theirs: Option<Oid>,
        prefix: String,
    ) -> BoxFuture<'_, Result<TreePlan, StoreError>> {
        Box::pin(async move {
            let base_entries = by_name(self.entries(base.as_ref()).await?);
            let ours_entries = by_name(self.entries(ours.as_ref()).await?);
            let theirs_entries = by_name(self.entries(theirs.as_ref()).await?);

            let names: BTreeSet<String> = base_entries
                .keys()
                .chain(ours_entries.keys())
                .chain(theirs_entries.keys())
                .cloned()
                .collect();

            let mut plan = TreePlan::default();
            for name in names {
                let b = base_entries.get(&name);
                let o = ours_entries.get(&name);
                let t = theirs_entries.get(&name);

                match resolve(b, o, t) {
                    Resolution::Take(Some(entry)) => {
                        plan.entries.push(PlannedEntry::Keep(entry.clone()))
                    }
                    Resolution::Take(None) => {}
                    Resolution::Conflict => {
                        plan.conflicts.insert(join(&prefix, &name));
                    }
                    Resolution::Recurse => {
                        let tree_sha = |e: Option<&TreeEntry>| {
                            e.filter(|e| e.is_tree()).map(|e| e.sha.clone())
                        };
                        let mut sub = self
                            .plan(tree_sha(b), tree_sha(o), tree_sha(t), join(&prefix, &name))
                            .await?;
                        plan.conflicts.append(&mut sub.conflicts);
                        if !sub.entries.is_empty() {
                            plan.entries.push(PlannedEntry::Merged { name, plan: sub });
                        }
                    }
                }
            }
            Ok(plan)
        })
    }

    /// Write a conflict-free plan, children first, and return the root id.
    fn materialize(&self, plan: TreePlan) -> BoxFuture<'_, Result<Oid, StoreError>> {
        Box::pin(async move {
            let mut entries = Vec::with_capacity(plan.entries.len());
            for entry in plan.entries {
                match entry {
                    PlannedEntry::Keep(entry) => entries.push(entry),
                    PlannedEntry::Merged { name, plan } => {
                        let sha = self.materialize(plan).await?;
                        entries.push(TreeEntry::new(name, EntryMode::Tree, sha));
                    }
                }
            }
            self.store.create_tree(entries).await
        })
    }
}

/// Index one level's entries by name.
fn by_name(entries: Vec<TreeEntry>) -> BTreeMap<String, TreeEntry> {
    entries.into_iter().map(|e| (e.path.clone(), e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    async fn merge(
        store: &MemoryStore,
        base: &[(&str, &str)],
        ours: &[(&str, &str)],
        theirs: &[(&str, &str)],
    ) -> MergeOutcome {
        let base = store.tree_from_files(base);
        let ours = store.tree_from_files(ours);
        let theirs = store.tree_from_files(theirs);
        TreeMerger::new(store)
            .merge(&base, &ours, &theirs)
            .await
            .unwrap()
    }

    fn conflicts(paths: &[&str]) -> MergeOutcome {
        MergeOutcome::Conflicted(paths.iter().map(|p| p.to_string()).collect())
    }

    #[tokio::test]
    async fn disjoint_changes_merge_cleanly() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("a.txt", "a"), ("b.txt", "b")],
            &[("a.txt", "a2"), ("b.txt", "b")],
            &[("a.txt", "a"), ("b.txt", "b2"), ("c.txt", "new")],
        )
        .await;

        let MergeOutcome::Clean(tree) = outcome else {
            panic!("expected clean merge, got {outcome:?}");
        };
        let files = store.files_sync(&tree);
        assert_eq!(files["a.txt"], "a2");
        assert_eq!(files["b.txt"], "b2");
        assert_eq!(files["c.txt"], "new");
    }

    #[tokio::test]
    async fn identical_changes_do_not_conflict() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("a.txt", "a")],
            &[("a.txt", "same")],
            &[("a.txt", "same")],
        )
        .await;
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn divergent_modifications_conflict() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("a.txt", "a")],
            &[("a.txt", "ours")],
            &[("a.txt", "theirs")],
        )
        .await;
        assert_eq!(outcome, conflicts(&["a.txt"]));
    }

    #[tokio::test]
    async fn delete_versus_modify_conflicts() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("a.txt", "a"), ("keep", "k")],
            &[("keep", "k")],
            &[("a.txt", "changed"), ("keep", "k")],
        )
        .await;
        assert_eq!(outcome, conflicts(&["a.txt"]));
    }

    #[tokio::test]
    async fn one_sided_delete_is_applied() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("a.txt", "a"), ("b.txt", "b")],
            &[("a.txt", "a"), ("b.txt", "b2")],
            &[("b.txt", "b")],
        )
        .await;
        let MergeOutcome::Clean(tree) = outcome else {
            panic!("expected clean merge");
        };
        let files = store.files_sync(&tree);
        assert!(!files.contains_key("a.txt"));
        assert_eq!(files["b.txt"], "b2");
    }

    #[tokio::test]
    async fn add_add_with_different_content_conflicts() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("base", "x")],
            &[("base", "x"), ("new.txt", "one")],
            &[("base", "x"), ("new.txt", "two")],
        )
        .await;
        assert_eq!(outcome, conflicts(&["new.txt"]));
    }

    #[tokio::test]
    async fn nested_directories_recurse() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("src/a.rs", "a"), ("src/b.rs", "b"), ("docs/x.md", "x")],
            &[("src/a.rs", "a2"), ("src/b.rs", "b"), ("docs/x.md", "x")],
            &[("src/a.rs", "a"), ("src/b.rs", "b2"), ("docs/x.md", "x")],
        )
        .await;
        let MergeOutcome::Clean(tree) = outcome else {
            panic!("expected clean merge");
        };
        let files = store.files_sync(&tree);
        assert_eq!(files["src/a.rs"], "a2");
        assert_eq!(files["src/b.rs"], "b2");
        assert_eq!(files["docs/x.md"], "x");
    }

    #[tokio::test]
    async fn nested_conflict_reports_full_path() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("src/deep/a.rs", "a"), ("src/b.rs", "b")],
            &[("src/deep/a.rs", "ours"), ("src/b.rs", "b")],
            &[("src/deep/a.rs", "theirs"), ("src/b.rs", "b2")],
        )
        .await;
        assert_eq!(outcome, conflicts(&["src/deep/a.rs"]));
    }

    #[tokio::test]
    async fn directory_added_on_both_sides_merges_recursively() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("README", "r")],
            &[("README", "r"), ("lib/one.rs", "1")],
            &[("README", "r"), ("lib/two.rs", "2")],
        )
        .await;
        let MergeOutcome::Clean(tree) = outcome else {
            panic!("expected clean merge");
        };
        let files = store.files_sync(&tree);
        assert_eq!(files["lib/one.rs"], "1");
        assert_eq!(files["lib/two.rs"], "2");
    }

    #[tokio::test]
    async fn file_versus_directory_conflicts() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("README", "r")],
            &[("README", "r"), ("thing", "file")],
            &[("README", "r"), ("thing/inner", "dir")],
        )
        .await;
        assert_eq!(outcome, conflicts(&["thing"]));
    }

    #[tokio::test]
    async fn deleted_directory_versus_edit_conflicts_at_file() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("lib/a.rs", "a"), ("lib/b.rs", "b"), ("top", "t")],
            &[("top", "t")],
            &[("lib/a.rs", "a"), ("lib/b.rs", "b2"), ("top", "t")],
        )
        .await;
        assert_eq!(outcome, conflicts(&["lib/b.rs"]));
    }

    #[tokio::test]
    async fn deleted_directory_keeps_other_sides_additions() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("lib/a.rs", "a"), ("top", "t")],
            &[("top", "t2")],
            &[("lib/a.rs", "a"), ("lib/new.rs", "n"), ("top", "t")],
        )
        .await;
        let MergeOutcome::Clean(tree) = outcome else {
            panic!("expected clean merge");
        };
        let files = store.files_sync(&tree);
        assert!(!files.contains_key("lib/a.rs"));
        assert_eq!(files["lib/new.rs"], "n");
        assert_eq!(files["top"], "t2");
    }

    #[tokio::test]
    async fn emptied_directory_is_dropped() {
        let store = MemoryStore::new();
        let outcome = merge(
            &store,
            &[("dir/a", "a"), ("dir/b", "b"), ("top", "t")],
            &[("dir/b", "b"), ("top", "t2")],
            &[("dir/a", "a"), ("top", "t")],
        )
        .await;
        let MergeOutcome::Clean(tree) = outcome else {
            panic!("expected clean merge");
        };
        let root = store.get_tree(&tree).await.unwrap();
        assert!(root.entry("dir").is_none());
        assert_eq!(store.files_sync(&tree)["top"], "t2");
    }

    #[tokio::test]
    async fn wide_directory_merges_every_entry() {
        let store = MemoryStore::new();
        let names: Vec<String> = (0..300).map(|i| format!("dir/f{i:03}")).collect();
        let base: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "base")).collect();
        let ours: Vec<(&str, &str)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), if i % 2 == 0 { "ours" } else { "base" }))
            .collect();
        let theirs: Vec<(&str, &str)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), if i % 2 == 1 { "theirs" } else { "base" }))
            .collect();

        let outcome = merge(&store, &base, &ours, &theirs).await;

        let MergeOutcome::Clean(tree) = outcome else {
            panic!("expected clean merge, got {outcome:?}");
        };
        let files = store.files_sync(&tree);
        assert_eq!(files.len(), 300);
        for (i, name) in names.iter().enumerate() {
            let want = if i % 2 == 0 { "ours" } else { "theirs" };
            assert_eq!(files[name], want, "{name}");
        }
    }

    #[tokio::test]
    async fn mode_change_counts_as_change() {
        let store = MemoryStore::new();
        let blob = store.create_blob(b"#!/bin/sh\n").await.unwrap();
        let base = store
            .create_tree(vec![TreeEntry::new("run.sh", EntryMode::File, blob.clone())])
            .await
            .unwrap();
        let ours = store
            .create_tree(vec![TreeEntry::new("run.sh", EntryMode::Executable, blob)])
            .await
            .unwrap();
        let other = store.create_blob(b"#!/bin/bash\n").await.unwrap();
        let theirs = store
            .create_tree(vec![TreeEntry::new("run.sh", EntryMode::File, other)])
            .await
            .unwrap();

        let outcome = TreeMerger::new(&store)
            .merge(&base, &ours, &theirs)
            .await
            .unwrap();
        assert_eq!(outcome, conflicts(&["run.sh"]));
    }

    #[tokio::test]
    async fn trivial_merges_perform_no_store_calls() {
        let store = MemoryStore::new();
        let base = store.tree_from_files(&[("a", "1")]);
        let ours = store.tree_from_files(&[("a", "2")]);
        let theirs = store.tree_from_files(&[("a", "3")]);
        let merger = TreeMerger::new(&store);

        assert_eq!(
            merger.merge(&base, &ours, &base).await.unwrap(),
            MergeOutcome::Clean(ours.clone())
        );
        assert_eq!(
            merger.merge(&base, &base, &theirs).await.unwrap(),
            MergeOutcome::Clean(theirs.clone())
        );
        assert_eq!(
            merger.merge(&base, &ours, &ours).await.unwrap(),
            MergeOutcome::Clean(ours)
        );
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn conflicted_merge_writes_nothing() {
        let store = MemoryStore::new();
        let base = store.tree_from_files(&[("a", "1"), ("dir/b", "1")]);
        let ours = store.tree_from_files(&[("a", "2"), ("dir/b", "2")]);
        let theirs = store.tree_from_files(&[("a", "3"), ("dir/b", "1"), ("dir/c", "new")]);

        let outcome = TreeMerger::new(&store)
            .merge(&base, &ours, &theirs)
            .await
            .unwrap();
        assert!(!outcome.is_clean());
        assert!(store.operations().iter().all(|op| !op.is_write()));
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        use crate::store::memory::FailOn;

        let store = MemoryStore::new().fail_on(FailOn::GetTree(StoreError::NetworkError(
            "timed out".into(),
        )));
        let base = store.tree_from_files(&[("a", "1")]);
        let ours = store.tree_from_files(&[("a", "2")]);
        let theirs = store.tree_from_files(&[("b", "3")]);

        let err = TreeMerger::new(&store)
            .merge(&base, &ours, &theirs)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NetworkError(_)));
    }
}
