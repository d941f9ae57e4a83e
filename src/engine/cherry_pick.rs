//! engine::cherry_pick
//!
//! Replays an ordered list of commits onto a branch and moves the branch
//! atomically.
//!
//! # Lifecycle
//!
//! ```text
//! read head -> resolve commits -> apply each -> conditional ref update
//! ```
//!
//! 1. The head reference is read once; that value is the only one the final
//!    update will accept.
//! 2. Every commit id is resolved and checked for a single parent before
//!    anything is written.
//! 3. Commits are applied in order, each on top of the previous result.
//! 4. The reference is moved from the original value to the last new commit
//!    with a compare-and-swap.
//!
//! # Invariants
//!
//! - The reference is written at most once, and only after every commit
//!   applied cleanly
//! - Any failure leaves the reference at its original value
//! - Objects created before a failure are left behind, unreferenced
//! - If another writer moved the reference, the run fails with
//!   `ConcurrentUpdate` instead of overwriting their work

use thiserror::Error;

use super::apply::{single_parent, CommitApplier};
use crate::core::types::{BranchName, Oid, RefName};
use crate::store::{describe_actual, ObjectStore, Signature, StoreError};

#[cfg(any(test, feature = "test_hooks"))]
use super::engine_hooks::{self, HookRefInfo};

/// Errors from cherry-picking.
#[derive(Debug, Clone, Error)]
pub enum CherryPickError {
    /// The request named no commits.
    #[error("no commits to cherry-pick")]
    NoCommits,

    /// A commit with zero or several parents was requested.
    #[error("commit {commit} has {parents} parents; only single-parent commits can be cherry-picked")]
    UnsupportedCommit { commit: Oid, parents: usize },

    /// A commit's changes overlap changes already on the destination.
    #[error("commit {commit} conflicts at: {}", .paths.join(", "))]
    Conflict { commit: Oid, paths: Vec<String> },

    /// The head moved between the initial read and the final update.
    #[error("{refname} was updated concurrently: expected {expected}, found {}", describe_actual(.actual))]
    ConcurrentUpdate {
        refname: RefName,
        expected: Oid,
        actual: Option<Oid>,
    },

    /// Failure reported by the object store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A cherry-pick request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CherryPickRequest {
    /// Commits to replay, oldest first.
    pub commits: Vec<Oid>,
    /// Reference to replay them onto.
    pub head: RefName,
}

impl CherryPickRequest {
    pub fn new(commits: Vec<Oid>, head: RefName) -> Self {
        Self { commits, head }
    }

    /// Replay `commits` onto `refs/heads/<branch>`.
    pub fn for_branch(commits: Vec<Oid>, branch: &BranchName) -> Self {
        Self::new(commits, RefName::for_branch(branch))
    }
}

/// Cherry-pick orchestrator over an object store.
pub struct CherryPicker<'a> {
    store: &'a dyn ObjectStore,
    committer: Option<Signature>,
}

impl<'a> CherryPicker<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            committer: None,
        }
    }

    /// Stamp created commits with `committer`.
    pub fn with_committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Replay `request.commits` onto `request.head`.
    ///
    /// Returns the id the head now points at.
    pub async fn cherry_pick(&self, request: &CherryPickRequest) -> Result<Oid, CherryPickError> {
        if request.commits.is_empty() {
            return Err(CherryPickError::NoCommits);
        }

        let original = self.store.get_reference(&request.head).await?;
        tracing::info!(
            store = self.store.name(),
            head = %request.head,
            original = %original.short(7),
            commits = request.commits.len(),
            "cherry-pick started"
        );

        let mut sources = Vec::with_capacity(request.commits.len());
        for sha in &request.commits {
            let commit = self.store.get_commit(sha).await?;
            single_parent(&commit)?;
            sources.push(commit);
        }

        let mut applier = CommitApplier::new(self.store);
        if let Some(committer) = &self.committer {
            applier = applier.with_committer(committer.clone());
        }

        let mut tip = original.clone();
        for source in &sources {
            tip = match applier.apply(source, &tip).await {
                Ok(sha) => sha,
                Err(err) => {
                    tracing::warn!(commit = %source.sha.short(7), error = %err, "cherry-pick aborted");
                    return Err(err);
                }
            };
        }

        #[cfg(any(test, feature = "test_hooks"))]
        engine_hooks::invoke_before_update_ref(&HookRefInfo {
            refname: request.head.clone(),
            original: original.clone(),
            computed: tip.clone(),
        });

        match self
            .store
            .update_reference(&request.head, &tip, &original)
            .await
        {
            Ok(()) => {
                tracing::info!(head = %request.head, new = %tip.short(7), "cherry-pick complete");
                Ok(tip)
            }
            Err(StoreError::RefMismatch { actual, .. }) => {
                tracing::warn!(head = %request.head, "head moved during cherry-pick");
                Err(CherryPickError::ConcurrentUpdate {
                    refname: request.head.clone(),
                    expected: original,
                    actual,
                })
            }
            // Deleted after our read.
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(head = %request.head, "head deleted during cherry-pick");
                Err(CherryPickError::ConcurrentUpdate {
                    refname: request.head.clone(),
                    expected: original,
                    actual: None,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Cherry-pick with the source committers preserved.
pub async fn cherry_pick(
    store: &dyn ObjectStore,
    request: &CherryPickRequest,
) -> Result<Oid, CherryPickError> {
    CherryPicker::new(store).cherry_pick(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{FailOn, MemoryStore, StoreOperation};

    fn main_ref() -> RefName {
        RefName::new("refs/heads/main").unwrap()
    }

    /// `main` at a commit holding `a.txt` and `b.txt`, plus a side commit
    /// that changes `a.txt` from the same base.
    struct Fixture {
        store: MemoryStore,
        base: Oid,
        change_a: Oid,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let tree = store.tree_from_files(&[("a.txt", "a"), ("b.txt", "b")]);
        let base = store.commit_sync(&tree, &[], "base");
        let side = store.tree_from_files(&[("a.txt", "a2"), ("b.txt", "b")]);
        let change_a = store.commit_sync(&side, &[base.clone()], "change a");
        store.set_reference_sync(&main_ref(), &base);
        Fixture {
            store,
            base,
            change_a,
        }
    }

    #[tokio::test]
    async fn moves_head_to_new_commit() {
        let fx = fixture();
        let request = CherryPickRequest::new(vec![fx.change_a.clone()], main_ref());

        let new = cherry_pick(&fx.store, &request).await.unwrap();

        assert_eq!(fx.store.reference_sync(&main_ref()), Some(new.clone()));
        let commit = fx.store.get_commit_sync(&new).unwrap();
        assert_eq!(commit.parents, vec![fx.base.clone()]);
        assert_eq!(fx.store.read_file_sync(&commit.tree, "a.txt").as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn empty_request_touches_nothing() {
        let fx = fixture();
        let err = cherry_pick(&fx.store, &CherryPickRequest::new(vec![], main_ref()))
            .await
            .unwrap_err();
        assert!(matches!(err, CherryPickError::NoCommits));
        assert!(fx.store.operations().is_empty());
    }

    #[tokio::test]
    async fn merge_commit_rejected_before_any_write() {
        let fx = fixture();
        let tree = fx.store.tree_from_files(&[("m", "m")]);
        let merge = fx
            .store
            .commit_sync(&tree, &[fx.base.clone(), fx.change_a.clone()], "merge");
        let request = CherryPickRequest::new(vec![fx.change_a.clone(), merge.clone()], main_ref());

        let err = cherry_pick(&fx.store, &request).await.unwrap_err();

        match err {
            CherryPickError::UnsupportedCommit { commit, parents } => {
                assert_eq!(commit, merge);
                assert_eq!(parents, 2);
            }
            other => panic!("expected UnsupportedCommit, got {other:?}"),
        }
        assert!(fx.store.operations().iter().all(|op| !op.is_write()));
        assert_eq!(fx.store.reference_sync(&main_ref()), Some(fx.base));
    }

    #[tokio::test]
    async fn committer_is_restamped_when_configured() {
        let fx = fixture();
        let mut bot = crate::store::memory::fixture_signature();
        bot.name = "Release Bot".into();

        let new = CherryPicker::new(&fx.store)
            .with_committer(bot.clone())
            .cherry_pick(&CherryPickRequest::new(vec![fx.change_a], main_ref()))
            .await
            .unwrap();

        assert_eq!(fx.store.get_commit_sync(&new).unwrap().committer, bot);
    }

    #[tokio::test]
    async fn missing_head_is_not_found() {
        let fx = fixture();
        let request = CherryPickRequest::new(
            vec![fx.change_a],
            RefName::new("refs/heads/nope").unwrap(),
        );
        let err = cherry_pick(&fx.store, &request).await.unwrap_err();
        assert!(matches!(err, CherryPickError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn store_failure_leaves_head_alone() {
        let fx = fixture();
        let store = fx
            .store
            .clone()
            .fail_on(FailOn::CreateCommit(StoreError::RateLimited));

        let err = cherry_pick(&store, &CherryPickRequest::new(vec![fx.change_a], main_ref()))
            .await
            .unwrap_err();

        assert!(matches!(err, CherryPickError::Store(StoreError::RateLimited)));
        assert_eq!(store.reference_sync(&main_ref()), Some(fx.base));
        assert!(!store
            .operations()
            .iter()
            .any(|op| matches!(op, StoreOperation::UpdateReference { .. })));
    }

    #[tokio::test]
    async fn concurrent_move_is_detected() {
        let fx = fixture();
        let tree = fx.store.tree_from_files(&[("other", "writer")]);
        let intruder = fx.store.commit_sync(&tree, &[fx.base.clone()], "someone else");

        let outside = fx.store.clone();
        let moved_to = intruder.clone();
        engine_hooks::set_before_update_ref(move |info| {
            outside.set_reference_sync(&info.refname, &moved_to);
        });

        let result = cherry_pick(
            &fx.store,
            &CherryPickRequest::new(vec![fx.change_a.clone()], main_ref()),
        )
        .await;
        engine_hooks::clear();

        match result.unwrap_err() {
            CherryPickError::ConcurrentUpdate {
                refname,
                expected,
                actual,
            } => {
                assert_eq!(refname, main_ref());
                assert_eq!(expected, fx.base);
                assert_eq!(actual, Some(intruder.clone()));
            }
            other => panic!("expected ConcurrentUpdate, got {other:?}"),
        }
        assert_eq!(fx.store.reference_sync(&main_ref()), Some(intruder));
    }

    #[tokio::test]
    async fn deleted_head_is_a_concurrent_update() {
        let fx = fixture();
        let outside = fx.store.clone();
        engine_hooks::set_before_update_ref(move |info| {
            outside.delete_reference_sync(&info.refname);
        });

        let result = cherry_pick(
            &fx.store,
            &CherryPickRequest::new(vec![fx.change_a.clone()], main_ref()),
        )
        .await;
        engine_hooks::clear();

        match result.unwrap_err() {
            CherryPickError::ConcurrentUpdate {
                expected, actual, ..
            } => {
                assert_eq!(expected, fx.base);
                assert_eq!(actual, None);
            }
            other => panic!("expected ConcurrentUpdate, got {other:?}"),
        }
        assert_eq!(fx.store.reference_sync(&main_ref()), None);
    }

    #[tokio::test]
    async fn branch_request_targets_heads_ref() {
        let fx = fixture();
        let branch = BranchName::new("main").unwrap();
        let request = CherryPickRequest::for_branch(vec![fx.change_a.clone()], &branch);
        assert_eq!(request.head, main_ref());

        let new = cherry_pick(&fx.store, &request).await.unwrap();
        assert_eq!(fx.store.reference_sync(&main_ref()), Some(new));
    }

    #[tokio::test]
    async fn hook_sees_original_and_computed() {
        let fx = fixture();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        engine_hooks::set_before_update_ref(move |info| {
            *seen_clone.lock().unwrap() = Some(info.clone());
        });

        let new = cherry_pick(&fx.store, &CherryPickRequest::new(vec![fx.change_a], main_ref()))
            .await
            .unwrap();
        engine_hooks::clear();

        let info = seen.lock().unwrap().clone().unwrap();
        assert_eq!(info.original, fx.base);
        assert_eq!(info.computed, new);
    }

    #[test]
    fn error_messages() {
        let sha = Oid::new("c".repeat(40)).unwrap();
        let err = CherryPickError::Conflict {
            commit: sha.clone(),
            paths: vec!["a".into(), "b/c".into()],
        };
        assert_eq!(err.to_string(), format!("commit {} conflicts at: a, b/c", sha));

        let err = CherryPickError::ConcurrentUpdate {
            refname: main_ref(),
            expected: sha,
            actual: None,
        };
        assert!(err.to_string().ends_with("found <unknown>"));
    }
}
