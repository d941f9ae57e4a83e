//! engine::apply
//!
//! Applies one source commit on top of a destination tip.
//!
//! The merge base is the source commit's own parent: the change being
//! replayed is exactly `parent -> source`, merged into the tip's tree. The
//! new commit keeps the source's message and author; its single parent is
//! the tip.

use super::cherry_pick::CherryPickError;
use super::merge::{MergeOutcome, TreeMerger};
use crate::core::types::Oid;
use crate::store::{Commit, NewCommit, ObjectStore, Signature};

/// Replays single commits onto a destination tip.
pub struct CommitApplier<'a> {
    store: &'a dyn ObjectStore,
    committer: Option<Signature>,
}

impl<'a> CommitApplier<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            committer: None,
        }
    }

    /// Stamp new commits with `committer` instead of the source committer.
    pub fn with_committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Apply `source` on top of `tip` and return the new commit id.
    ///
    /// # Errors
    ///
    /// - `UnsupportedCommit` if `source` does not have exactly one parent
    /// - `Conflict` if the merge conflicts; nothing is written in that case
    /// - `Store` for any store failure
    pub async fn apply(&self, source: &Commit, tip: &Oid) -> Result<Oid, CherryPickError> {
        let parent = single_parent(source)?;

        let base = self.store.get_commit(parent).await?;
        let ours = self.store.get_commit(tip).await?;

        let tree = match TreeMerger::new(self.store)
            .merge(&base.tree, &ours.tree, &source.tree)
            .await?
        {
            MergeOutcome::Clean(tree) => tree,
            MergeOutcome::Conflicted(paths) => {
                return Err(CherryPickError::Conflict {
                    commit: source.sha.clone(),
                    paths: paths.into_iter().collect(),
                });
            }
        };

        let committer = self
            .committer
            .clone()
            .unwrap_or_else(|| source.committer.clone());

        let sha = self
            .store
            .create_commit(NewCommit {
                tree,
                parents: vec![tip.clone()],
                message: source.message.clone(),
                author: source.author.clone(),
                committer: Some(committer),
            })
            .await?;

        tracing::debug!(
            source = %source.sha.short(7),
            onto = %tip.short(7),
            new = %sha.short(7),
            "applied commit"
        );
        Ok(sha)
    }
}

/// The only parent of `commit`, or `UnsupportedCommit`.
pub(crate) fn single_parent(commit: &Commit) -> Result<&Oid, CherryPickError> {
    match commit.parents.as_slice() {
        [parent] => Ok(parent),
        parents => Err(CherryPickError::UnsupportedCommit {
            commit: commit.sha.clone(),
            parents: parents.len(),
        }),
    }
}
