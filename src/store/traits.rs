//! store::traits
//!
//! The object store trait and the object model it speaks.
//!
//! # Design
//!
//! The `ObjectStore` trait is async because every call is a round trip to
//! a remote service. Blobs, trees and commits are immutable and addressed
//! by content; references are the only mutable state, and the only way to
//! move one is [`ObjectStore::update_reference`], a conditional write.
//!
//! # Example
//!
//! ```ignore
//! use remote_cherry_pick::store::{ObjectStore, StoreError};
//!
//! async fn head_tree(store: &dyn ObjectStore, head: &RefName) -> Result<Oid, StoreError> {
//!     let tip = store.get_reference(head).await?;
//!     Ok(store.get_commit(&tip).await?.tree)
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Oid, RefName, TypeError};

/// Errors from object store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Authentication failed (invalid token, expired, insufficient permissions).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The requested object or reference does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded.
    #[error("rate limited")]
    RateLimited,

    /// The store rejected the request.
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Network or connection error, including timeouts.
    #[error("network error: {0}")]
    NetworkError(String),

    /// A conditional reference update found a different value than expected.
    #[error("ref {refname} is at {}, expected {expected}", describe_actual(.actual))]
    RefMismatch {
        /// The reference being updated
        refname: RefName,
        /// The value the caller expected
        expected: Oid,
        /// The value found, when the store reports it
        actual: Option<Oid>,
    },

    /// The store returned data that does not form a valid object.
    #[error("malformed object: {0}")]
    Malformed(String),
}

/// Renders the value a conditional update found, for error messages.
pub(crate) fn describe_actual(actual: &Option<Oid>) -> &str {
    actual.as_ref().map(|o| o.as_str()).unwrap_or("<unknown>")
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

/// The kind of object a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Blob => write!(f, "blob"),
            ObjectKind::Tree => write!(f, "tree"),
            ObjectKind::Commit => write!(f, "commit"),
        }
    }
}

/// File mode of a tree entry, serialized as git's octal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    #[serde(rename = "100644")]
    File,
    #[serde(rename = "100755")]
    Executable,
    #[serde(rename = "120000")]
    Symlink,
    #[serde(rename = "040000")]
    Tree,
    #[serde(rename = "160000")]
    Submodule,
}

impl EntryMode {
    /// The octal string git and the GitHub API use.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryMode::File => "100644",
            EntryMode::Executable => "100755",
            EntryMode::Symlink => "120000",
            EntryMode::Tree => "040000",
            EntryMode::Submodule => "160000",
        }
    }

    /// The object kind an entry with this mode points at.
    pub fn kind(&self) -> ObjectKind {
        match self {
            EntryMode::Tree => ObjectKind::Tree,
            EntryMode::Submodule => ObjectKind::Commit,
            EntryMode::File | EntryMode::Executable | EntryMode::Symlink => ObjectKind::Blob,
        }
    }
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a tree: a name within the directory and what it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeEntry {
    /// Entry name (a single path component)
    pub path: String,
    pub mode: EntryMode,
    pub kind: ObjectKind,
    pub sha: Oid,
}

impl TreeEntry {
    /// Create an entry whose kind follows from its mode.
    pub fn new(path: impl Into<String>, mode: EntryMode, sha: Oid) -> Self {
        Self {
            path: path.into(),
            mode,
            kind: mode.kind(),
            sha,
        }
    }

    /// Whether two entries denote the same content.
    ///
    /// Names are not compared; callers pair entries by name already.
    pub fn same_object(&self, other: &TreeEntry) -> bool {
        self.mode == other.mode && self.kind == other.kind && self.sha == other.sha
    }

    pub fn is_tree(&self) -> bool {
        self.kind == ObjectKind::Tree
    }
}

/// A directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub sha: Oid,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Look up a direct child by name.
    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.path == name)
    }
}

/// Author or committer identity with timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

impl Signature {
    /// Identity stamped with the current time, truncated to whole seconds.
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            date: Utc::now().trunc_subsecs(0),
        }
    }
}

/// A commit as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: Oid,
    /// Root tree of the snapshot
    pub tree: Oid,
    /// Parent commits, in order
    pub parents: Vec<Oid>,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
}

/// A commit to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommit {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub message: String,
    pub author: Signature,
    /// Committer identity; the store stamps its own when `None`.
    pub committer: Option<Signature>,
}

/// Primitive operations against a remote content-addressed object store.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Error Handling
///
/// All methods return `Result<T, StoreError>`. Nothing here retries; a
/// failed call is reported once and the caller decides what it means.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short name of the backend (e.g. "github", "memory").
    fn name(&self) -> &'static str;

    /// Store a blob and return its id.
    async fn create_blob(&self, content: &[u8]) -> Result<Oid, StoreError>;

    /// Read a blob's bytes.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no blob has this id
    async fn get_blob(&self, sha: &Oid) -> Result<Vec<u8>, StoreError>;

    /// Store a tree built from direct children and return its id.
    ///
    /// Entries name single path components; nesting is expressed by
    /// entries of kind `tree` pointing at already-stored trees.
    async fn create_tree(&self, entries: Vec<TreeEntry>) -> Result<Oid, StoreError>;

    /// Read a tree's direct children.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no tree has this id
    async fn get_tree(&self, sha: &Oid) -> Result<Tree, StoreError>;

    /// Store a commit and return its id.
    async fn create_commit(&self, commit: NewCommit) -> Result<Oid, StoreError>;

    /// Read a commit.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no commit has this id
    async fn get_commit(&self, sha: &Oid) -> Result<Commit, StoreError>;

    /// Read the commit a reference points at.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the reference does not exist
    async fn get_reference(&self, name: &RefName) -> Result<Oid, StoreError>;

    /// Move a reference to `new`, but only if it currently points at `expected`.
    ///
    /// Never forces. This is the single mutation the engine performs.
    ///
    /// # Errors
    ///
    /// - `RefMismatch` if the reference no longer points at `expected`
    /// - `NotFound` if the reference does not exist
    async fn update_reference(
        &self,
        name: &RefName,
        new: &Oid,
        expected: &Oid,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(c: char) -> Oid {
        Oid::new(c.to_string().repeat(40)).unwrap()
    }

    #[test]
    fn entry_mode_kind() {
        assert_eq!(EntryMode::File.kind(), ObjectKind::Blob);
        assert_eq!(EntryMode::Executable.kind(), ObjectKind::Blob);
        assert_eq!(EntryMode::Symlink.kind(), ObjectKind::Blob);
        assert_eq!(EntryMode::Tree.kind(), ObjectKind::Tree);
        assert_eq!(EntryMode::Submodule.kind(), ObjectKind::Commit);
    }

    #[test]
    fn entry_mode_serializes_as_octal() {
        assert_eq!(serde_json::to_string(&EntryMode::Tree).unwrap(), "\"040000\"");
        let mode: EntryMode = serde_json::from_str("\"100755\"").unwrap();
        assert_eq!(mode, EntryMode::Executable);
        assert_eq!(EntryMode::Symlink.to_string(), "120000");
    }

    #[test]
    fn object_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ObjectKind::Blob).unwrap(), "\"blob\"");
        assert_eq!(ObjectKind::Commit.to_string(), "commit");
    }

    #[test]
    fn same_object_ignores_name_but_not_mode() {
        let a = TreeEntry::new("a.txt", EntryMode::File, oid('1'));
        let renamed = TreeEntry::new("b.txt", EntryMode::File, oid('1'));
        let chmod = TreeEntry::new("a.txt", EntryMode::Executable, oid('1'));
        assert!(a.same_object(&renamed));
        assert!(!a.same_object(&chmod));
    }

    #[test]
    fn tree_entry_lookup() {
        let tree = Tree {
            sha: oid('f'),
            entries: vec![
                TreeEntry::new("src", EntryMode::Tree, oid('2')),
                TreeEntry::new("README", EntryMode::File, oid('3')),
            ],
        };
        assert!(tree.entry("src").unwrap().is_tree());
        assert!(tree.entry("missing").is_none());
    }

    #[test]
    fn ref_mismatch_display() {
        let err = StoreError::RefMismatch {
            refname: RefName::new("refs/heads/main").unwrap(),
            expected: oid('a'),
            actual: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("refs/heads/main"));
        assert!(msg.contains("<unknown>"));
    }

    #[test]
    fn store_error_display() {
        assert_eq!(StoreError::RateLimited.to_string(), "rate limited");
        assert_eq!(
            StoreError::ApiError {
                status: 422,
                message: "Validation failed".into()
            }
            .to_string(),
            "API error: 422 - Validation failed"
        );
        assert_eq!(
            StoreError::NotFound("commit abc".into()).to_string(),
            "not found: commit abc"
        );
    }
}
