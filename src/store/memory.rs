//! store::memory
//!
//! In-memory object store for deterministic testing.
//!
//! # Design
//!
//! Objects are addressed by a SHA-256 over a git-style header and a
//! canonical serialization, so writing the same content twice yields the
//! same id, just like the real store. References live in a map and are only
//! moved through the conditional update (or the `set_reference_sync`
//! fixture helper, which stands in for an outside writer).
//!
//! Every trait call is recorded, and any one operation can be configured to
//! fail, to exercise the engine's error paths.
//!
//! # Example
//!
//! ```
//! use remote_cherry_pick::core::types::RefName;
//! use remote_cherry_pick::store::memory::MemoryStore;
//! use remote_cherry_pick::store::ObjectStore;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let tree = store.tree_from_files(&[("src/lib.rs", "fn main() {}\n")]);
//! let root = store.commit_sync(&tree, &[], "init");
//! let main = RefName::new("refs/heads/main").unwrap();
//! store.set_reference_sync(&main, &root);
//!
//! assert_eq!(store.get_reference(&main).await.unwrap(), root);
//! assert_eq!(store.read_file_sync(&tree, "src/lib.rs").as_deref(), Some("fn main() {}\n"));
//! # });
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};

use super::traits::{
    Commit, EntryMode, NewCommit, ObjectKind, ObjectStore, Signature, StoreError, Tree, TreeEntry,
};
use crate::core::types::{Oid, RefName};

/// In-memory store for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state,
/// so a test can keep a handle while the engine owns another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    objects: HashMap<Oid, StoredObject>,
    refs: HashMap<RefName, Oid>,
    /// Operation to fail on (for testing error paths).
    fail_on: Option<FailOn>,
    /// Recorded trait calls for verification.
    operations: Vec<StoreOperation>,
}

#[derive(Debug, Clone)]
enum StoredObject {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit(StoredCommit),
}

#[derive(Debug, Clone)]
struct StoredCommit {
    tree: Oid,
    parents: Vec<Oid>,
    message: String,
    author: Signature,
    committer: Signature,
}

/// Configuration for which operation should fail.
#[derive(Debug, Clone)]
pub enum FailOn {
    CreateBlob(StoreError),
    GetBlob(StoreError),
    CreateTree(StoreError),
    GetTree(StoreError),
    CreateCommit(StoreError),
    GetCommit(StoreError),
    GetReference(StoreError),
    UpdateReference(StoreError),
}

/// Recorded trait call for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    CreateBlob { sha: Oid },
    GetBlob { sha: Oid },
    CreateTree { sha: Oid },
    GetTree { sha: Oid },
    CreateCommit { sha: Oid },
    GetCommit { sha: Oid },
    GetReference { name: RefName },
    UpdateReference { name: RefName, new: Oid, expected: Oid },
}

impl StoreOperation {
    /// Whether this call wrote to the store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StoreOperation::CreateBlob { .. }
                | StoreOperation::CreateTree { .. }
                | StoreOperation::CreateCommit { .. }
                | StoreOperation::UpdateReference { .. }
        )
    }
}

/// The author used by the fixture helpers, fixed so ids are reproducible.
pub fn fixture_signature() -> Signature {
    Signature {
        name: "Fixture Author".to_string(),
        email: "fixture@example.com".to_string(),
        date: Utc
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_default(),
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner::default())),
        }
    }

    /// Configure the store to fail on a specific operation.
    ///
    /// ```
    /// use remote_cherry_pick::store::memory::{FailOn, MemoryStore};
    /// use remote_cherry_pick::store::StoreError;
    ///
    /// let store = MemoryStore::new()
    ///     .fail_on(FailOn::CreateCommit(StoreError::RateLimited));
    /// ```
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.inner.lock().unwrap().fail_on = Some(fail_on);
        self
    }

    /// Clear the failure configuration.
    pub fn clear_fail_on(&self) {
        self.inner.lock().unwrap().fail_on = None;
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<StoreOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        self.inner.lock().unwrap().operations.clear();
    }

    /// Number of commit objects in the store, reachable or not.
    pub fn commit_count(&self) -> usize {
        self.count(|o| matches!(o, StoredObject::Commit(_)))
    }

    /// Number of tree objects in the store, reachable or not.
    pub fn tree_count(&self) -> usize {
        self.count(|o| matches!(o, StoredObject::Tree(_)))
    }

    fn count(&self, pred: impl Fn(&StoredObject) -> bool) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.objects.values().filter(|o| pred(o)).count()
    }

    // ---------------------------------------------------------------------
    // Fixture helpers (not recorded, never fail)
    // ---------------------------------------------------------------------

    /// Point a reference at a commit unconditionally, as an outside writer would.
    pub fn set_reference_sync(&self, name: &RefName, sha: &Oid) {
        let mut inner = self.inner.lock().unwrap();
        inner.refs.insert(name.clone(), sha.clone());
    }

    /// Remove a reference, as another writer deleting the branch would.
    pub fn delete_reference_sync(&self, name: &RefName) {
        self.inner.lock().unwrap().refs.remove(name);
    }

    /// Current value of a reference.
    pub fn reference_sync(&self, name: &RefName) -> Option<Oid> {
        self.inner.lock().unwrap().refs.get(name).cloned()
    }

    /// Build a tree from `(path, content)` pairs, creating sub-trees for
    /// every directory in the paths.
    pub fn tree_from_files(&self, files: &[(&str, &str)]) -> Oid {
        let mut root = DirNode::default();
        for (path, content) in files {
            root.insert(path, content);
        }
        let mut inner = self.inner.lock().unwrap();
        root.write(&mut inner)
    }

    /// Write a commit with the fixture author as author and committer.
    pub fn commit_sync(&self, tree: &Oid, parents: &[Oid], message: &str) -> Oid {
        let mut inner = self.inner.lock().unwrap();
        inner.put(StoredObject::Commit(StoredCommit {
            tree: tree.clone(),
            parents: parents.to_vec(),
            message: message.to_string(),
            author: fixture_signature(),
            committer: fixture_signature(),
        }))
    }

    /// Read a commit without recording the call.
    pub fn get_commit_sync(&self, sha: &Oid) -> Option<Commit> {
        let inner = self.inner.lock().unwrap();
        match inner.objects.get(sha) {
            Some(StoredObject::Commit(c)) => Some(c.to_commit(sha)),
            _ => None,
        }
    }

    /// Read a file's content by slash-separated path.
    pub fn read_file_sync(&self, tree: &Oid, path: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let mut current = tree.clone();
        let mut components = path.split('/').peekable();
        while let Some(name) = components.next() {
            let entries = match inner.objects.get(&current) {
                Some(StoredObject::Tree(entries)) => entries,
                _ => return None,
            };
            let entry = entries.iter().find(|e| e.path == name)?;
            if components.peek().is_none() {
                return match inner.objects.get(&entry.sha) {
                    Some(StoredObject::Blob(bytes)) => Some(String::from_utf8_lossy(bytes).into()),
                    _ => None,
                };
            }
            current = entry.sha.clone();
        }
        None
    }

    /// Every file under a tree, keyed by slash-separated path.
    pub fn files_sync(&self, tree: &Oid) -> BTreeMap<String, String> {
        let inner = self.inner.lock().unwrap();
        let mut out = BTreeMap::new();
        inner.collect_files(tree, "", &mut out);
        out
    }

    // ---------------------------------------------------------------------
    // Trait plumbing
    // ---------------------------------------------------------------------

    fn record(&self, op: StoreOperation) {
        self.inner.lock().unwrap().operations.push(op);
    }

    /// Return the configured error if `matches` selects it.
    fn check_fail(&self, matches: impl Fn(&FailOn) -> Option<&StoreError>) -> Result<(), StoreError> {
        let inner = self.inner.lock().unwrap();
        match inner.fail_on.as_ref().and_then(matches) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoredCommit {
    fn to_commit(&self, sha: &Oid) -> Commit {
        Commit {
            sha: sha.clone(),
            tree: self.tree.clone(),
            parents: self.parents.clone(),
            message: self.message.clone(),
            author: self.author.clone(),
            committer: self.committer.clone(),
        }
    }
}

impl StoredObject {
    fn kind(&self) -> ObjectKind {
        match self {
            StoredObject::Blob(_) => ObjectKind::Blob,
            StoredObject::Tree(_) => ObjectKind::Tree,
            StoredObject::Commit(_) => ObjectKind::Commit,
        }
    }

    /// Canonical bytes the id is computed over.
    fn canonical_bytes(&self) -> Vec<u8> {
        let body = match self {
            StoredObject::Blob(bytes) => bytes.clone(),
            StoredObject::Tree(entries) => {
                let mut body = Vec::new();
                for entry in entries {
                    body.extend_from_slice(entry.mode.as_str().as_bytes());
                    body.push(b' ');
                    body.extend_from_slice(entry.path.as_bytes());
                    body.push(0);
                    body.extend_from_slice(entry.sha.as_str().as_bytes());
                    body.push(b'\n');
                }
                body
            }
            StoredObject::Commit(c) => {
                let mut text = format!("tree {}\n", c.tree);
                for parent in &c.parents {
                    text.push_str(&format!("parent {}\n", parent));
                }
                text.push_str(&format!(
                    "author {} <{}> {}\ncommitter {} <{}> {}\n\n{}",
                    c.author.name,
                    c.author.email,
                    c.author.date.timestamp(),
                    c.committer.name,
                    c.committer.email,
                    c.committer.date.timestamp(),
                    c.message
                ));
                text.into_bytes()
            }
        };
        let mut bytes = format!("{} {}\0", self.kind(), body.len()).into_bytes();
        bytes.extend_from_slice(&body);
        bytes
    }
}

impl MemoryStoreInner {
    /// Insert an object under its content hash and return the id.
    fn put(&mut self, object: StoredObject) -> Oid {
        let digest = Sha256::digest(object.canonical_bytes());
        let sha = Oid::from_digest(&digest).expect("sha256 digest is a valid oid");
        self.objects.entry(sha.clone()).or_insert(object);
        sha
    }

    fn kind_of(&self, sha: &Oid) -> Option<ObjectKind> {
        self.objects.get(sha).map(StoredObject::kind)
    }

    fn collect_files(&self, tree: &Oid, prefix: &str, out: &mut BTreeMap<String, String>) {
        let Some(StoredObject::Tree(entries)) = self.objects.get(tree) else {
            return;
        };
        for entry in entries {
            let path = if prefix.is_empty() {
                entry.path.clone()
            } else {
                format!("{}/{}", prefix, entry.path)
            };
            match self.objects.get(&entry.sha) {
                Some(StoredObject::Tree(_)) => self.collect_files(&entry.sha, &path, out),
                Some(StoredObject::Blob(bytes)) => {
                    out.insert(path, String::from_utf8_lossy(bytes).into());
                }
                _ => {}
            }
        }
    }
}

/// Directory node used by `tree_from_files`.
#[derive(Default)]
struct DirNode {
    files: BTreeMap<String, String>,
    dirs: BTreeMap<String, DirNode>,
}

impl DirNode {
    fn insert(&mut self, path: &str, content: &str) {
        match path.split_once('/') {
            Some((dir, rest)) => self
                .dirs
                .entry(dir.to_string())
                .or_default()
                .insert(rest, content),
            None => {
                self.files.insert(path.to_string(), content.to_string());
            }
        }
    }

    fn write(&self, inner: &mut MemoryStoreInner) -> Oid {
        let mut entries = Vec::new();
        for (name, node) in &self.dirs {
            let sha = node.write(inner);
            entries.push(TreeEntry::new(name.clone(), EntryMode::Tree, sha));
        }
        for (name, content) in &self.files {
            let sha = inner.put(StoredObject::Blob(content.as_bytes().to_vec()));
            entries.push(TreeEntry::new(name.clone(), EntryMode::File, sha));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        inner.put(StoredObject::Tree(entries))
    }
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::ApiError {
        status: 422,
        message: message.into(),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_blob(&self, content: &[u8]) -> Result<Oid, StoreError> {
        self.check_fail(|f| match f {
            FailOn::CreateBlob(e) => Some(e),
            _ => None,
        })?;
        let sha = self
            .inner
            .lock()
            .unwrap()
            .put(StoredObject::Blob(content.to_vec()));
        self.record(StoreOperation::CreateBlob { sha: sha.clone() });
        Ok(sha)
    }

    async fn get_blob(&self, sha: &Oid) -> Result<Vec<u8>, StoreError> {
        self.record(StoreOperation::GetBlob { sha: sha.clone() });
        self.check_fail(|f| match f {
            FailOn::GetBlob(e) => Some(e),
            _ => None,
        })?;
        match self.inner.lock().unwrap().objects.get(sha) {
            Some(StoredObject::Blob(bytes)) => Ok(bytes.clone()),
            _ => Err(StoreError::NotFound(format!("blob {}", sha))),
        }
    }

    async fn create_tree(&self, mut entries: Vec<TreeEntry>) -> Result<Oid, StoreError> {
        self.check_fail(|f| match f {
            FailOn::CreateTree(e) => Some(e),
            _ => None,
        })?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let sha = {
            let mut inner = self.inner.lock().unwrap();
            for (i, entry) in entries.iter().enumerate() {
                if entry.path.is_empty() || entry.path.contains('/') {
                    return Err(invalid(format!("invalid entry name '{}'", entry.path)));
                }
                if i > 0 && entries[i - 1].path == entry.path {
                    return Err(invalid(format!("duplicate entry '{}'", entry.path)));
                }
                if entry.kind != entry.mode.kind() {
                    return Err(invalid(format!(
                        "entry '{}' has mode {} but type {}",
                        entry.path, entry.mode, entry.kind
                    )));
                }
                // Submodule entries point outside this store.
                if entry.kind != ObjectKind::Commit && inner.kind_of(&entry.sha) != Some(entry.kind)
                {
                    return Err(invalid(format!(
                        "entry '{}' references missing {} {}",
                        entry.path, entry.kind, entry.sha
                    )));
                }
            }
            inner.put(StoredObject::Tree(entries))
        };
        self.record(StoreOperation::CreateTree { sha: sha.clone() });
        Ok(sha)
    }

    async fn get_tree(&self, sha: &Oid) -> Result<Tree, StoreError> {
        self.record(StoreOperation::GetTree { sha: sha.clone() });
        self.check_fail(|f| match f {
            FailOn::GetTree(e) => Some(e),
            _ => None,
        })?;
        match self.inner.lock().unwrap().objects.get(sha) {
            Some(StoredObject::Tree(entries)) => Ok(Tree {
                sha: sha.clone(),
                entries: entries.clone(),
            }),
            _ => Err(StoreError::NotFound(format!("tree {}", sha))),
        }
    }

    async fn create_commit(&self, commit: NewCommit) -> Result<Oid, StoreError> {
        self.check_fail(|f| match f {
            FailOn::CreateCommit(e) => Some(e),
            _ => None,
        })?;
        let sha = {
            let mut inner = self.inner.lock().unwrap();
            if inner.kind_of(&commit.tree) != Some(ObjectKind::Tree) {
                return Err(invalid(format!("tree {} does not exist", commit.tree)));
            }
            if let Some(parent) = commit
                .parents
                .iter()
                .find(|p| inner.kind_of(p) != Some(ObjectKind::Commit))
            {
                return Err(invalid(format!("parent {} does not exist", parent)));
            }
            let committer = commit.committer.unwrap_or_else(|| commit.author.clone());
            inner.put(StoredObject::Commit(StoredCommit {
                tree: commit.tree,
                parents: commit.parents,
                message: commit.message,
                author: commit.author,
                committer,
            }))
        };
        self.record(StoreOperation::CreateCommit { sha: sha.clone() });
        Ok(sha)
    }

    async fn get_commit(&self, sha: &Oid) -> Result<Commit, StoreError> {
        self.record(StoreOperation::GetCommit { sha: sha.clone() });
        self.check_fail(|f| match f {
            FailOn::GetCommit(e) => Some(e),
            _ => None,
        })?;
        self.get_commit_sync(sha)
            .ok_or_else(|| StoreError::NotFound(format!("commit {}", sha)))
    }

    async fn get_reference(&self, name: &RefName) -> Result<Oid, StoreError> {
        self.record(StoreOperation::GetReference { name: name.clone() });
        self.check_fail(|f| match f {
            FailOn::GetReference(e) => Some(e),
            _ => None,
        })?;
        self.reference_sync(name)
            .ok_or_else(|| StoreError::NotFound(format!("ref {}", name)))
    }

    async fn update_reference(
        &self,
        name: &RefName,
        new: &Oid,
        expected: &Oid,
    ) -> Result<(), StoreError> {
        self.record(StoreOperation::UpdateReference {
            name: name.clone(),
            new: new.clone(),
            expected: expected.clone(),
        });
        self.check_fail(|f| match f {
            FailOn::UpdateReference(e) => Some(e),
            _ => None,
        })?;

        let mut inner = self.inner.lock().unwrap();
        if inner.kind_of(new) != Some(ObjectKind::Commit) {
            return Err(invalid(format!("object {} is not a commit", new)));
        }
        match inner.refs.get(name).cloned() {
            None => Err(StoreError::NotFound(format!("ref {}", name))),
            Some(actual) if &actual != expected => Err(StoreError::RefMismatch {
                refname: name.clone(),
                expected: expected.clone(),
                actual: Some(actual),
            }),
            Some(_) => {
                inner.refs.insert(name.clone(), new.clone());
                Ok(())
            }
        }
    }
}
