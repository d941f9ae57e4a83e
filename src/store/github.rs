//! store::github
//!
//! Object store backed by the GitHub Git Data REST API.
//!
//! # Design
//!
//! Every trait method maps onto one endpoint under `/repos/{owner}/{repo}/git`:
//!
//! | operation          | endpoint                    |
//! |--------------------|-----------------------------|
//! | `create_blob`      | `POST git/blobs`            |
//! | `get_blob`         | `GET git/blobs/{sha}`       |
//! | `create_tree`      | `POST git/trees`            |
//! | `get_tree`         | `GET git/trees/{sha}`       |
//! | `create_commit`    | `POST git/commits`          |
//! | `get_commit`       | `GET git/commits/{sha}`     |
//! | `get_reference`    | `GET git/ref/{ref}`         |
//! | `update_reference` | `PATCH git/refs/{ref}`      |
//!
//! The refs endpoint has no "expected old value" parameter. The conditional
//! update therefore re-reads the ref, refuses if it moved, and then sends a
//! PATCH with `force: false`, so GitHub itself rejects anything that is not a
//! fast-forward of the value it holds at write time. A 422 from that PATCH is
//! reported as [`StoreError::RefMismatch`].
//!
//! # Authentication
//!
//! Tokens come from a [`TokenProvider`] on every request. A 401/403 is
//! retried once with a freshly fetched token; nothing else is retried.
//!
//! # Example
//!
//! ```ignore
//! use remote_cherry_pick::auth::StaticTokenProvider;
//! use remote_cherry_pick::store::github::GitHubStore;
//! use std::sync::Arc;
//!
//! let provider = Arc::new(StaticTokenProvider::new(token, "github.com"));
//! let store = GitHubStore::new(provider, "octocat", "hello-world");
//! let tip = store.get_reference(&RefName::new("refs/heads/main")?).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::traits::{
    Commit, EntryMode, NewCommit, ObjectKind, ObjectStore, Signature, StoreError, Tree, TreeEntry,
};
use crate::auth::TokenProvider;
use crate::core::types::{Oid, RefName};

/// Default GitHub API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = "remote-cherry-pick";

/// GitHub-backed object store.
pub struct GitHubStore {
    client: Client,
    token_provider: Arc<dyn TokenProvider>,
    /// Repository owner (user or organization)
    owner: String,
    /// Repository name
    repo: String,
    /// API base URL (configurable for GitHub Enterprise)
    api_base: String,
}

// Custom Debug to keep the provider (and anything it holds) out of logs
impl std::fmt::Debug for GitHubStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubStore")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl GitHubStore {
    /// Create a store for `owner/repo` on github.com.
    pub fn new(
        provider: Arc<dyn TokenProvider>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self::with_api_base(provider, owner, repo, DEFAULT_API_BASE)
    }

    /// Create a store against a custom API base URL.
    ///
    /// Use this for GitHub Enterprise (`https://github.example.com/api/v3`).
    pub fn with_api_base(
        provider: Arc<dyn TokenProvider>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            token_provider: provider,
            owner: owner.into(),
            repo: repo.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a store from a git remote URL (SSH or HTTPS).
    ///
    /// Returns `None` if the URL is not a github.com URL.
    pub fn from_remote_url(url: &str, provider: Arc<dyn TokenProvider>) -> Option<Self> {
        let (owner, repo) = parse_github_url(url)?;
        Some(Self::new(provider, owner, repo))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Build URL for a repository endpoint.
    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    /// Build common headers, fetching a current token.
    async fn headers(&self) -> Result<HeaderMap, StoreError> {
        let token = self
            .token_provider
            .bearer_token()
            .await
            .map_err(|e| StoreError::AuthFailed(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| StoreError::AuthFailed("token is not a valid header value".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        Ok(headers)
    }

    /// Send one request; on an auth failure, fetch a fresh token and retry once.
    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Response, StoreError> {
        let mut retried = false;
        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(self.headers().await?);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request
                .send()
                .await
                .map_err(|e| StoreError::NetworkError(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let auth_failure =
                status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
            if auth_failure && !retried {
                tracing::debug!(%url, %status, "auth failure, retrying with fresh token");
                retried = true;
                continue;
            }
            return Err(error_from_response(response).await);
        }
    }

    /// Send a request and decode a JSON response body.
    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, StoreError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.repo_url(path);
        let response = self.send(method, &url, body).await?;
        let status = response.status();
        response.json().await.map_err(|e| StoreError::ApiError {
            status: status.as_u16(),
            message: format!("Failed to parse response: {}", e),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
        self.call::<(), T>(Method::GET, path, None).await
    }
}

/// Map an unsuccessful response to a store error.
async fn error_from_response(response: Response) -> StoreError {
    let status = response.status();
    let message = match response.json::<GitHubErrorResponse>().await {
        Ok(err) => err.message,
        Err(_) => "Unknown error".to_string(),
    };

    match status {
        StatusCode::UNAUTHORIZED => StoreError::AuthFailed("Invalid or expired token".into()),
        StatusCode::FORBIDDEN if message.to_lowercase().contains("rate limit") => {
            StoreError::RateLimited
        }
        StatusCode::FORBIDDEN => StoreError::AuthFailed(format!("Permission denied: {}", message)),
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => StoreError::RateLimited,
        _ if status.is_server_error() => StoreError::ApiError {
            status: status.as_u16(),
            message: format!("GitHub server error: {}", message),
        },
        _ => StoreError::ApiError {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ObjectStore for GitHubStore {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn create_blob(&self, content: &[u8]) -> Result<Oid, StoreError> {
        let body = CreateBlobBody {
            content: BASE64.encode(content),
            encoding: "base64",
        };
        let created: ShaOnly = self.call(Method::POST, "git/blobs", Some(&body)).await?;
        tracing::debug!(sha = %created.sha, size = content.len(), "created blob");
        Ok(created.sha)
    }

    async fn get_blob(&self, sha: &Oid) -> Result<Vec<u8>, StoreError> {
        let blob: GitHubBlob = self.get(&format!("git/blobs/{}", sha)).await?;
        match blob.encoding.as_str() {
            "base64" => {
                // GitHub wraps base64 payloads at 60 columns.
                let packed: String = blob.content.split_whitespace().collect();
                BASE64
                    .decode(packed)
                    .map_err(|e| StoreError::Malformed(format!("blob {}: {}", sha, e)))
            }
            "utf-8" => Ok(blob.content.into_bytes()),
            other => Err(StoreError::Malformed(format!(
                "blob {}: unsupported encoding '{}'",
                sha, other
            ))),
        }
    }

    async fn create_tree(&self, entries: Vec<TreeEntry>) -> Result<Oid, StoreError> {
        let body = CreateTreeBody {
            tree: entries.iter().map(GitHubTreeEntryBody::from).collect(),
        };
        let created: ShaOnly = self.call(Method::POST, "git/trees", Some(&body)).await?;
        tracing::debug!(sha = %created.sha, entries = entries.len(), "created tree");
        Ok(created.sha)
    }

    async fn get_tree(&self, sha: &Oid) -> Result<Tree, StoreError> {
        let tree: GitHubTree = self.get(&format!("git/trees/{}", sha)).await?;
        let entries = tree
            .tree
            .into_iter()
            .map(|e| TreeEntry {
                path: e.path,
                mode: e.mode,
                kind: e.kind,
                sha: e.sha,
            })
            .collect();
        Ok(Tree {
            sha: tree.sha,
            entries,
        })
    }

    async fn create_commit(&self, commit: NewCommit) -> Result<Oid, StoreError> {
        let body = CreateCommitBody {
            message: &commit.message,
            tree: &commit.tree,
            parents: &commit.parents,
            author: &commit.author,
            committer: commit.committer.as_ref(),
        };
        let created: ShaOnly = self.call(Method::POST, "git/commits", Some(&body)).await?;
        tracing::debug!(sha = %created.sha, tree = %commit.tree, "created commit");
        Ok(created.sha)
    }

    async fn get_commit(&self, sha: &Oid) -> Result<Commit, StoreError> {
        let commit: GitHubCommit = self.get(&format!("git/commits/{}", sha)).await?;
        Ok(commit.into())
    }

    async fn get_reference(&self, name: &RefName) -> Result<Oid, StoreError> {
        let reference: GitHubRef = self.get(&format!("git/ref/{}", ref_path(name))).await?;
        Ok(reference.object.sha)
    }

    async fn update_reference(
        &self,
        name: &RefName,
        new: &Oid,
        expected: &Oid,
    ) -> Result<(), StoreError> {
        let current = self.get_reference(name).await?;
        if &current != expected {
            return Err(StoreError::RefMismatch {
                refname: name.clone(),
                expected: expected.clone(),
                actual: Some(current),
            });
        }

        let body = UpdateRefBody {
            sha: new,
            force: false,
        };
        let result: Result<GitHubRef, StoreError> = self
            .call(
                Method::PATCH,
                &format!("git/refs/{}", ref_path(name)),
                Some(&body),
            )
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(refname = %name, new = %new, "updated ref");
                Ok(())
            }
            // The ref moved after our read.
            Err(StoreError::ApiError {
                status: 422,
                ref message,
            }) if is_not_fast_forward(message) => Err(StoreError::RefMismatch {
                refname: name.clone(),
                expected: expected.clone(),
                actual: None,
            }),
            Err(e) => Err(e),
        }
    }
}

/// Ref name as a URL path below `git/ref/` or `git/refs/`.
///
/// Each component is percent-encoded; `#` and `%` are legal in ref
/// names but would otherwise change which URL is requested.
fn ref_path(name: &RefName) -> String {
    name.api_path()
        .split('/')
        .map(|component| urlencoding::encode(component).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a 422 from the refs endpoint is GitHub refusing a non-fast-forward.
fn is_not_fast_forward(message: &str) -> bool {
    message.to_lowercase().contains("not a fast forward")
}

// --------------------------------------------------------------------------
// API Request/Response Types
// --------------------------------------------------------------------------

#[derive(Serialize)]
struct CreateBlobBody {
    content: String,
    encoding: &'static str,
}

#[derive(Serialize)]
struct CreateTreeBody<'a> {
    tree: Vec<GitHubTreeEntryBody<'a>>,
}

#[derive(Serialize)]
struct GitHubTreeEntryBody<'a> {
    path: &'a str,
    mode: EntryMode,
    #[serde(rename = "type")]
    kind: ObjectKind,
    sha: &'a Oid,
}

impl<'a> From<&'a TreeEntry> for GitHubTreeEntryBody<'a> {
    fn from(entry: &'a TreeEntry) -> Self {
        Self {
            path: &entry.path,
            mode: entry.mode,
            kind: entry.kind,
            sha: &entry.sha,
        }
    }
}

#[derive(Serialize)]
struct CreateCommitBody<'a> {
    message: &'a str,
    tree: &'a Oid,
    parents: &'a [Oid],
    author: &'a Signature,
    #[serde(skip_serializing_if = "Option::is_none")]
    committer: Option<&'a Signature>,
}

#[derive(Serialize)]
struct UpdateRefBody<'a> {
    sha: &'a Oid,
    force: bool,
}

/// GitHub error response format.
#[derive(Deserialize)]
struct GitHubErrorResponse {
    message: String,
}

/// Any creation response; only the id is needed.
#[derive(Deserialize)]
struct ShaOnly {
    sha: Oid,
}

#[derive(Deserialize)]
struct GitHubBlob {
    content: String,
    encoding: String,
}

#[derive(Deserialize)]
struct GitHubTree {
    sha: Oid,
    tree: Vec<GitHubTreeEntry>,
}

#[derive(Deserialize)]
struct GitHubTreeEntry {
    path: String,
    mode: EntryMode,
    #[serde(rename = "type")]
    kind: ObjectKind,
    sha: Oid,
}

#[derive(Deserialize)]
struct GitHubCommit {
    sha: Oid,
    tree: ShaOnly,
    parents: Vec<ShaOnly>,
    message: String,
    author: Signature,
    committer: Signature,
}

impl From<GitHubCommit> for Commit {
    fn from(c: GitHubCommit) -> Self {
        Commit {
            sha: c.sha,
            tree: c.tree.sha,
            parents: c.parents.into_iter().map(|p| p.sha).collect(),
            message: c.message,
            author: c.author,
            committer: c.committer,
        }
    }
}

#[derive(Deserialize)]
struct GitHubRef {
    object: ShaOnly,
}

// --------------------------------------------------------------------------
// URL Parsing
// --------------------------------------------------------------------------

/// Parse a GitHub remote URL to extract owner and repo.
///
/// Supports both SSH and HTTPS formats:
/// - `git@github.com:owner/repo.git`
/// - `https://github.com/owner/repo.git`
/// - `https://github.com/owner/repo`
///
/// ```
/// use remote_cherry_pick::store::github::parse_github_url;
///
/// let (owner, repo) = parse_github_url("git@github.com:octocat/hello-world.git").unwrap();
/// assert_eq!(owner, "octocat");
/// assert_eq!(repo, "hello-world");
/// ```
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let rest = url
        .strip_prefix("git@github.com:")
        .or_else(|| url.strip_prefix("https://github.com/"))
        .or_else(|| url.strip_prefix("http://github.com/"))?;
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let (owner, repo) = rest.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
