//! core::types
//!
//! Strong types for the identifiers the engine passes around.
//!
//! # Types
//!
//! - [`Oid`] - Content hash of a blob, tree or commit
//! - [`RefName`] - Fully qualified reference name (`refs/heads/main`)
//! - [`BranchName`] - Short branch name, used to build a [`RefName`]
//!
//! # Validation
//!
//! All three enforce validity at construction time, so a value that made it
//! into the engine is always well-formed and can be embedded in API paths.
//!
//! # Examples
//!
//! ```
//! use remote_cherry_pick::core::types::{BranchName, Oid, RefName};
//!
//! let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
//! let head = RefName::for_branch(&BranchName::new("main").unwrap());
//! assert_eq!(head.api_path(), "heads/main");
//!
//! assert!(Oid::new("not-a-sha").is_err());
//! assert!(RefName::new("refs/heads/a..b").is_err());
//! # let _ = oid;
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),
}

/// Characters git never allows inside a ref name.
const FORBIDDEN_REF_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];

/// Check the rules of `git check-ref-format` shared by branch and ref names.
///
/// Returns a human readable reason on failure; callers wrap it in the
/// matching [`TypeError`] variant.
fn check_ref_format(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("cannot be empty".into());
    }
    if name == "@" {
        return Err("cannot be '@' (reserved)".into());
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err("cannot start or end with '/'".into());
    }
    if name.ends_with('.') {
        return Err("cannot end with '.'".into());
    }
    for bad in ["..", "@{", "//"] {
        if name.contains(bad) {
            return Err(format!("cannot contain '{bad}'"));
        }
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_REF_CHARS.contains(c)) {
        return Err(format!("cannot contain '{c}'"));
    }
    if name.chars().any(|c| c.is_ascii_control()) {
        return Err("cannot contain control characters".into());
    }
    for component in name.split('/') {
        if component.starts_with('.') {
            return Err("path component cannot start with '.'".into());
        }
        if component.ends_with(".lock") {
            return Err("path component cannot end with '.lock'".into());
        }
    }
    Ok(())
}

/// A validated branch name such as `main` or `release/1.2`.
///
/// ```
/// use remote_cherry_pick::core::types::BranchName;
///
/// assert!(BranchName::new("feature/x").is_ok());
/// assert!(BranchName::new("-oops").is_err());
/// assert!(BranchName::new("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.starts_with('-') {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot start with '-'".into(),
            ));
        }
        check_ref_format(&name)
            .map_err(|reason| TypeError::InvalidBranchName(format!("branch name {reason}")))?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A content hash identifying an immutable object (SHA-1 or SHA-256).
///
/// Ids are normalized to lowercase so that equality is textual equality.
/// The engine relies on this: two entries with the same `Oid` are treated
/// as having identical content without reading the content.
///
/// ```
/// use remote_cherry_pick::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(oid.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` unless the string is 40 or 64 hex digits.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid))
    }

    /// Build an id from raw digest bytes.
    pub fn from_digest(bytes: &[u8]) -> Result<Self, TypeError> {
        Self::new(hex::encode(bytes))
    }

    /// Abbreviated form for logs and error messages.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully qualified reference name, always under `refs/`.
///
/// ```
/// use remote_cherry_pick::core::types::RefName;
///
/// let r = RefName::new("refs/heads/release/2.0").unwrap();
/// assert_eq!(r.api_path(), "heads/release/2.0");
/// assert!(RefName::new("heads/main").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// Create a new validated ref name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRefName` if the name is not under `refs/`
    /// or violates git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        check_ref_format(&name)
            .map_err(|reason| TypeError::InvalidRefName(format!("ref name {reason}")))?;
        if !name.starts_with("refs/") || name.len() == "refs/".len() {
            return Err(TypeError::InvalidRefName(format!(
                "'{name}' is not under refs/"
            )));
        }
        Ok(Self(name))
    }

    /// Ref for a branch (`refs/heads/<branch>`).
    pub fn for_branch(branch: &BranchName) -> Self {
        // Branch names are already validated; the prefix keeps them valid.
        Self(format!("refs/heads/{}", branch.as_str()))
    }

    /// The name without the leading `refs/`, as the GitHub refs endpoints expect it.
    pub fn api_path(&self) -> &str {
        &self.0["refs/".len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
