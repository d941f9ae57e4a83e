//! engine
//!
//! Cherry-picking against an [`ObjectStore`](crate::store::ObjectStore).
//!
//! # Architecture
//!
//! Three layers, each built on the one below:
//!
//! 1. **merge**: three-way tree merge at path granularity
//! 2. **apply**: one source commit onto one destination tip
//! 3. **cherry_pick**: an ordered list of commits onto a branch, finished
//!    by a single compare-and-swap of the branch reference
//!
//! Nothing here touches a working tree; every read and write goes through
//! the store.
//!
//! # Example
//!
//! ```no_run
//! use remote_cherry_pick::core::types::{Oid, RefName};
//! use remote_cherry_pick::engine::{CherryPickRequest, CherryPicker};
//! use remote_cherry_pick::store::ObjectStore;
//!
//! # async fn run(store: &dyn ObjectStore) -> Result<(), Box<dyn std::error::Error>> {
//! let request = CherryPickRequest::new(
//!     vec![Oid::new("0123456789abcdef0123456789abcdef01234567")?],
//!     RefName::new("refs/heads/release")?,
//! );
//! let new_head = CherryPicker::new(store).cherry_pick(&request).await?;
//! println!("release is now at {}", new_head.short(7));
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod cherry_pick;
pub mod merge;

// Test-only hook for simulating a concurrent writer.
// Available under: cfg(test) for unit tests, or feature = "test_hooks" for integration tests
#[cfg(any(test, feature = "test_hooks"))]
pub mod engine_hooks;

pub use apply::CommitApplier;
pub use cherry_pick::{cherry_pick, CherryPickError, CherryPickRequest, CherryPicker};
pub use merge::{MergeOutcome, TreeMerger};
