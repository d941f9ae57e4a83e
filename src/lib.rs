//! Remote cherry-pick - replay commits onto a branch through a Git object API
//!
//! Cherry-picks are performed entirely against a remote, content-addressed
//! object store (the GitHub Git Data API in production). No local clone or
//! working tree is involved: trees are merged by comparing entry ids, new
//! objects are written through the API, and the branch is moved with a
//! single conditional reference update.
//!
//! # Architecture
//!
//! - [`engine`] - Tree merge, commit application, cherry-pick orchestration
//! - [`store`] - Object store abstraction with GitHub and in-memory backends
//! - [`core`] - Domain types and configuration
//! - [`auth`] - Bearer token providers for the GitHub store
//!
//! # Correctness Invariants
//!
//! 1. The head reference is written at most once per run
//! 2. The write succeeds only if the reference still holds the value read at
//!    the start of the run
//! 3. A failed run never changes the reference
//! 4. Conflicts are reported, never resolved

pub mod auth;
pub mod core;
pub mod engine;
pub mod store;
