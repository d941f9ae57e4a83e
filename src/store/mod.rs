//! store
//!
//! Client side of the remote object store.
//!
//! # Architecture
//!
//! The [`ObjectStore`] trait is the engine's only view of the repository:
//! create/read blobs, trees and commits, read a reference, and move a
//! reference with a conditional write. The engine never sees a working copy.
//!
//! # Modules
//!
//! - `traits`: `ObjectStore` trait, object model, `StoreError`
//! - [`github`]: GitHub Git Data API implementation
//! - [`memory`]: in-memory implementation for deterministic testing
//! - `factory`: store creation from configuration

mod factory;
pub mod github;
pub mod memory;
mod traits;

pub use factory::create_store;
pub use traits::*;
