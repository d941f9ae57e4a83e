//! core
//!
//! Core domain types and configuration.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchName, Oid, RefName
//! - [`config`] - Configuration schema and loading

pub mod config;
pub mod types;
