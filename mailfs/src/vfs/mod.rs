//! VFS layer (virtual filesystem)
//!
//! Responsibilities:
//! - Mirror the namespace in memory and fill it lazily from the mail store.
//! - Implement path-addressed POSIX-style calls on top of the remote mapping
//!   and write-back layers.
//!
//! Submodules:
//! - `tree`: arena of nodes, path resolution
//! - `fs`: the filesystem facade
//! - `ops`: tagged request/reply enums for a dispatch layer
//! - `sdk`: whole-file client helpers
//! - `demo`: end-to-end demo over the directory-backed store
pub mod demo;
pub mod fs;
pub mod ops;
pub mod sdk;
pub mod tree;
