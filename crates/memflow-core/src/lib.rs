//! # memflow core
//!
//! Shared, I/O-free logic for memflow: the pipeline state threaded through
//! a run, the artifact and record models, both chunking engines, and the
//! embedding and storage collaborator traits.
//!
//! This crate contains no tokio runtime, HTTP clients, or filesystem I/O.
//! Everything here is deterministic except identifier and timestamp
//! generation.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod state;
pub mod store;
