//! # memflow
//!
//! A document ingestion pipeline. Uploaded files flow through a sequence
//! of named steps, each implemented by a [`handlers::StepHandler`]:
//!
//! ## Architecture
//!
//! ```text
//! UploadRequest ──▶ Orchestrator::prepare_new_upload ──▶ DataPipelineResult
//!                                                              │
//!      ┌───────────────────────────────────────────────────────┘
//!      ▼
//! ┌────────────┐   ┌───────────┐   ┌────────────┐   ┌──────────────┐
//! │ extraction │──▶│ chunking  │──▶│ embeddings │──▶│ save-records │──▶ MemoryStore
//! │ MarkItDown │   │ simple /  │   │ hash /     │   │              │
//! │ plain text │   │ semantic  │   │ OpenAI /   │   │              │
//! └────────────┘   └───────────┘   │ Ollama     │   └──────────────┘
//!                                  └────────────┘
//! ```
//!
//! Steps share one mutable [`DataPipelineResult`](memflow_core::state::DataPipelineResult):
//! an append-only artifact list plus a typed context blackboard.
//!
//! ## Quick Start
//!
//! ```bash
//! memflow --config ./memflow.toml upload --index notes --tag team=docs guide.md
//! memflow chunk --semantic guide.md
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`extract`] | Text extraction collaborators |
//! | [`embedding`] | HTTP embedding generators |
//! | [`handlers`] | Step handler contract, registry and built-in steps |
//! | [`orchestrator`] | Upload preparation and step sequencing |
//! | [`upload`] | Upload request builder |
//! | [`logging`] | Tracing subscriber setup |
//!
//! Data models, chunking engines and the storage trait live in the
//! `memflow-core` crate.

pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod logging;
pub mod orchestrator;
pub mod upload;

pub use error::{PipelineError, PipelineRunError};
pub use orchestrator::Orchestrator;
pub use upload::{UploadRequest, UploadRequestBuilder};
