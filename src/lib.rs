//! Routinely Core — the coordinated task-completion recording engine.
//!
//! This crate is the correctness kernel of the surrounding routine-tracking
//! product: it accepts "mark this task done" requests from kiosks, tablets,
//! and phones and records each one durably, exactly once, under concurrent
//! and duplicate submission. The web CRUD surface, visibility rules, goal
//! aggregation, and notifications live elsewhere and only consume this
//! crate's storage and read API.

pub mod completion;
pub mod config;
pub mod error;
pub mod model;
pub mod observability;
pub mod storage;

pub use completion::{CompleteRequest, CompletionEngine, CompletionOutcome};
pub use config::EngineConfig;
pub use error::CompletionError;
pub use storage::Storage;
