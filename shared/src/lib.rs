//! Shared types for the terminal sync stack
//!
//! Common types used by the sync engine and its consumers: business-entity
//! models, the terminal ↔ cloud sync wire protocol, and utility helpers.

pub mod models;
pub mod sync;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Sync protocol re-exports (for convenient access)
pub use sync::{EntityKind, MutationRequest, Operation, PullBatch, PushOutcome, RemoteChange};
