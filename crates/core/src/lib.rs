//! # Recallkit Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! Recallkit memory and context subsystem. This crate has **no storage
//! dependencies**. It defines the model that the other crates implement
//! against.
//!
//! The durable store ([`MemoryStore`]) and the ephemeral cache
//! ([`EphemeralCache`]) are traits. Callers inject concrete clients; there
//! is no process-wide state.

pub mod cache;
pub mod error;
pub mod memory;
pub mod message;

// Re-export key types at crate root for ergonomics
pub use cache::EphemeralCache;
pub use error::{MemoryError, Result};
pub use memory::{
    LongTermMemory, MemoryFilter, MemoryPage, MemoryStore, MemoryType, NewMemory, RecallResult,
    SimilarityQuery,
};
pub use message::{ChatMessage, Role};
