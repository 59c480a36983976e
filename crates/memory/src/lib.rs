//! Memory tiers for Recallkit.
//!
//! - [`working`]: per-session scratch state over an
//!   [`EphemeralCache`](recallkit_core::EphemeralCache)
//! - [`long_term`]: owner-scoped durable records over a
//!   [`MemoryStore`](recallkit_core::MemoryStore)
//! - [`recall`]: similarity recall with a native and an in-process path
//! - [`touch`]: background access tracking

pub mod cache;
pub mod in_memory;
pub mod long_term;
pub mod recall;
pub mod touch;
pub mod vector;
pub mod working;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use cache::InMemoryCache;
pub use in_memory::InMemoryStore;
pub use long_term::LongTermMemoryStore;
pub use recall::{RecallEngine, RecallQuery};
pub use touch::{TouchQueue, TouchWorker};
pub use vector::{cosine_similarity, decode_vector, encode_vector, rank_by_similarity};
pub use working::WorkingMemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
