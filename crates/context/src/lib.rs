//! Budgeted context window assembly for Recallkit.
//!
//! Blends the system prompt, session working memory, recalled long-term
//! memories and the recent message log into one payload under a token
//! budget.
//!
//! # Stages (in priority order)
//!
//! | Stage | Source | Trim Strategy |
//! |-------|--------|---------------|
//! | 1. System | Caller | Never trimmed |
//! | 2. Working Memory | Ephemeral cache | Never trimmed, always counted |
//! | 3. Long-Term Memory | Recall engine | 15% share, greedy by rank |
//! | 4. Messages | Caller | Oldest turns dropped |

pub mod assembler;
pub mod token;

pub use assembler::{
    AssemblyRequest, ContextAssembler, ContextMemory, ContextMessage, ContextWindow, LayerStats,
};
