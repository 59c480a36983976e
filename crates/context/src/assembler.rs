//! Context window assembly. Blends the memory tiers and the message log
//! into one budgeted payload.
//!
//! Stages, in strict priority order:
//!
//! 1. **System prompt**: always included, never trimmed
//! 2. **Working memory**: all-or-nothing, always counted in full
//! 3. **Long-term recall**: greedy by rank inside a reserved share of what is left
//! 4. **Recent messages**: newest first until the budget runs out, oldest dropped
//!
//! `tokens_used` is advisory: stages 1 and 2 are never dropped, so it can
//! exceed `token_budget` when those alone are too large.
//!
//! # Determinism
//!
//! Given the same store contents, assembly is deterministic. The only side
//! effect is the access notification for each included memory, which goes
//! to the background touch queue and never blocks or fails assembly.

use recallkit_config::{AppConfig, ContextConfig};
use recallkit_core::cache::EphemeralCache;
use recallkit_core::error::MemoryError;
use recallkit_core::memory::{MemoryStore, MemoryType};
use recallkit_core::message::{ChatMessage, Role};
use recallkit_memory::{
    LongTermMemoryStore, RecallEngine, RecallQuery, TouchQueue, TouchWorker, WorkingMemoryStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::token;

// ── Types ─────────────────────────────────────────────────────────────────

/// All inputs for a single assembly.
#[derive(Debug, Clone)]
pub struct AssemblyRequest<'a> {
    pub agent_id: &'a str,
    pub session_id: &'a str,
    pub system_prompt: Option<&'a str>,
    /// Conversation turns in chronological order.
    pub recent_messages: &'a [ChatMessage],
    /// Recall runs only when an embedding is supplied.
    pub query_embedding: Option<&'a [f32]>,
    /// `None` uses the configured default (8192).
    pub token_budget: Option<usize>,
}

impl<'a> AssemblyRequest<'a> {
    pub fn new(agent_id: &'a str, session_id: &'a str) -> Self {
        Self {
            agent_id,
            session_id,
            system_prompt: None,
            recent_messages: &[],
            query_embedding: None,
            token_budget: None,
        }
    }

    pub fn system_prompt(mut self, prompt: &'a str) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    pub fn messages(mut self, messages: &'a [ChatMessage]) -> Self {
        self.recent_messages = messages;
        self
    }

    pub fn query_embedding(mut self, embedding: &'a [f32]) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    pub fn token_budget(mut self, budget: usize) -> Self {
        self.token_budget = Some(budget);
        self
    }
}

/// A recalled memory as it appears in the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMemory {
    pub content: String,
    pub memory_type: MemoryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// A conversation turn kept in the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    pub token_count: usize,
}

/// Statistics for a single assembly stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStats {
    /// Layer name.
    pub name: String,
    /// Tokens consumed by this layer.
    pub tokens: usize,
    /// Items included after budget trimming.
    pub items_included: usize,
    /// Items available before trimming.
    pub items_total: usize,
}

/// The assembled payload for one model turn. Built fresh per call, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub system_prompt: Option<String>,
    pub memories: Vec<ContextMemory>,
    pub working_memory: BTreeMap<String, String>,
    /// Chronological order.
    pub messages: Vec<ContextMessage>,
    pub token_budget: usize,
    pub tokens_used: usize,
    /// Per-stage accounting: system, working_memory, long_term_memory, messages.
    pub layers: Vec<LayerStats>,
}

impl ContextWindow {
    /// Tokens consumed by the included messages.
    pub fn message_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.token_count).sum()
    }

    /// System prompt followed by the memory sections, for providers that take
    /// a single system string.
    pub fn render_system_message(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Some(prompt) = &self.system_prompt {
            sections.push(prompt.clone());
        }

        if !self.memories.is_empty() {
            let mut out = String::from("[Long-Term Memory]\n");
            for m in &self.memories {
                out.push_str(&format!("- {}\n", m.content));
            }
            sections.push(out.trim_end().to_string());
        }

        if !self.working_memory.is_empty() {
            sections.push(format!(
                "[Working Memory]\n{}",
                render_working_memory(&self.working_memory)
            ));
        }

        sections.join("\n\n")
    }
}

/// `key: value` lines, in key order.
fn render_working_memory(entries: &BTreeMap<String, String>) -> String {
    entries
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless per request; create one and share it.
#[derive(Clone)]
pub struct ContextAssembler {
    working: WorkingMemoryStore,
    recall: RecallEngine,
    touches: TouchQueue,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(working: WorkingMemoryStore, recall: RecallEngine, touches: TouchQueue) -> Self {
        Self {
            working,
            recall,
            touches,
            config: ContextConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Wire an assembler and its touch worker from configuration.
    ///
    /// Must be called inside a tokio runtime. The returned handle resolves
    /// once the assembler (and every clone of it) is dropped.
    pub fn from_config(
        cache: Arc<dyn EphemeralCache>,
        store: Arc<dyn MemoryStore>,
        config: &AppConfig,
    ) -> (Self, JoinHandle<usize>) {
        let working = WorkingMemoryStore::from_config(cache, &config.working_memory);
        let recall = RecallEngine::from_config(Arc::clone(&store), &config.recall);
        let long_term = LongTermMemoryStore::from_config(store, &config.database);
        let (touches, worker) = TouchWorker::spawn(long_term, config.context.touch_queue_capacity);

        let assembler = Self::new(working, recall, touches).with_config(config.context.clone());
        (assembler, worker)
    }

    /// Assemble a context window.
    ///
    /// Fails only with the error of a required dependency (working memory
    /// or the recall fallback path).
    pub async fn assemble(
        &self,
        request: &AssemblyRequest<'_>,
    ) -> Result<ContextWindow, MemoryError> {
        let budget = request
            .token_budget
            .unwrap_or(self.config.default_token_budget);
        let mut layers: Vec<LayerStats> = Vec::with_capacity(4);

        // ── Stage 1: System prompt (always included, never trimmed) ────────
        let system_tokens = request.system_prompt.map_or(0, token::estimate_tokens);
        let system_items = usize::from(request.system_prompt.is_some());
        layers.push(LayerStats {
            name: "system".into(),
            tokens: system_tokens,
            items_included: system_items,
            items_total: system_items,
        });
        let mut used = system_tokens;

        // ── Stage 2: Working memory (all or nothing, always counted) ───────
        let working_memory = self
            .working
            .get_all(request.agent_id, request.session_id)
            .await?;
        let wm_tokens = token::estimate_tokens(&render_working_memory(&working_memory));
        layers.push(LayerStats {
            name: "working_memory".into(),
            tokens: wm_tokens,
            items_included: working_memory.len(),
            items_total: working_memory.len(),
        });
        used += wm_tokens;

        // ── Stage 3: Long-term recall ──────────────────────────────────────
        let (memories, recall_stats) = match request.query_embedding {
            Some(embedding) => {
                let sub_budget = self.recall_budget(budget.saturating_sub(used));
                self.recall_layer(request.agent_id, embedding, sub_budget).await?
            }
            None => (Vec::new(), Self::empty_stats("long_term_memory")),
        };
        used += recall_stats.tokens;
        layers.push(recall_stats);

        // ── Stage 4: Recent messages (newest kept, oldest dropped) ─────────
        let (messages, history_stats) =
            Self::history_layer(request.recent_messages, budget.saturating_sub(used));
        used += history_stats.tokens;
        layers.push(history_stats);

        debug!(
            agent_id = %request.agent_id,
            session_id = %request.session_id,
            budget,
            tokens_used = used,
            memories = memories.len(),
            working_memory = working_memory.len(),
            messages = messages.len(),
            "Assembled context window"
        );

        Ok(ContextWindow {
            system_prompt: request.system_prompt.map(String::from),
            memories,
            working_memory,
            messages,
            token_budget: budget,
            tokens_used: used,
            layers,
        })
    }

    /// The recall share of whatever budget remains after stages 1 and 2.
    fn recall_budget(&self, remaining: usize) -> usize {
        (remaining as f64 * f64::from(self.config.recall_budget_share)).floor() as usize
    }

    // ── Private layer builders ────────────────────────────────────────────

    async fn recall_layer(
        &self,
        agent_id: &str,
        embedding: &[f32],
        sub_budget: usize,
    ) -> Result<(Vec<ContextMemory>, LayerStats), MemoryError> {
        let query = RecallQuery::new(agent_id, embedding)
            .limit(self.config.recall_limit)
            .threshold(self.config.recall_threshold);
        let candidates = self.recall.search(&query).await?;
        let total = candidates.len();

        let mut used = 0;
        let mut included = Vec::new();
        for candidate in candidates {
            let cost = token::estimate_tokens(&candidate.memory.content);
            if used + cost > sub_budget {
                break;
            }
            used += cost;
            self.touches.notify(&candidate.memory.id);
            included.push(ContextMemory {
                content: candidate.memory.content,
                memory_type: candidate.memory.memory_type,
                similarity: Some(candidate.similarity),
            });
        }

        let stats = LayerStats {
            name: "long_term_memory".into(),
            tokens: used,
            items_included: included.len(),
            items_total: total,
        };
        Ok((included, stats))
    }

    fn history_layer(messages: &[ChatMessage], budget: usize) -> (Vec<ContextMessage>, LayerStats) {
        let mut used = 0;
        let mut kept = Vec::new();

        for message in messages.iter().rev() {
            let cost = token::estimate_message_tokens(message);
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(ContextMessage {
                role: message.role,
                content: message.content.clone(),
                token_count: cost,
            });
        }
        kept.reverse();

        let stats = LayerStats {
            name: "messages".into(),
            tokens: used,
            items_included: kept.len(),
            items_total: messages.len(),
        };
        (kept, stats)
    }

    fn empty_stats(name: &str) -> LayerStats {
        LayerStats {
            name: name.into(),
            tokens: 0,
            items_included: 0,
            items_total: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recallkit_core::memory::NewMemory;
    use recallkit_memory::{InMemoryCache, InMemoryStore};

    struct Harness {
        assembler: ContextAssembler,
        working: WorkingMemoryStore,
        long_term: LongTermMemoryStore,
    }

    fn harness() -> Harness {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let working = WorkingMemoryStore::new(Arc::new(InMemoryCache::new()));
        let long_term = LongTermMemoryStore::new(Arc::clone(&store));
        let assembler = ContextAssembler::new(
            working.clone(),
            RecallEngine::new(store),
            TouchQueue::detached(),
        );
        Harness {
            assembler,
            working,
            long_term,
        }
    }

    fn turns(n: usize, chars: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                let body = format!("{i:03}{}", "x".repeat(chars - 3));
                if i % 2 == 0 {
                    ChatMessage::user(body)
                } else {
                    ChatMessage::assistant(body)
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn tight_budget_keeps_newest_messages_in_order() {
        let h = harness();
        let messages = turns(50, 80); // 20 tokens each

        let window = h
            .assembler
            .assemble(
                &AssemblyRequest::new("agent", "s1")
                    .system_prompt("SYS")
                    .messages(&messages)
                    .token_budget(100),
            )
            .await
            .unwrap();

        // SYS = 1 token, 99 left → 4 messages of 20
        assert_eq!(window.messages.len(), 4);
        assert!(window.message_tokens() <= 100);
        let expected: Vec<&str> = messages[46..].iter().map(|m| m.content.as_str()).collect();
        let got: Vec<&str> = window.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(got, expected);
        assert_eq!(window.tokens_used, 81);
        assert_eq!(window.system_prompt.as_deref(), Some("SYS"));
    }

    #[tokio::test]
    async fn default_budget_applies() {
        let h = harness();
        let window = h
            .assembler
            .assemble(&AssemblyRequest::new("agent", "s1"))
            .await
            .unwrap();
        assert_eq!(window.token_budget, 8192);
        assert_eq!(window.tokens_used, 0);
        assert!(window.system_prompt.is_none());
    }

    #[tokio::test]
    async fn system_prompt_is_never_trimmed() {
        let h = harness();
        let prompt = "p".repeat(400); // 100 tokens
        let messages = turns(3, 8);

        let window = h
            .assembler
            .assemble(
                &AssemblyRequest::new("agent", "s1")
                    .system_prompt(&prompt)
                    .messages(&messages)
                    .token_budget(10),
            )
            .await
            .unwrap();

        assert_eq!(window.system_prompt.as_deref(), Some(prompt.as_str()));
        assert!(window.messages.is_empty());
        assert_eq!(window.tokens_used, 100);
        assert!(window.tokens_used > window.token_budget);
    }

    #[tokio::test]
    async fn working_memory_counted_in_full_even_when_over_budget() {
        let h = harness();
        h.working
            .set("agent", "s1", "active_tool", &"t".repeat(200), None)
            .await
            .unwrap();
        h.working.set("agent", "s1", "step", "3", None).await.unwrap();

        let window = h
            .assembler
            .assemble(&AssemblyRequest::new("agent", "s1").token_budget(20))
            .await
            .unwrap();

        assert_eq!(window.working_memory.len(), 2);
        let rendered = render_working_memory(&window.working_memory);
        assert_eq!(rendered, format!("active_tool: {}\nstep: 3", "t".repeat(200)));
        assert_eq!(window.tokens_used, token::estimate_tokens(&rendered));
        assert!(window.tokens_used > 20);
    }

    #[tokio::test]
    async fn recall_skipped_without_embedding() {
        let h = harness();
        h.long_term
            .store(NewMemory::new("agent", "owner", "likes tea").with_embedding(vec![1.0, 0.0]))
            .await
            .unwrap();

        let window = h
            .assembler
            .assemble(&AssemblyRequest::new("agent", "s1"))
            .await
            .unwrap();
        assert!(window.memories.is_empty());
    }

    #[tokio::test]
    async fn recall_caps_at_five_and_threshold() {
        let h = harness();
        for i in 0..8 {
            h.long_term
                .store(
                    NewMemory::new("agent", "owner", format!("fact {i}"))
                        .with_embedding(vec![1.0, i as f32 * 0.01]),
                )
                .await
                .unwrap();
        }
        h.long_term
            .store(NewMemory::new("agent", "owner", "unrelated").with_embedding(vec![0.0, 1.0]))
            .await
            .unwrap();

        let window = h
            .assembler
            .assemble(
                &AssemblyRequest::new("agent", "s1")
                    .query_embedding(&[1.0, 0.0])
                    .token_budget(10_000),
            )
            .await
            .unwrap();

        assert_eq!(window.memories.len(), 5);
        assert!(window.memories.iter().all(|m| m.similarity.unwrap() >= 0.7));
        assert!(window.memories.iter().all(|m| m.content != "unrelated"));
        assert_eq!(window.memories[0].content, "fact 0");
    }

    #[tokio::test]
    async fn recall_stops_at_first_memory_that_does_not_fit() {
        let h = harness();
        // Highest rank: 40 tokens. Second: 200 tokens. Third: 1 token.
        h.long_term
            .store(NewMemory::new("agent", "o", "a".repeat(160)).with_embedding(vec![1.0, 0.0]))
            .await
            .unwrap();
        h.long_term
            .store(NewMemory::new("agent", "o", "b".repeat(800)).with_embedding(vec![1.0, 0.1]))
            .await
            .unwrap();
        h.long_term
            .store(NewMemory::new("agent", "o", "c").with_embedding(vec![1.0, 0.2]))
            .await
            .unwrap();

        // 1000 budget → 150 token recall share
        let window = h
            .assembler
            .assemble(
                &AssemblyRequest::new("agent", "s1")
                    .query_embedding(&[1.0, 0.0])
                    .token_budget(1000),
            )
            .await
            .unwrap();

        assert_eq!(window.memories.len(), 1);
        assert_eq!(window.memories[0].content, "a".repeat(160));
        let recall = &window.layers[2];
        assert_eq!(recall.name, "long_term_memory");
        assert_eq!(recall.tokens, 40);
        assert_eq!(recall.items_total, 3);
    }

    #[tokio::test]
    async fn recall_share_is_taken_after_working_memory() {
        let h = harness();
        // "k: " + 397 = 400 chars = 100 tokens
        h.working
            .set("agent", "s1", "k", &"w".repeat(397), None)
            .await
            .unwrap();
        // 16 tokens
        h.long_term
            .store(NewMemory::new("agent", "o", "m".repeat(64)).with_embedding(vec![1.0, 0.0]))
            .await
            .unwrap();

        // 200 - 100 = 100 remaining → 15 token share: the 16-token memory does not fit.
        let window = h
            .assembler
            .assemble(
                &AssemblyRequest::new("agent", "s1")
                    .query_embedding(&[1.0, 0.0])
                    .token_budget(200),
            )
            .await
            .unwrap();
        assert!(window.memories.is_empty());

        // 220 - 100 = 120 remaining → 18 token share: it fits.
        let window = h
            .assembler
            .assemble(
                &AssemblyRequest::new("agent", "s1")
                    .query_embedding(&[1.0, 0.0])
                    .token_budget(220),
            )
            .await
            .unwrap();
        assert_eq!(window.memories.len(), 1);
    }

    #[tokio::test]
    async fn render_system_message_orders_sections() {
        let window = ContextWindow {
            system_prompt: Some("You are helpful.".into()),
            memories: vec![ContextMemory {
                content: "user prefers dark mode".into(),
                memory_type: MemoryType::Semantic,
                similarity: Some(1.0),
            }],
            working_memory: BTreeMap::from([("tool".to_string(), "search".to_string())]),
            messages: vec![],
            token_budget: 100,
            tokens_used: 0,
            layers: vec![],
        };

        assert_eq!(
            window.render_system_message(),
            concat!(
                "You are helpful.\n\n",
                "[Long-Term Memory]\n- user prefers dark mode\n\n",
                "[Working Memory]\ntool: search"
            )
        );
    }
}
