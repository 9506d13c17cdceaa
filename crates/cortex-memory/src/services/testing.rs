//! Deterministic collaborators for tests.
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::memory::Message;
use crate::services::{CompletionOptions, CompletionService, EmbeddingService};

const TOPICS: &[&[&str]] = &[
    &["rust", "cargo", "crate", "compiler", "borrow", "trait", "tokio"],
    &["garden", "tomato", "soil", "seed", "plant", "compost", "basil"],
    &["coffee", "espresso", "roast", "bean", "grinder"],
    &["travel", "flight", "hotel", "trip", "lisbon", "passport"],
];

/// Bag-of-topic-keywords embedder: texts about the same topic are close.
#[derive(Default)]
pub struct StubEmbedder {
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = TOPICS
            .iter()
            .map(|words| words.iter().map(|w| lower.matches(w).count() as f32).sum())
            .collect();
        v.push(0.01);
        v
    }
}

#[async_trait]
impl EmbeddingService for StubEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("embedding backend unreachable"));
        }
        Ok(Self::vector_for(text))
    }
}

/// Returns queued replies first; otherwise echoes the `NEW TURNS:` section
/// of the last message, or "Okay." when there is none.
#[derive(Default)]
pub struct StubCompletion {
    replies: Mutex<VecDeque<String>>,
    fail: AtomicBool,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl StubCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let stub = Self::default();
        stub.set_failing(true);
        stub
    }

    pub fn with_replies(replies: &[&str]) -> Self {
        let stub = Self::default();
        for reply in replies {
            stub.push_reply(reply);
        }
        stub
    }

    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(reply.to_string());
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for StubCompletion {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("completion backend unreachable"));
        }
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        match last.find("NEW TURNS:") {
            Some(idx) => Ok(last[idx + "NEW TURNS:".len()..].trim().to_string()),
            None => Ok("Okay.".to_string()),
        }
    }
}
