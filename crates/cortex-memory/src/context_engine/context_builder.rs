//! Builds the ordered context for a reply from durable and recent memory.
//!
//! Block order is fixed: active summary, long-term memory, reaction
//! signals, then raw history. The assembler only reads from the store.
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::consolidation::MasterMemoryEngine;
use crate::context_engine::{RetrievalPlan, RetrievalPlanner};
use crate::error::{MemoryError, MemoryResult};
use crate::memory::Message;
use crate::memory_db::{
    ActiveSummaryReader, Actor, ItemStatus, MasterItem, MemoryDatabase, ReactionKind,
    ReactionSignal, ThreadSummary, MAX_EVENT_CHARS,
};
use crate::utils::TextUtils;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub messages: Vec<Message>,
    /// A `summarize` reaction on this conversation is newer than the active
    /// summary; the caller should schedule a forced summary.
    pub force_summary_requested: bool,
}

pub struct ContextAssembler {
    db: Arc<MemoryDatabase>,
    summaries: Arc<dyn ActiveSummaryReader>,
    master: Arc<MasterMemoryEngine>,
    planner: RetrievalPlanner,
}

impl ContextAssembler {
    pub fn new(
        db: Arc<MemoryDatabase>,
        summaries: Arc<dyn ActiveSummaryReader>,
        master: Arc<MasterMemoryEngine>,
        planner: RetrievalPlanner,
    ) -> Self {
        Self {
            db,
            summaries,
            master,
            planner,
        }
    }

    pub async fn build(
        &self,
        conversation_id: &str,
        latest_message: &str,
        reaction_owner: Option<&str>,
        history_limit: Option<usize>,
    ) -> MemoryResult<AssembledContext> {
        let conversation = self
            .db
            .conversations
            .get_conversation(conversation_id)
            .map_err(MemoryError::store)?
            .ok_or_else(|| MemoryError::not_found("conversation", conversation_id))?;

        let reaction_owner = reaction_owner.map(str::trim).filter(|o| !o.is_empty());
        let plan = self
            .planner
            .create_plan(latest_message, reaction_owner.is_some(), history_limit);

        let active = self
            .summaries
            .active_summary(conversation_id)
            .map_err(MemoryError::store)?;

        let mut context = AssembledContext::default();

        if plan.include_summary {
            if let Some(summary) = &active {
                context
                    .messages
                    .push(Message::system(format!("Active summary:\n{}", summary.summary_text)));
            }
        }

        if plan.include_memories {
            let items = self.fetch_memories(&conversation.owner_id, latest_message).await?;
            if !items.is_empty() {
                context.messages.push(Message::system(render_memories(&items)));
            }
        }

        if let (true, Some(owner)) = (plan.include_reactions, reaction_owner) {
            let signals = self
                .db
                .conversations
                .recent_reactions(owner, self.planner.config().reaction_limit)
                .map_err(MemoryError::store)?;
            if !signals.is_empty() {
                context
                    .messages
                    .push(Message::system(self.render_reactions(&signals)));
            }
            context.force_summary_requested =
                summary_requested(conversation_id, &signals, active.as_ref());
        }

        self.append_history(conversation_id, &plan, &mut context.messages)?;

        info!(
            conversation_id = %conversation_id,
            lines = context.messages.len(),
            force_summary = context.force_summary_requested,
            "Assembled reply context"
        );
        Ok(context)
    }

    /// Semantic hits first; list fallback when embedding fails or nothing matches.
    async fn fetch_memories(&self, owner_id: &str, query: &str) -> MemoryResult<Vec<MasterItem>> {
        let k = self.planner.config().memory_k;
        match self
            .master
            .search_semantic(owner_id, query, None, ItemStatus::Active, k)
            .await
        {
            Ok(hits) if !hits.is_empty() => {
                return Ok(hits.into_iter().map(|h| h.item).collect());
            }
            Ok(_) => debug!("No semantic memory hits for {}; using top items", owner_id),
            Err(MemoryError::StoreUnavailable(e)) => return Err(MemoryError::StoreUnavailable(e)),
            Err(e) => warn!("Semantic memory search unavailable, using top items: {}", e),
        }
        self.master.list(owner_id, None, ItemStatus::Active, k)
    }

    fn render_reactions(&self, signals: &[ReactionSignal]) -> String {
        let cap = self.planner.config().reaction_excerpt_chars;
        let mut block = String::from("User reaction signals:");
        for signal in signals {
            let label = match signal.reaction {
                ReactionKind::Like => "liked",
                ReactionKind::Dislike => "disliked",
                ReactionKind::Summarize => "requested a summary after",
            };
            let excerpt = TextUtils::clip(&TextUtils::compact_line(&signal.event_excerpt), cap).into_owned();
            block.push_str(&format!("\n- {}: \"{}\"", label, excerpt));
        }
        block
    }

    fn append_history(
        &self,
        conversation_id: &str,
        plan: &RetrievalPlan,
        messages: &mut Vec<Message>,
    ) -> MemoryResult<()> {
        let events = self
            .db
            .conversations
            .recent_events(conversation_id, plan.history_limit)
            .map_err(MemoryError::store)?;
        messages.extend(events.into_iter().map(|event| {
            let content = TextUtils::truncate_chars(&event.content, MAX_EVENT_CHARS).to_string();
            match event.actor {
                Actor::User => Message::user(content),
                Actor::Assistant => Message::assistant(content),
            }
        }));
        Ok(())
    }
}

fn render_memories(items: &[MasterItem]) -> String {
    let mut block = String::from("Relevant long-term memory:");
    for item in items {
        block.push_str(&format!("\n- [{}] {}", item.bucket, TextUtils::compact_line(&item.text)));
    }
    block
}

fn summary_requested(
    conversation_id: &str,
    signals: &[ReactionSignal],
    active: Option<&ThreadSummary>,
) -> bool {
    let last_write = active.map(|s| s.metadata.last_summary_write_at.unwrap_or(s.updated_at));
    signals.iter().any(|s| {
        s.reaction == ReactionKind::Summarize
            && s.conversation_id == conversation_id
            && last_write.map_or(true, |written| s.updated_at > written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::{Heuristics, UpsertRequest};
    use crate::context_engine::ContextConfig;
    use crate::memory_db::{Bucket, EventParams, NewSummary, SummaryMetadata};
    use crate::services::testing::StubEmbedder;

    struct Harness {
        db: Arc<MemoryDatabase>,
        embedder: Arc<StubEmbedder>,
        master: Arc<MasterMemoryEngine>,
        assembler: ContextAssembler,
        conversation_id: String,
    }

    fn harness() -> Harness {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let embedder = Arc::new(StubEmbedder::new());
        let master = Arc::new(MasterMemoryEngine::new(db.clone(), embedder.clone()));
        let planner = RetrievalPlanner::new(&Heuristics::default(), ContextConfig::default()).unwrap();
        let assembler = ContextAssembler::new(db.clone(), db.clone(), master.clone(), planner);
        let conversation_id = db.conversations.create_conversation("owner-1", None).unwrap().id;
        Harness {
            db,
            embedder,
            master,
            assembler,
            conversation_id,
        }
    }

    fn push(h: &Harness, actor: Actor, content: &str) -> String {
        h.db
            .conversations
            .insert_event(EventParams {
                conversation_id: &h.conversation_id,
                actor,
                content,
                metadata: &serde_json::json!({}),
                importance_score: 0,
                embedding: None,
            })
            .unwrap()
            .id
    }

    fn seed_summary(h: &Harness, text: &str) {
        h.db.summaries
            .insert_initial(
                &h.conversation_id,
                NewSummary {
                    summary_text: text.to_string(),
                    range_start_event_id: None,
                    range_end_event_id: None,
                    embedding: None,
                    metadata: SummaryMetadata {
                        last_summary_write_at: Some(chrono::Utc::now()),
                        reason: Some("init".into()),
                        ..Default::default()
                    },
                },
            )
            .unwrap()
            .unwrap();
    }

    async fn seed_memory(h: &Harness, bucket: Bucket, text: &str, confidence: f32) {
        h.master
            .upsert(UpsertRequest::new("owner-1", bucket, text).confidence(confidence))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_plain_message_gets_history_only() {
        let h = harness();
        seed_summary(&h, "- talked about rust");
        push(&h, Actor::User, "hello");
        push(&h, Actor::Assistant, "hi there");

        let ctx = h
            .assembler
            .build(&h.conversation_id, "tell me a joke", None, None)
            .await
            .unwrap();
        assert_eq!(
            ctx.messages,
            vec![Message::user("hello"), Message::assistant("hi there")]
        );
        assert!(!ctx.force_summary_requested);
    }

    #[tokio::test]
    async fn test_block_order_with_both_cues() {
        let h = harness();
        seed_summary(&h, "- building a rust crate");
        seed_memory(&h, Bucket::Profile, "Name is Ada", 0.9).await;
        push(&h, Actor::User, "earlier message");

        let ctx = h
            .assembler
            .build(&h.conversation_id, "recap please, and remember my name?", None, Some(10))
            .await
            .unwrap();
        assert_eq!(ctx.messages.len(), 3);
        assert_eq!(ctx.messages[0].role, "system");
        assert_eq!(ctx.messages[0].content, "Active summary:\n- building a rust crate");
        assert_eq!(ctx.messages[1].content, "Relevant long-term memory:\n- [PROFILE] Name is Ada");
        assert_eq!(ctx.messages[2], Message::user("earlier message"));
    }

    #[tokio::test]
    async fn test_recap_only_excludes_memory_block() {
        let h = harness();
        seed_summary(&h, "- planning the tomato beds");
        seed_memory(&h, Bucket::Profile, "Name is Ada", 0.9).await;
        seed_memory(&h, Bucket::Projects, "Garden layout planner", 0.8).await;
        push(&h, Actor::User, "earlier message");

        let ctx = h
            .assembler
            .build(&h.conversation_id, "Can you recap?", None, None)
            .await
            .unwrap();
        assert_eq!(
            ctx.messages,
            vec![
                Message::system("Active summary:\n- planning the tomato beds"),
                Message::user("earlier message"),
            ]
        );
        assert!(!ctx
            .messages
            .iter()
            .any(|m| m.content.starts_with("Relevant long-term memory:")));
        assert_eq!(h.embedder.calls(), 2);
    }

    #[tokio::test]
    async fn test_recap_without_summary_adds_nothing() {
        let h = harness();
        push(&h, Actor::User, "first");
        let ctx = h
            .assembler
            .build(&h.conversation_id, "where were we?", None, None)
            .await
            .unwrap();
        assert_eq!(ctx.messages, vec![Message::user("first")]);
    }

    #[tokio::test]
    async fn test_memory_block_prefers_semantic_hits() {
        let h = harness();
        seed_memory(&h, Bucket::Preferences, "Loves espresso", 0.6).await;
        seed_memory(&h, Bucket::Projects, "Rust compiler side project", 0.95).await;

        let ctx = h
            .assembler
            .build(&h.conversation_id, "do you remember my coffee order?", None, None)
            .await
            .unwrap();
        let block = &ctx.messages[0].content;
        let espresso = block.find("Loves espresso").unwrap();
        let rust = block.find("Rust compiler").unwrap();
        assert!(espresso < rust);
    }

    #[tokio::test]
    async fn test_memory_block_falls_back_to_top_items() {
        let h = harness();
        seed_memory(&h, Bucket::Preferences, "Loves espresso", 0.6).await;
        seed_memory(&h, Bucket::Projects, "Rust compiler side project", 0.95).await;
        h.embedder.set_failing(true);

        let ctx = h
            .assembler
            .build(&h.conversation_id, "do you remember my coffee order?", None, None)
            .await
            .unwrap();
        assert_eq!(
            ctx.messages[0].content,
            "Relevant long-term memory:\n- [PROJECTS] Rust compiler side project\n- [PREFERENCES] Loves espresso"
        );
    }

    #[tokio::test]
    async fn test_reactions_block_and_force_flag() {
        let h = harness();
        push(&h, Actor::User, "explain lifetimes");
        let liked = push(&h, Actor::Assistant, "Lifetimes name how long a borrow is valid.");
        let asked = push(&h, Actor::Assistant, "Here is a longer walkthrough.");
        h.db.conversations
            .set_reaction(&liked, "owner-1", Some(ReactionKind::Like))
            .unwrap();
        h.db.conversations
            .set_reaction(&asked, "owner-1", Some(ReactionKind::Summarize))
            .unwrap();

        let ctx = h
            .assembler
            .build(&h.conversation_id, "thanks", Some("owner-1"), None)
            .await
            .unwrap();
        assert!(ctx.force_summary_requested);
        let block = &ctx.messages[0].content;
        assert!(block.starts_with("User reaction signals:"));
        assert!(block.contains("- requested a summary after: \"Here is a longer walkthrough.\""));
        assert!(block.contains("- liked: \"Lifetimes name how long a borrow is valid.\""));
        assert_eq!(ctx.messages.len(), 4);

        // A summary written after the reaction settles the request.
        seed_summary(&h, "- lifetimes");
        let ctx = h
            .assembler
            .build(&h.conversation_id, "thanks", Some("owner-1"), None)
            .await
            .unwrap();
        assert!(!ctx.force_summary_requested);
    }

    #[tokio::test]
    async fn test_assembly_is_read_only() {
        let h = harness();
        seed_memory(&h, Bucket::Profile, "Name is Ada", 0.9).await;
        push(&h, Actor::User, "hi");
        let before = h.db.get_stats().unwrap();
        h.assembler
            .build(&h.conversation_id, "who am I? recap", Some("owner-1"), None)
            .await
            .unwrap();
        let after = h.db.get_stats().unwrap();
        assert_eq!(before.total_events, after.total_events);
        assert_eq!(before.total_summaries, after.total_summaries);
        assert_eq!(before.total_master_items, after.total_master_items);
        assert_eq!(before.total_evidence, after.total_evidence);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let h = harness();
        let err = h.assembler.build("missing", "hi", None, None).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
