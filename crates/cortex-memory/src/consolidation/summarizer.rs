//! Rolling summarizer
//!
//! Keeps exactly one active summary per conversation. Each invocation either
//! no-ops, extends the active summary in place, or archives it and starts a
//! new episode when the topic has drifted.
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::consolidation::master_memory::{EvidenceRequest, MasterMemoryEngine, UpsertRequest};
use crate::consolidation::scoring::MeaningfulTurnClassifier;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::Message;
use crate::memory_db::{
    vector, Actor, Bucket, Event, MemoryDatabase, NewSummary, Stability, SummaryMetadata,
    SummaryUpdate, ThreadSummary,
};
use crate::metrics;
use crate::services::{CompletionOptions, CompletionService, EmbeddingService};
use crate::utils::TextUtils;

const SUMMARY_SYSTEM_PROMPT: &str = "You are maintaining a long-term memory summary for an assistant.\n\
Update the summary using ONLY the new turns.\n\n\
Hard rules:\n\
- Output ONLY the updated summary (no preface, no title).\n\
- Use 3-7 short bullet points.\n\
- Include ONLY: durable user facts, explicit decisions, stated constraints, concrete plans/commitments, and key open questions.\n\
- Treat assistant messages as NOT durable unless they record a decision made by the user.\n\
- Do NOT include generic conversational goals unless the user explicitly stated it as an ongoing plan.\n\
- Do NOT infer future intentions, next steps, or goals unless the user explicitly committed to them.\n\
- Do NOT restate examples, filler, greetings, or meta commentary.\n\
- Do NOT invent details.\n\
- Prefer concrete nouns and actions (names, places, tasks, deadlines) over vague summaries.\n";

const EMPTY_SUMMARY: &str = "No durable info yet.";
const SYNC_SOURCE: &str = "auto_summary_wire";
const SYNC_CONFIDENCE: f32 = 0.55;
const SYNC_EXCERPT_CHARS: usize = 220;

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Meaningful turns required before a summary is written.
    pub meaningful_target: usize,
    /// Max events considered after the active range end.
    pub lookback: usize,
    /// Cosine similarity below this between prior and candidate is a topic shift.
    pub topic_shift_cosine_min: f32,
    pub debounce: Duration,
    pub turn_char_cap: usize,
    pub fallback_line_cap: usize,
    pub completion: CompletionOptions,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            meaningful_target: 10,
            lookback: 120,
            topic_shift_cosine_min: 0.75,
            debounce: Duration::from_secs(180),
            turn_char_cap: 220,
            fallback_line_cap: 260,
            completion: CompletionOptions::new("llama-3.1-8b-instant", 0.2, 350),
        }
    }
}

/// Why a summary row was written; stored in the row metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryReason {
    Init,
    TopicShift,
    RollingUpdate,
    ForcedInit,
    ForcedUpdate,
}

impl SummaryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryReason::Init => "init",
            SummaryReason::TopicShift => "topic_shift",
            SummaryReason::RollingUpdate => "rolling_update",
            SummaryReason::ForcedInit => "forced_init",
            SummaryReason::ForcedUpdate => "forced_update",
        }
    }

    fn forced(&self) -> bool {
        matches!(self, SummaryReason::ForcedInit | SummaryReason::ForcedUpdate)
    }
}

/// A user event and the first assistant event after it.
#[derive(Debug, Clone)]
struct Turn<'a> {
    user: &'a Event,
    assistant: Option<&'a Event>,
}

impl Turn<'_> {
    fn assistant_text(&self) -> &str {
        self.assistant.map(|e| e.content.as_str()).unwrap_or_default()
    }

    fn end_event_id(&self) -> &str {
        self.assistant.unwrap_or(self.user).id.as_str()
    }
}

fn pair_turns(events: &[Event]) -> Vec<Turn<'_>> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.actor == Actor::User)
        .map(|(i, user)| Turn {
            user,
            assistant: events[i + 1..].iter().find(|e| e.actor == Actor::Assistant),
        })
        .collect()
}

pub struct RollingSummarizer {
    db: Arc<MemoryDatabase>,
    embedder: Arc<dyn EmbeddingService>,
    completion: Arc<dyn CompletionService>,
    classifier: MeaningfulTurnClassifier,
    master: Arc<MasterMemoryEngine>,
    config: SummarizerConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RollingSummarizer {
    pub fn new(
        db: Arc<MemoryDatabase>,
        embedder: Arc<dyn EmbeddingService>,
        completion: Arc<dyn CompletionService>,
        classifier: MeaningfulTurnClassifier,
        master: Arc<MasterMemoryEngine>,
        config: SummarizerConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            completion,
            classifier,
            master,
            config,
            locks: DashMap::new(),
        }
    }

    fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Drops the map entry once no other task holds or waits on the lock.
    fn release_lock(&self, conversation_id: &str, lock: Arc<Mutex<()>>) {
        self.locks
            .remove_if(conversation_id, |_, held| Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2);
    }

    /// Re-evaluate the conversation after an assistant event. Returns true
    /// when a summary row was written.
    pub async fn maybe_update_summary(&self, conversation_id: &str) -> MemoryResult<bool> {
        let lock = self.conversation_lock(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.update_locked(conversation_id).await
        };
        self.release_lock(conversation_id, lock);
        result
    }

    async fn update_locked(&self, conversation_id: &str) -> MemoryResult<bool> {
        let active = self
            .db
            .summaries
            .get_active(conversation_id)
            .map_err(MemoryError::store)?;

        if let Some(summary) = &active {
            if self.within_debounce(summary) {
                debug!("Summary for {} written recently; debounced", conversation_id);
                return Ok(false);
            }
        }

        let events = self.pending_events(conversation_id, active.as_ref())?;
        let turns: Vec<Turn<'_>> = pair_turns(&events)
            .into_iter()
            .filter(|t| self.classifier.is_meaningful(&t.user.content, t.assistant_text()))
            .take(self.config.meaningful_target)
            .collect();

        if turns.len() < self.config.meaningful_target {
            debug!(
                "Conversation {} has {}/{} meaningful turns; waiting",
                conversation_id,
                turns.len(),
                self.config.meaningful_target
            );
            return Ok(false);
        }

        let lines = self.render_turns(&turns);
        let prior_text = active.as_ref().map(|s| s.summary_text.as_str());
        let candidate = self.generate_summary(prior_text, &lines).await;

        let inserted = match active {
            None => {
                let summary = self.new_summary(&turns, candidate, SummaryReason::Init).await;
                self.insert_initial(conversation_id, summary, SummaryReason::Init)?
            }
            Some(prior) => {
                let candidate_vec = self.embed_quietly(&candidate).await;
                if self.topic_shifted(&prior, candidate_vec.as_deref()).await {
                    let episode = self.generate_summary(None, &lines).await;
                    let summary = self.new_summary(&turns, episode, SummaryReason::TopicShift).await;
                    self.archive_and_insert(conversation_id, &prior, summary)?
                } else {
                    // In-place updates leave the master reference alone.
                    return self.update_in_place(
                        &prior,
                        &turns,
                        candidate,
                        candidate_vec,
                        SummaryReason::RollingUpdate,
                    );
                }
            }
        };

        if inserted {
            self.sync_master(conversation_id).await;
        }
        Ok(inserted)
    }

    /// User-triggered summarization. Skips the debounce and the target
    /// threshold, never archives.
    pub async fn force_update_summary(&self, conversation_id: &str) -> MemoryResult<bool> {
        let lock = self.conversation_lock(conversation_id);
        let result = {
            let _guard = lock.lock().await;
            self.force_locked(conversation_id).await
        };
        self.release_lock(conversation_id, lock);
        result
    }

    async fn force_locked(&self, conversation_id: &str) -> MemoryResult<bool> {
        let active = self
            .db
            .summaries
            .get_active(conversation_id)
            .map_err(MemoryError::store)?;
        let events = self.pending_events(conversation_id, active.as_ref())?;
        let all_turns = pair_turns(&events);
        let meaningful: Vec<Turn<'_>> = all_turns
            .iter()
            .filter(|t| self.classifier.is_meaningful(&t.user.content, t.assistant_text()))
            .cloned()
            .collect();
        let source = if meaningful.is_empty() { all_turns } else { meaningful };
        let turns: Vec<Turn<'_>> = source.into_iter().take(self.config.meaningful_target).collect();

        if turns.is_empty() {
            debug!("No new turns to force-summarize in {}", conversation_id);
            self.sync_master(conversation_id).await;
            return Ok(false);
        }

        let lines = self.render_turns(&turns);
        let candidate = self
            .generate_summary(active.as_ref().map(|s| s.summary_text.as_str()), &lines)
            .await;

        let written = match active {
            None => {
                let summary = self.new_summary(&turns, candidate, SummaryReason::ForcedInit).await;
                self.insert_initial(conversation_id, summary, SummaryReason::ForcedInit)?
            }
            Some(prior) => {
                let embedding = self.embed_quietly(&candidate).await;
                self.update_in_place(&prior, &turns, candidate, embedding, SummaryReason::ForcedUpdate)?
            }
        };

        self.sync_master(conversation_id).await;
        Ok(written)
    }

    /// A summary with no recorded write time is never debounced.
    fn within_debounce(&self, summary: &ThreadSummary) -> bool {
        let Some(last_write) = summary.metadata.last_summary_write_at else {
            return false;
        };
        match (Utc::now() - last_write).to_std() {
            Ok(age) => age < self.config.debounce,
            // Timestamp in the future; treat as fresh.
            Err(_) => true,
        }
    }

    fn pending_events(
        &self,
        conversation_id: &str,
        active: Option<&ThreadSummary>,
    ) -> MemoryResult<Vec<Event>> {
        let after = active.and_then(|s| s.range_end_event_id.as_deref());
        self.db
            .conversations
            .events_after(conversation_id, after, self.config.lookback)
            .map_err(MemoryError::store)
    }

    fn render_turns(&self, turns: &[Turn<'_>]) -> Vec<String> {
        let cap = self.config.turn_char_cap;
        let side = |text: &str| TextUtils::clip(&TextUtils::compact_line(text), cap).into_owned();
        turns
            .iter()
            .map(|t| {
                let user = side(&t.user.content);
                match t.assistant {
                    Some(a) => format!("USER: {} | ASSISTANT: {}", user, side(&a.content)),
                    None => format!("USER: {}", user),
                }
            })
            .collect()
    }

    async fn generate_summary(&self, prior: Option<&str>, lines: &[String]) -> String {
        let prior = prior.map(str::trim).filter(|p| !p.is_empty());
        let mut payload = String::new();
        if let Some(prior) = prior {
            payload.push_str("PRIOR SUMMARY:\n");
            payload.push_str(prior);
            payload.push_str("\n\n");
        }
        payload.push_str("NEW TURNS:\n");
        payload.push_str(
            &lines
                .iter()
                .map(|l| format!("- {}", l))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let messages = [Message::system(SUMMARY_SYSTEM_PROMPT), Message::user(payload)];
        match self.completion.complete(&messages, &self.config.completion).await {
            Ok(out) if !out.trim().is_empty() => out.trim().to_string(),
            Ok(_) => prior.unwrap_or(EMPTY_SUMMARY).to_string(),
            Err(e) => {
                warn!("Summary completion failed, using text fallback: {:#}", e);
                self.fallback_summary(prior, lines)
            }
        }
    }

    fn fallback_summary(&self, prior: Option<&str>, lines: &[String]) -> String {
        let bullets = lines
            .iter()
            .map(|l| format!("- {}", TextUtils::clip(l, self.config.fallback_line_cap)))
            .collect::<Vec<_>>()
            .join("\n");
        match prior {
            Some(prior) => format!("{}\n\nNew info:\n{}", prior.trim_end(), bullets),
            None => format!("Summary so far:\n{}", bullets),
        }
    }

    async fn embed_quietly(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Summary embedding failed: {:#}", e);
                None
            }
        }
    }

    /// Compares against the prior text embedded now; the stored vector may
    /// predate the last in-place update. Any missing or incomparable vector
    /// means no shift.
    async fn topic_shifted(&self, prior: &ThreadSummary, candidate: Option<&[f32]>) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        let Some(prior_vec) = self.embed_quietly(&prior.summary_text).await else {
            return false;
        };
        let Some(similarity) = vector::cosine_similarity(&prior_vec, candidate) else {
            warn!(
                "Summary {} vector ({} dims) not comparable with candidate ({} dims); keeping topic",
                prior.id,
                prior_vec.len(),
                candidate.len()
            );
            return false;
        };
        debug!(
            "Topic similarity for summary {}: {:.3} (min {:.3})",
            prior.id, similarity, self.config.topic_shift_cosine_min
        );
        similarity < self.config.topic_shift_cosine_min
    }

    fn metadata(&self, reason: SummaryReason, turns: usize) -> SummaryMetadata {
        SummaryMetadata {
            last_summary_write_at: Some(Utc::now()),
            reason: Some(reason.as_str().to_string()),
            meaningful_turns: Some(turns),
            forced: reason.forced(),
        }
    }

    async fn new_summary(&self, turns: &[Turn<'_>], text: String, reason: SummaryReason) -> NewSummary {
        let embedding = self.embed_quietly(&text).await;
        NewSummary {
            range_start_event_id: turns.first().map(|t| t.user.id.clone()),
            range_end_event_id: turns.last().map(|t| t.end_event_id().to_string()),
            summary_text: text,
            embedding,
            metadata: self.metadata(reason, turns.len()),
        }
    }

    fn insert_initial(
        &self,
        conversation_id: &str,
        summary: NewSummary,
        reason: SummaryReason,
    ) -> MemoryResult<bool> {
        let inserted = self
            .db
            .summaries
            .insert_initial(conversation_id, summary)
            .map_err(MemoryError::store)?;
        Ok(self.record_write(conversation_id, inserted.map(|s| s.id), reason))
    }

    fn archive_and_insert(
        &self,
        conversation_id: &str,
        prior: &ThreadSummary,
        summary: NewSummary,
    ) -> MemoryResult<bool> {
        let inserted = self
            .db
            .summaries
            .archive_and_insert(conversation_id, &prior.id, summary)
            .map_err(MemoryError::store)?;
        Ok(self.record_write(conversation_id, inserted.map(|s| s.id), SummaryReason::TopicShift))
    }

    fn update_in_place(
        &self,
        prior: &ThreadSummary,
        turns: &[Turn<'_>],
        text: String,
        embedding: Option<Vec<f32>>,
        reason: SummaryReason,
    ) -> MemoryResult<bool> {
        let updated = self
            .db
            .summaries
            .update_active(
                &prior.id,
                prior.revision,
                SummaryUpdate {
                    summary_text: text,
                    range_end_event_id: turns.last().map(|t| t.end_event_id().to_string()),
                    embedding,
                    metadata: self.metadata(reason, turns.len()),
                },
            )
            .map_err(MemoryError::store)?;
        let id = updated.then(|| prior.id.clone());
        Ok(self.record_write(&prior.conversation_id, id, reason))
    }

    fn record_write(&self, conversation_id: &str, summary_id: Option<String>, reason: SummaryReason) -> bool {
        match summary_id {
            Some(id) => {
                info!(
                    conversation_id = %conversation_id,
                    summary_id = %id,
                    reason = reason.as_str(),
                    "Summary written"
                );
                metrics::inc_summary_write(reason.as_str());
                true
            }
            None => {
                debug!("Summary write for {} lost a race; skipped", conversation_id);
                false
            }
        }
    }

    /// Reinforce the per-conversation LONG_RUNNING_CONTEXT item that points
    /// at the active summary. Failures are logged only.
    async fn sync_master(&self, conversation_id: &str) {
        if let Err(e) = self.try_sync_master(conversation_id).await {
            warn!("Master-memory sync failed for {}: {}", conversation_id, e);
        }
    }

    async fn try_sync_master(&self, conversation_id: &str) -> MemoryResult<()> {
        let Some(conversation) = self
            .db
            .conversations
            .get_conversation(conversation_id)
            .map_err(MemoryError::store)?
        else {
            return Ok(());
        };
        let Some(summary) = self
            .db
            .summaries
            .get_active(conversation_id)
            .map_err(MemoryError::store)?
        else {
            return Ok(());
        };

        let excerpt = TextUtils::clip(&TextUtils::compact_line(&summary.summary_text), SYNC_EXCERPT_CHARS)
            .into_owned();
        let outcome = self
            .master
            .upsert(
                UpsertRequest::new(
                    conversation.owner_id,
                    Bucket::LongRunningContext,
                    format!("Thread summary reference ({})", conversation_id),
                )
                .confidence(SYNC_CONFIDENCE)
                .stability(Stability::Med)
                .embed(false)
                .metadata(serde_json::json!({
                    "source": SYNC_SOURCE,
                    "summary_id": summary.id,
                    "summary_excerpt": excerpt,
                })),
            )
            .await?;
        self.master.add_evidence(EvidenceRequest {
            master_item_id: outcome.id,
            conversation_id: Some(conversation_id.to_string()),
            summary_id: Some(summary.id),
            weight: Some(1.0),
            metadata: Some(serde_json::json!({ "source": SYNC_SOURCE })),
            ..Default::default()
        })?;
        Ok(())
    }
}
