//! LLM-backed extraction of durable user facts into master memory.
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::consolidation::heuristics::Heuristics;
use crate::consolidation::master_memory::{EvidenceRequest, MasterMemoryEngine, UpsertRequest};
use crate::error::{MemoryError, MemoryResult};
use crate::memory::Message;
use crate::memory_db::{Actor, Bucket, Event, MemoryDatabase, Stability};
use crate::services::{CompletionOptions, CompletionService};

const EXTRACTOR_SYSTEM_PROMPT: &str = "You are a memory extractor.\n\
Extract ONLY durable USER facts, constraints, preferences, and explicit plans/commitments.\n\
Return JSON only (no prose).\n\n\
Hard rules:\n\
- ONLY extract from USER lines. Ignore ASSISTANT lines unless the USER explicitly accepts/commits.\n\
- Do NOT store generic self-help or boilerplate tasks (e.g., 'be productive', 'explore hobbies').\n\
- Do NOT store vague goals unless the user clearly states an ongoing objective.\n\
- Prefer specific nouns, names, projects, decisions, constraints, and next actions the user committed to.\n\
- If uncertain, return an empty array [].\n";

const EXTRACTOR_INSTRUCTIONS: &str = "Return a JSON array of objects with keys \
`text` (the fact to remember), `bucket` (PROJECTS, LONG_RUNNING_CONTEXT, PROFILE, GOALS, NEXT_ACTIONS), \
`confidence` (0.0-1.0), and optionally `event_id` (the originating event id). \
Be conservative and only include things the user clearly cares about.";

const SOURCE: &str = "llm_extractor";
const INDEX_KEYS: [&str; 4] = ["event_index", "event_number", "idx", "position"];

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub recent_events: usize,
    pub confidence_floor: f32,
    /// Claims at or above this confidence are embedded.
    pub embed_confidence: f32,
    pub default_bucket: Bucket,
    pub completion: CompletionOptions,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            recent_events: 8,
            confidence_floor: 0.80,
            embed_confidence: 0.90,
            default_bucket: Bucket::Projects,
            completion: CompletionOptions::new("llama-3.1-8b-instant", 0.2, 400),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    /// Claims returned by the model.
    pub candidates: usize,
    /// Master item ids written or reinforced.
    pub stored: Vec<String>,
    pub rejected: usize,
}

/// A claim that passed the filters.
#[derive(Debug, Clone, PartialEq)]
struct AcceptedClaim {
    text: String,
    bucket: Bucket,
    confidence: f32,
    event_id: Option<String>,
}

pub struct ExtractionWorker {
    db: Arc<MemoryDatabase>,
    completion: Arc<dyn CompletionService>,
    master: Arc<MasterMemoryEngine>,
    heuristics: Arc<Heuristics>,
    config: ExtractorConfig,
}

impl ExtractionWorker {
    pub fn new(
        db: Arc<MemoryDatabase>,
        completion: Arc<dyn CompletionService>,
        master: Arc<MasterMemoryEngine>,
        heuristics: Arc<Heuristics>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            db,
            completion,
            master,
            heuristics,
            config,
        }
    }

    pub async fn extract(&self, conversation_id: &str) -> MemoryResult<ExtractionReport> {
        let conversation = self
            .db
            .conversations
            .get_conversation(conversation_id)
            .map_err(MemoryError::store)?
            .ok_or_else(|| MemoryError::not_found("conversation", conversation_id))?;
        let events = self
            .db
            .conversations
            .recent_events(conversation_id, self.config.recent_events)
            .map_err(MemoryError::store)?;

        let Some(prompt) = build_prompt(&events) else {
            debug!("No user lines to extract from in {}", conversation_id);
            return Ok(ExtractionReport::default());
        };
        let messages = [
            Message::system(EXTRACTOR_SYSTEM_PROMPT),
            Message::user(format!("{}\n\n{}", EXTRACTOR_INSTRUCTIONS, prompt)),
        ];
        let raw = match self.completion.complete(&messages, &self.config.completion).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Extraction completion failed for {}: {:#}", conversation_id, e);
                return Ok(ExtractionReport::default());
            }
        };

        let claims = parse_claims(&raw);
        let mut report = ExtractionReport {
            candidates: claims.len(),
            ..Default::default()
        };

        for claim in &claims {
            let Some(accepted) = self.accept(claim, &events) else {
                report.rejected += 1;
                continue;
            };
            match self.persist(&conversation.owner_id, conversation_id, accepted).await {
                Ok(id) => report.stored.push(id),
                Err(e) => {
                    warn!("Failed to store extracted claim for {}: {}", conversation_id, e);
                    report.rejected += 1;
                }
            }
        }

        info!(
            conversation_id = %conversation_id,
            candidates = report.candidates,
            stored = report.stored.len(),
            "Master-memory extraction finished"
        );
        Ok(report)
    }

    fn accept(&self, claim: &Value, events: &[Event]) -> Option<AcceptedClaim> {
        let text = claim.get("text").and_then(Value::as_str)?.trim();
        if text.is_empty() || self.heuristics.is_denylisted(text) {
            return None;
        }

        let bucket = match claim.get("bucket").and_then(Value::as_str).map(str::trim) {
            None | Some("") => self.config.default_bucket,
            Some(raw) => match raw.parse() {
                Ok(bucket) => bucket,
                Err(e) => {
                    debug!("Dropping claim with {}", e);
                    return None;
                }
            },
        };

        let confidence = claim.get("confidence").and_then(as_number).unwrap_or(0.0);
        if !confidence.is_finite() {
            return None;
        }
        let confidence = confidence.clamp(0.0, 1.0) as f32;
        if confidence < self.config.confidence_floor {
            return None;
        }

        Some(AcceptedClaim {
            text: text.to_string(),
            bucket,
            confidence,
            event_id: resolve_event_id(claim, events),
        })
    }

    async fn persist(
        &self,
        owner_id: &str,
        conversation_id: &str,
        claim: AcceptedClaim,
    ) -> MemoryResult<String> {
        let outcome = self
            .master
            .upsert(
                UpsertRequest::new(owner_id, claim.bucket, claim.text)
                    .confidence(claim.confidence)
                    .stability(Stability::Med)
                    .embed(claim.confidence >= self.config.embed_confidence)
                    .metadata(serde_json::json!({
                        "source": SOURCE,
                        "conversation_id": conversation_id,
                        "event_id": claim.event_id,
                    })),
            )
            .await?;
        self.master.add_evidence(EvidenceRequest {
            master_item_id: outcome.id.clone(),
            conversation_id: Some(conversation_id.to_string()),
            event_id: claim.event_id,
            weight: Some(1.0),
            metadata: Some(serde_json::json!({ "source": SOURCE })),
            ..Default::default()
        })?;
        Ok(outcome.id)
    }
}

/// Numbered user lines; the number is the 1-based position among all events.
fn build_prompt(events: &[Event]) -> Option<String> {
    let lines: Vec<String> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.actor == Actor::User && !e.content.trim().is_empty())
        .map(|(i, e)| format!("{}. USER: {}", i + 1, e.content.trim()))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(format!("Events:\n{}", lines.join("\n")))
    }
}

/// Whole-text JSON first, then the outermost `[...]` slice.
fn parse_claims(raw: &str) -> Vec<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let parsed = serde_json::from_str::<Value>(raw).ok().or_else(|| {
        let start = raw.find('[')?;
        let end = raw.rfind(']')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<Value>(&raw[start..=end]).ok()
    });
    match parsed {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut map)) => match map.remove("claims") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => {
            debug!("Extractor response was not a claim list");
            Vec::new()
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn resolve_event_id(claim: &Value, events: &[Event]) -> Option<String> {
    if let Some(raw) = claim.get("event_id").and_then(Value::as_str) {
        if let Ok(id) = Uuid::parse_str(raw.trim()) {
            return Some(id.to_string());
        }
    }
    INDEX_KEYS.iter().find_map(|key| {
        let index = match claim.get(*key)? {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
                s.parse().ok()?
            }
            _ => return None,
        };
        let index = usize::try_from(index).ok()?;
        if (1..=events.len()).contains(&index) {
            Some(events[index - 1].id.clone())
        } else {
            None
        }
    })
}
