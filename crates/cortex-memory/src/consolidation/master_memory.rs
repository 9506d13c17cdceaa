//! Master-memory engine: validated upserts with store-level dedup,
//! reinforcement, evidence provenance and retrieval.
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MemoryError, MemoryResult};
use crate::memory_db::{
    Bucket, ItemStatus, MasterItem, MasterUpsert, MemoryDatabase, NewEvidence,
    ScoredMasterItem, Stability, UpsertOutcome,
};
use crate::metrics;
use crate::services::EmbeddingService;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 200;
pub const DEFAULT_SEARCH_K: usize = 8;
pub const MAX_SEARCH_K: usize = 50;
pub const MIN_EVIDENCE_WEIGHT: f32 = 0.01;

/// One observed claim about an owner.
#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub owner_id: String,
    pub bucket: Bucket,
    pub text: String,
    pub status: ItemStatus,
    pub stability: Stability,
    pub confidence: f32,
    /// Compute and store an embedding for the text.
    pub embed: bool,
    pub metadata: serde_json::Value,
}

impl UpsertRequest {
    pub fn new(owner_id: impl Into<String>, bucket: Bucket, text: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            bucket,
            text: text.into(),
            status: ItemStatus::Active,
            stability: Stability::Med,
            confidence: 0.5,
            embed: true,
            metadata: serde_json::json!({}),
        }
    }

    /// Build from untyped input; unknown enum values are validation errors.
    pub fn from_strs(
        owner_id: &str,
        bucket: &str,
        text: &str,
        status: &str,
        stability: &str,
        confidence: f32,
    ) -> MemoryResult<Self> {
        Ok(Self {
            status: status.parse()?,
            stability: stability.parse()?,
            confidence,
            ..Self::new(owner_id, bucket.parse()?, text)
        })
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn stability(mut self, stability: Stability) -> Self {
        self.stability = stability;
        self
    }

    pub fn embed(mut self, embed: bool) -> Self {
        self.embed = embed;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvidenceRequest {
    pub master_item_id: String,
    pub conversation_id: Option<String>,
    pub event_id: Option<String>,
    pub summary_id: Option<String>,
    /// Defaults to 1.0.
    pub weight: Option<f32>,
    pub metadata: Option<serde_json::Value>,
}

pub struct MasterMemoryEngine {
    db: Arc<MemoryDatabase>,
    embedder: Arc<dyn EmbeddingService>,
}

impl MasterMemoryEngine {
    pub fn new(db: Arc<MemoryDatabase>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self { db, embedder }
    }

    /// Insert or reinforce. An embedding failure stores the claim text-only
    /// and never clears a vector already on the row.
    pub async fn upsert(&self, request: UpsertRequest) -> MemoryResult<UpsertOutcome> {
        let owner_id = request.owner_id.trim();
        if owner_id.is_empty() {
            return Err(MemoryError::validation("owner_id is required"));
        }
        let text = request.text.trim();
        if text.is_empty() {
            return Err(MemoryError::validation("text is required"));
        }
        if !request.confidence.is_finite() {
            return Err(MemoryError::validation("confidence must be a finite number"));
        }
        let metadata = match request.metadata {
            serde_json::Value::Object(_) => request.metadata,
            serde_json::Value::Null => serde_json::json!({}),
            _ => return Err(MemoryError::validation("metadata must be a JSON object")),
        };

        let embedding = if request.embed {
            match self.embedder.embed(text).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!("Master item embedding failed; storing without embedding: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let outcome = self
            .db
            .master
            .upsert(&MasterUpsert {
                owner_id: owner_id.to_string(),
                bucket: request.bucket,
                text: text.to_string(),
                status: request.status,
                stability: request.stability,
                confidence: request.confidence.clamp(0.0, 1.0),
                embedding,
                metadata,
            })
            .map_err(MemoryError::store)?;

        metrics::inc_master_upsert(if outcome.created() { "created" } else { "reinforced" });
        Ok(outcome)
    }

    pub fn add_evidence(&self, request: EvidenceRequest) -> MemoryResult<String> {
        if request.master_item_id.trim().is_empty() {
            return Err(MemoryError::validation("master_item_id is required"));
        }
        let pointer = |p: Option<String>| p.filter(|v| !v.trim().is_empty());
        let conversation_id = pointer(request.conversation_id);
        let event_id = pointer(request.event_id);
        let summary_id = pointer(request.summary_id);
        if conversation_id.is_none() && event_id.is_none() && summary_id.is_none() {
            return Err(MemoryError::validation(
                "evidence needs a conversation_id, event_id or summary_id",
            ));
        }

        if self
            .db
            .master
            .get(&request.master_item_id)
            .map_err(MemoryError::store)?
            .is_none()
        {
            return Err(MemoryError::not_found("master_item", request.master_item_id));
        }

        let weight = match request.weight {
            Some(w) if w.is_finite() => w.max(MIN_EVIDENCE_WEIGHT),
            _ => 1.0,
        };
        let evidence = self
            .db
            .master
            .add_evidence(&NewEvidence {
                master_item_id: request.master_item_id,
                conversation_id,
                event_id,
                summary_id,
                weight,
                metadata: request.metadata.unwrap_or_else(|| serde_json::json!({})),
            })
            .map_err(MemoryError::store)?;
        debug!("Recorded evidence {} for master item {}", evidence.id, evidence.master_item_id);
        Ok(evidence.id)
    }

    /// Ordered by confidence, reinforcement, then recency. `limit` is clamped to 1..=200.
    pub fn list(
        &self,
        owner_id: &str,
        bucket: Option<Bucket>,
        status: ItemStatus,
        limit: usize,
    ) -> MemoryResult<Vec<MasterItem>> {
        if owner_id.trim().is_empty() {
            return Err(MemoryError::validation("owner_id is required"));
        }
        self.db
            .master
            .list(owner_id, bucket, Some(status), limit.clamp(1, MAX_LIST_LIMIT))
            .map_err(MemoryError::store)
    }

    /// Embedding failure here is surfaced, not degraded.
    pub async fn search_semantic(
        &self,
        owner_id: &str,
        query_text: &str,
        bucket: Option<Bucket>,
        status: ItemStatus,
        k: usize,
    ) -> MemoryResult<Vec<ScoredMasterItem>> {
        if owner_id.trim().is_empty() {
            return Err(MemoryError::validation("owner_id is required"));
        }
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(MemoryError::validation("query text is required"));
        }
        let query = self
            .embedder
            .embed(query_text)
            .await
            .map_err(MemoryError::embedding)?;
        self.db
            .master
            .search_by_vector(owner_id, &query, bucket, Some(status), k.clamp(1, MAX_SEARCH_K))
            .map_err(MemoryError::store)
    }
}
