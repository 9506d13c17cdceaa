//! Executes scheduled side effects against the consolidation engines.
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::consolidation::extractor::ExtractionWorker;
use crate::consolidation::master_memory::{EvidenceRequest, MasterMemoryEngine, UpsertRequest};
use crate::consolidation::summarizer::RollingSummarizer;
use crate::memory_db::{Bucket, MemoryDatabase, Stability};
use crate::thread_pool::{SideEffect, SideEffectRunner};

const CAPTURE_SOURCE: &str = "auto_capture";
const CAPTURE_CONFIDENCE: f32 = 0.85;

pub struct ConsolidationRunner {
    db: Arc<MemoryDatabase>,
    summarizer: Arc<RollingSummarizer>,
    extractor: Arc<ExtractionWorker>,
    master: Arc<MasterMemoryEngine>,
}

impl ConsolidationRunner {
    pub fn new(
        db: Arc<MemoryDatabase>,
        summarizer: Arc<RollingSummarizer>,
        extractor: Arc<ExtractionWorker>,
        master: Arc<MasterMemoryEngine>,
    ) -> Self {
        Self {
            db,
            summarizer,
            extractor,
            master,
        }
    }

    async fn capture_project(
        &self,
        owner_id: String,
        conversation_id: String,
        event_id: String,
        text: String,
    ) -> anyhow::Result<()> {
        let outcome = self
            .master
            .upsert(
                UpsertRequest::new(owner_id, Bucket::Projects, text)
                    .confidence(CAPTURE_CONFIDENCE)
                    .stability(Stability::High)
                    .embed(true)
                    .metadata(serde_json::json!({
                        "source": CAPTURE_SOURCE,
                        "conversation_id": conversation_id,
                        "event_id": event_id,
                    })),
            )
            .await?;
        self.master.add_evidence(EvidenceRequest {
            master_item_id: outcome.id.clone(),
            conversation_id: Some(conversation_id.clone()),
            event_id: Some(event_id),
            weight: Some(1.0),
            metadata: Some(serde_json::json!({ "source": CAPTURE_SOURCE })),
            ..Default::default()
        })?;
        if self.db.conversations.mark_promoted(&conversation_id)? {
            info!("Conversation {} promoted to long-running context", conversation_id);
        }
        Ok(())
    }
}

#[async_trait]
impl SideEffectRunner for ConsolidationRunner {
    async fn run(&self, effect: SideEffect) -> anyhow::Result<()> {
        match effect {
            SideEffect::UpdateSummary { conversation_id } => {
                self.summarizer.maybe_update_summary(&conversation_id).await?;
            }
            SideEffect::ForceSummary { conversation_id } => {
                self.summarizer.force_update_summary(&conversation_id).await?;
            }
            SideEffect::ExtractMaster { conversation_id } => {
                self.extractor.extract(&conversation_id).await?;
            }
            SideEffect::CaptureProject {
                owner_id,
                conversation_id,
                event_id,
                text,
            } => {
                self.capture_project(owner_id, conversation_id, event_id, text)
                    .await?;
            }
        }
        Ok(())
    }
}
