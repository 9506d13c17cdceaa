//! Memory consolidation: scoring, rolling summaries, master memory and the
//! side-effect runner that ties them to the scheduler.
pub mod extractor;
pub mod heuristics;
pub mod master_memory;
pub mod runner;
pub mod scoring;
pub mod summarizer;

pub use extractor::{ExtractionReport, ExtractionWorker, ExtractorConfig};
pub use heuristics::Heuristics;
pub use master_memory::{EvidenceRequest, MasterMemoryEngine, UpsertRequest};
pub use runner::ConsolidationRunner;
pub use scoring::{ImportanceScorer, MeaningfulTurnClassifier, DURABLE_SCORE};
pub use summarizer::{RollingSummarizer, SummarizerConfig, SummaryReason};
