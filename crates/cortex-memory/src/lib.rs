// cortex-memory/src/lib.rs

pub mod config;
pub mod consolidation;
pub mod context_engine;
pub mod error;
pub mod memory;
pub mod memory_db;
pub mod memory_service;
pub mod metrics;
pub mod services;
pub mod telemetry;
pub mod thread_pool;
pub mod utils;

// Public API exports
pub use config::Config;
pub use error::{MemoryError, MemoryResult};
pub use memory::Message;
pub use memory_service::{MemoryService, Reply, ServiceOptions};

pub use consolidation::{ImportanceScorer, MasterMemoryEngine, MeaningfulTurnClassifier, RollingSummarizer};
pub use context_engine::{AssembledContext, ContextAssembler};
pub use memory_db::{
    Actor, Bucket, Conversation, Event, ItemStatus, MasterItem, MemoryDatabase, ReactionKind,
    Stability, ThreadSummary,
};
pub use services::{CompletionOptions, CompletionService, EmbeddingService, LlmClient};
pub use thread_pool::{SideEffect, SideEffectScheduler};
