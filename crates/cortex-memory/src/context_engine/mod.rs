//! Context engine - assembles the ordered context lines handed to the
//! completion service for a reply

pub mod context_builder;
pub mod retrieval_planner;

pub use context_builder::{AssembledContext, ContextAssembler};
pub use retrieval_planner::{RetrievalPlan, RetrievalPlanner};

/// Bounds for context assembly.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Raw history lines when the caller gives no limit.
    pub default_history_limit: usize,
    pub max_history_limit: usize,
    /// Master items in the memory block.
    pub memory_k: usize,
    pub reaction_limit: usize,
    /// Reaction excerpts are clipped to this many characters.
    pub reaction_excerpt_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_history_limit: 30,
            max_history_limit: 200,
            memory_k: 5,
            reaction_limit: 8,
            reaction_excerpt_chars: 120,
        }
    }
}
