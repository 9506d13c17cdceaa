use regex::Regex;
use tracing::debug;

use crate::consolidation::Heuristics;
use crate::context_engine::ContextConfig;

/// Which optional blocks the assembler should fetch for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalPlan {
    /// Recap cue matched; prepend the active summary.
    pub include_summary: bool,
    /// Remembered-fact cue matched; prepend master items.
    pub include_memories: bool,
    /// A reaction-bearing identity was supplied.
    pub include_reactions: bool,
    pub history_limit: usize,
}

/// Lexical cue detection. Each cue set is evaluated independently.
pub struct RetrievalPlanner {
    recap_cue: Regex,
    remember_cue: Regex,
    config: ContextConfig,
}

impl RetrievalPlanner {
    pub fn new(heuristics: &Heuristics, config: ContextConfig) -> anyhow::Result<Self> {
        Ok(Self {
            recap_cue: heuristics.recap_regex()?,
            remember_cue: heuristics.remember_regex()?,
            config,
        })
    }

    pub fn create_plan(
        &self,
        latest_message: &str,
        has_reaction_identity: bool,
        history_limit: Option<usize>,
    ) -> RetrievalPlan {
        let plan = RetrievalPlan {
            include_summary: self.recap_cue.is_match(latest_message),
            include_memories: self.remember_cue.is_match(latest_message),
            include_reactions: has_reaction_identity,
            history_limit: history_limit
                .unwrap_or(self.config.default_history_limit)
                .clamp(1, self.config.max_history_limit),
        };
        debug!(
            "Retrieval plan: summary={}, memories={}, reactions={}, history={}",
            plan.include_summary, plan.include_memories, plan.include_reactions, plan.history_limit
        );
        plan
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }
}
