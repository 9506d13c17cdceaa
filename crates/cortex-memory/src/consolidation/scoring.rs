//! Rule-based importance scoring and meaningful-turn classification.
use std::sync::Arc;

use crate::consolidation::heuristics::{contains_any, Heuristics};
use crate::memory_db::Actor;

/// Events scoring at least this much are embedded and mined for master facts.
pub const DURABLE_SCORE: u8 = 5;

/// Rates how durable a single event's content is: 0, 1, 3 or 5.
#[derive(Debug, Clone)]
pub struct ImportanceScorer {
    heuristics: Arc<Heuristics>,
}

impl ImportanceScorer {
    pub fn new(heuristics: Arc<Heuristics>) -> Self {
        Self { heuristics }
    }

    pub fn score(&self, actor: Actor, content: &str) -> u8 {
        if actor != Actor::User {
            return 0;
        }
        let h = &self.heuristics;
        if h.is_trivial(content) {
            return 0;
        }
        let lower = content.to_lowercase();
        if contains_any(&lower, &h.identity_phrases) {
            5
        } else if contains_any(&lower, &h.commitment_phrases) {
            3
        } else if contains_any(&lower, &h.preference_phrases) {
            1
        } else if content.chars().count() >= h.long_content_chars {
            1
        } else {
            0
        }
    }

    /// Project or long-running cue present (immediate master capture).
    pub fn has_project_cue(&self, content: &str) -> bool {
        contains_any(&content.to_lowercase(), &self.heuristics.project_cues)
    }
}

/// Precision-biased filter deciding whether a (user, assistant) turn belongs
/// in summarization input.
#[derive(Debug, Clone)]
pub struct MeaningfulTurnClassifier {
    heuristics: Arc<Heuristics>,
}

impl MeaningfulTurnClassifier {
    pub fn new(heuristics: Arc<Heuristics>) -> Self {
        Self { heuristics }
    }

    pub fn is_meaningful(&self, user_text: &str, assistant_text: &str) -> bool {
        let h = &self.heuristics;
        let user = user_text.trim();
        let assistant = assistant_text.trim();
        if user.is_empty() && assistant.is_empty() {
            return false;
        }

        if h.is_trivial(user) && assistant.chars().count() < h.trivial_assistant_floor {
            return false;
        }

        let combined = format!("{}\n{}", user, assistant);
        let combined = combined.trim();
        let combined_len = combined.chars().count();
        if combined_len < h.min_turn_chars {
            return false;
        }

        if contains_any(&user.to_lowercase(), &h.meaningful_phrases) {
            return true;
        }

        combined.chars().any(char::is_alphanumeric) && combined_len >= h.substantive_turn_chars
    }
}
