//! Tunable phrase lists and thresholds for scoring, turn classification and
//! context cues. Defaults are built in; a JSON file can override any subset.
use anyhow::Context;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    /// Exact-match (trimmed, lowercase) chatter that carries no durable content.
    pub trivial_phrases: Vec<String>,
    /// Identity/profile intent; scores 5.
    pub identity_phrases: Vec<String>,
    /// Plans, commitments and constraints; scores 3.
    pub commitment_phrases: Vec<String>,
    /// Likes and dislikes; scores 1.
    pub preference_phrases: Vec<String>,
    /// Content at least this long scores 1 when nothing else matched.
    pub long_content_chars: usize,
    /// Long-running/project cues that trigger an immediate master capture.
    pub project_cues: Vec<String>,
    /// User-side phrases that make a turn meaningful outright.
    pub meaningful_phrases: Vec<String>,
    /// Assistant replies shorter than this do not rescue a trivial user line.
    pub trivial_assistant_floor: usize,
    pub min_turn_chars: usize,
    pub substantive_turn_chars: usize,
    /// Case-insensitive regex; message wants a recap of the conversation.
    pub recap_cue: String,
    /// Case-insensitive regex; message asks about remembered facts.
    pub remember_cue: String,
    /// Master-memory claims containing any of these are discarded.
    pub claim_denylist: Vec<String>,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            trivial_phrases: strings(&[
                "ok", "okay", "k", "kk", "lol", "lmao", "bet", "nice", "cool", "word", "yup",
                "yeah", "nah", "thanks", "thx", "ty", "cya", "bye", "goodbye", "hi", "hello",
                "hey", "yo", "sup", "what's up", "whats up",
            ]),
            identity_phrases: strings(&[
                "my name is",
                "call me",
                "my email",
                "my phone",
                "my number is",
                "my address",
                "my birthday",
                "i live in",
                "remember this",
                "remember that",
                "please remember",
                "don't forget",
            ]),
            commitment_phrases: strings(&[
                "need to",
                "needs to",
                "should",
                "deadline",
                "due by",
                "must",
                "have to",
                "has to",
                "plan to",
                "planning to",
                "going to",
                "i will",
                "i'll",
                "commit",
                "never",
                "do not",
                "don't",
            ]),
            preference_phrases: strings(&[
                "i like",
                "i love",
                "i hate",
                "i prefer",
                "i enjoy",
                "i dislike",
                "my favorite",
                "my favourite",
            ]),
            long_content_chars: 120,
            project_cues: strings(&[
                "project",
                "working on",
                "building",
                "long-term",
                "long term",
                "ongoing",
                "roadmap",
                "milestone",
            ]),
            meaningful_phrases: strings(&[
                // identity / profile
                "my name is", "call me ", "i am ", "i'm ", "i live", "i work", "my email",
                "my phone", "my address", "my birthday", "her name", "his name", "their name",
                // relationships
                "my dog", "my cat", "my pet", "my boss", "my brother", "my sister", "my mother",
                "my mom", "my dad", "my father", "my husband", "my wife", "my kid",
                "my boyfriend", "my girlfriend", "my friend",
                // preferences
                "i like", "i love", "i hate", "i prefer", "my favorite", "i don't like",
                "i dislike", "i usually", "i always", "i never",
                // memory intent
                "remember",
                // commitments
                "i will", "i want to", "i need to", "we need to", "we should", "let's",
                "we will", "next step", "goal is", "deadline", "plan",
                // constraints
                "do not", "don't", "never ", "avoid ", "stop ", "no more", "only ",
                // technical decisions
                "use ", "build ", "implement ", "schema", "table", "sql", "api", "bug", "error",
            ]),
            trivial_assistant_floor: 80,
            min_turn_chars: 40,
            substantive_turn_chars: 80,
            recap_cue: r"\b(recap|summari[sz]e|catch me up|where were we|continue)\b".to_string(),
            remember_cue: r"\b(remember|what did i say|what was the plan|who am i|my name)\b"
                .to_string(),
            claim_denylist: strings(&[
                "improve productivity",
                "explore new hobby",
                "tackle put-off tasks",
                "review previous conversation",
            ]),
        }
    }
}

impl Heuristics {
    /// Load overrides from a JSON file; missing keys keep their defaults.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read heuristics file {}", path.display()))?;
        let parsed: Heuristics = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid heuristics JSON in {}", path.display()))?;
        let normalized = parsed.normalized();
        normalized.recap_regex()?;
        normalized.remember_regex()?;
        Ok(normalized)
    }

    /// Lowercase every phrase list so matching can lowercase only the input.
    pub fn normalized(mut self) -> Self {
        for list in [
            &mut self.trivial_phrases,
            &mut self.identity_phrases,
            &mut self.commitment_phrases,
            &mut self.preference_phrases,
            &mut self.project_cues,
            &mut self.meaningful_phrases,
            &mut self.claim_denylist,
        ] {
            for phrase in list.iter_mut() {
                *phrase = phrase.to_lowercase();
            }
            list.retain(|p| !p.trim().is_empty());
        }
        self
    }

    pub fn recap_regex(&self) -> anyhow::Result<Regex> {
        compile_cue(&self.recap_cue)
    }

    pub fn remember_regex(&self) -> anyhow::Result<Regex> {
        compile_cue(&self.remember_cue)
    }

    pub fn is_trivial(&self, text: &str) -> bool {
        let normalized = text.trim().to_lowercase();
        self.trivial_phrases.iter().any(|p| *p == normalized)
    }

    pub fn is_denylisted(&self, claim: &str) -> bool {
        contains_any(&claim.to_lowercase(), &self.claim_denylist)
    }
}

fn compile_cue(pattern: &str) -> anyhow::Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("Invalid cue pattern: {}", pattern))
}

/// `haystack` must already be lowercase.
pub(crate) fn contains_any(haystack: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| haystack.contains(p.as_str()))
}
