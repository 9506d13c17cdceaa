//! Row types and closed value sets for the memory store
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MemoryError;

/// Maximum event content length, in characters.
pub const MAX_EVENT_CHARS: usize = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Assistant,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::User => "user",
            Actor::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actor {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Actor::User),
            "assistant" => Ok(Actor::Assistant),
            other => Err(MemoryError::validation(format!(
                "invalid actor '{}': must be user or assistant",
                other
            ))),
        }
    }
}

/// Reaction values. `Summarize` is the user-triggered forced-summary signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
    Summarize,
}

impl ReactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Dislike => "dislike",
            ReactionKind::Summarize => "summarize",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "like" => Ok(ReactionKind::Like),
            "dislike" => Ok(ReactionKind::Dislike),
            "summarize" => Ok(ReactionKind::Summarize),
            other => Err(MemoryError::validation(format!("invalid reaction '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bucket {
    Profile,
    Preferences,
    Constraints,
    CommunicationStyle,
    LongRunningContext,
    Goals,
    Projects,
    NextActions,
    OpenLoops,
}

impl Bucket {
    pub const ALL: [Bucket; 9] = [
        Bucket::Profile,
        Bucket::Preferences,
        Bucket::Constraints,
        Bucket::CommunicationStyle,
        Bucket::LongRunningContext,
        Bucket::Goals,
        Bucket::Projects,
        Bucket::NextActions,
        Bucket::OpenLoops,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Profile => "PROFILE",
            Bucket::Preferences => "PREFERENCES",
            Bucket::Constraints => "CONSTRAINTS",
            Bucket::CommunicationStyle => "COMMUNICATION_STYLE",
            Bucket::LongRunningContext => "LONG_RUNNING_CONTEXT",
            Bucket::Goals => "GOALS",
            Bucket::Projects => "PROJECTS",
            Bucket::NextActions => "NEXT_ACTIONS",
            Bucket::OpenLoops => "OPEN_LOOPS",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Bucket::ALL
            .iter()
            .copied()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| MemoryError::validation(format!("invalid bucket '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Active,
    Deprecated,
    Conflicted,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Deprecated => "deprecated",
            ItemStatus::Conflicted => "conflicted",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(ItemStatus::Active),
            "deprecated" => Ok(ItemStatus::Deprecated),
            "conflicted" => Ok(ItemStatus::Conflicted),
            other => Err(MemoryError::validation(format!("invalid status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    High,
    #[default]
    Med,
    Low,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::High => "high",
            Stability::Med => "med",
            Stability::Low => "low",
        }
    }
}

impl FromStr for Stability {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Stability::High),
            "med" | "medium" => Ok(Stability::Med),
            "low" => Ok(Stability::Low),
            other => Err(MemoryError::validation(format!("invalid stability '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConversationMetadata {
    #[serde(default)]
    pub promoted: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: ConversationMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Store insertion order; breaks ties between identical timestamps.
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub actor: Actor,
    pub content: String,
    pub metadata: serde_json::Value,
    pub importance_score: u8,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

/// A reaction joined with the assistant event it targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionSignal {
    pub event_id: String,
    pub conversation_id: String,
    pub reaction: ReactionKind,
    pub event_excerpt: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SummaryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_summary_write_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meaningful_turns: Option<usize>,
    #[serde(default)]
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub conversation_id: String,
    pub summary_text: String,
    pub range_start_event_id: Option<String>,
    pub range_end_event_id: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub metadata: SummaryMetadata,
    pub is_active: bool,
    /// Bumped on every in-place update; guards conditional writes.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterItem {
    pub id: String,
    pub owner_id: String,
    pub bucket: Bucket,
    pub text: String,
    pub status: ItemStatus,
    pub stability: Stability,
    pub confidence: f32,
    pub reinforcement_count: i64,
    pub last_seen_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMasterItem {
    pub item: MasterItem,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterEvidence {
    pub id: String,
    pub master_item_id: String,
    pub conversation_id: Option<String>,
    pub event_id: Option<String>,
    pub summary_id: Option<String>,
    pub weight: f32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseStats {
    pub total_conversations: i64,
    pub total_events: i64,
    pub total_summaries: i64,
    pub active_summaries: i64,
    pub total_master_items: i64,
    pub total_evidence: i64,
    pub database_size_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_parse_is_case_insensitive() {
        assert_eq!("projects".parse::<Bucket>().unwrap(), Bucket::Projects);
        assert_eq!(
            " long_running_context ".parse::<Bucket>().unwrap(),
            Bucket::LongRunningContext
        );
        assert!("HOBBIES".parse::<Bucket>().is_err());
    }

    #[test]
    fn test_invalid_enum_values_are_validation_errors() {
        let err = "maybe".parse::<ItemStatus>().unwrap_err();
        assert_eq!(err.code(), "validation_error");
        let err = "sometimes".parse::<Stability>().unwrap_err();
        assert_eq!(err.code(), "validation_error");
        let err = "system".parse::<Actor>().unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_bucket_serde_matches_display() {
        let json = serde_json::to_string(&Bucket::NextActions).unwrap();
        assert_eq!(json, "\"NEXT_ACTIONS\"");
        assert_eq!(Bucket::NextActions.to_string(), "NEXT_ACTIONS");
    }

    #[test]
    fn test_conversation_metadata_keeps_unknown_keys() {
        let meta: ConversationMetadata =
            serde_json::from_str(r#"{"promoted":true,"source":"cli"}"#).unwrap();
        assert!(meta.promoted);
        assert_eq!(meta.extra.get("source").and_then(|v| v.as_str()), Some("cli"));
    }
}
