//! Error taxonomy for the consolidation core.
//!
//! Store and collaborator layers work in `anyhow::Result`; the engines map
//! those into [`MemoryError`] at their boundary so presentation code can tell
//! a bad request from a missing row from an unreachable upstream.

use std::fmt;

/// The upstream collaborator that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Embedding,
    Completion,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Embedding => write!(f, "embedding"),
            Upstream::Completion => write!(f, "completion"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{service} service unavailable: {detail:#}")]
    UpstreamUnavailable {
        service: Upstream,
        detail: anyhow::Error,
    },

    #[error("store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl MemoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MemoryError::Validation(msg.into())
    }

    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        MemoryError::StoreUnavailable(err.into())
    }

    pub fn embedding(err: anyhow::Error) -> Self {
        MemoryError::UpstreamUnavailable {
            service: Upstream::Embedding,
            detail: err,
        }
    }

    pub fn completion(err: anyhow::Error) -> Self {
        MemoryError::UpstreamUnavailable {
            service: Upstream::Completion,
            detail: err,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        MemoryError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code, distinct per variant.
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Validation(_) => "validation_error",
            MemoryError::UpstreamUnavailable { .. } => "upstream_unavailable",
            MemoryError::StoreUnavailable(_) => "store_unavailable",
            MemoryError::NotFound { .. } => "not_found",
        }
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = vec![
            MemoryError::validation("bad bucket"),
            MemoryError::embedding(anyhow::anyhow!("timeout")),
            MemoryError::store(anyhow::anyhow!("disk full")),
            MemoryError::not_found("conversation", "abc"),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 4);
    }

    #[test]
    fn test_display_includes_context() {
        let err = MemoryError::completion(anyhow::anyhow!("connection refused"));
        assert_eq!(
            err.to_string(),
            "completion service unavailable: connection refused"
        );
        let err = MemoryError::not_found("event", "e-1");
        assert_eq!(err.to_string(), "event not found: e-1");
    }
}
