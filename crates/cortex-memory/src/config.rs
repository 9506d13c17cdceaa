// cortex-memory/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::consolidation::{ExtractorConfig, SummarizerConfig};
use crate::context_engine::ContextConfig;
use crate::services::llm_client::LlmClientConfig;
use crate::services::CompletionOptions;
use crate::thread_pool::ThreadPoolConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub db_pool_size: u32,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub chat_model: String,
    pub summary_model: String,
    pub extractor_model: String,
    pub embedding_base_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub request_timeout_seconds: u64,
    pub side_effect_workers: usize,
    pub persona_path: Option<PathBuf>,
    pub heuristics_path: Option<PathBuf>,
    pub summary_meaningful_target: usize,
    pub summary_debounce_seconds: u64,
    pub topic_shift_cosine_min: f32,
    pub history_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let llm_base_url = env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.groq.com/openai/v1".into());
        let chat_model = env::var("CHAT_MODEL").unwrap_or_else(|_| "llama-3.1-8b-instant".into());

        let config = Self {
            db_path: env::var("CORTEX_DB_PATH")
                .unwrap_or_else(|_| "./data/cortex.db".into())
                .into(),
            db_pool_size: env::var("CORTEX_DB_POOL_SIZE")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .context("CORTEX_DB_POOL_SIZE must be a positive integer")?,
            llm_api_key: optional_var("LLM_API_KEY"),
            summary_model: env::var("SUMMARY_MODEL").unwrap_or_else(|_| chat_model.clone()),
            extractor_model: env::var("EXTRACTOR_MODEL").unwrap_or_else(|_| chat_model.clone()),
            chat_model,
            llm_base_url,
            embedding_base_url: env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            embedding_api_key: optional_var("EMBEDDING_API_KEY"),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".into()),
            embedding_dimensions: env::var("EMBEDDING_DIMENSIONS")
                .unwrap_or_else(|_| "1536".into())
                .parse()
                .context("EMBEDDING_DIMENSIONS must be an integer")?,
            request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".into())
                .parse()?,
            side_effect_workers: env::var("SIDE_EFFECT_WORKERS")
                .unwrap_or_else(|_| "2".into())
                .parse()?,
            persona_path: optional_var("CORTEX_PERSONA_PATH").map(PathBuf::from),
            heuristics_path: optional_var("CORTEX_HEURISTICS_PATH").map(PathBuf::from),
            summary_meaningful_target: env::var("SUMMARY_MEANINGFUL_TARGET")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            summary_debounce_seconds: env::var("SUMMARY_DEBOUNCE_SECONDS")
                .unwrap_or_else(|_| "180".into())
                .parse()?,
            topic_shift_cosine_min: env::var("TOPIC_SHIFT_COSINE_MIN")
                .unwrap_or_else(|_| "0.75".into())
                .parse()?,
            history_limit: env::var("CONTEXT_HISTORY_LIMIT")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_pool_size == 0 {
            return Err(anyhow::anyhow!("CORTEX_DB_POOL_SIZE must be at least 1"));
        }
        if self.side_effect_workers == 0 {
            return Err(anyhow::anyhow!("SIDE_EFFECT_WORKERS must be at least 1"));
        }
        if self.summary_meaningful_target == 0 {
            return Err(anyhow::anyhow!("SUMMARY_MEANINGFUL_TARGET must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.topic_shift_cosine_min) {
            return Err(anyhow::anyhow!(
                "TOPIC_SHIFT_COSINE_MIN must be within [0, 1], got {}",
                self.topic_shift_cosine_min
            ));
        }
        Ok(())
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database: {}", self.db_path.display());
        info!("- Pool Size: {}", self.db_pool_size);
        info!("- LLM Backend: {}", self.llm_base_url);
        info!("- Chat Model: {}", self.chat_model);
        info!("- Summary Model: {}", self.summary_model);
        info!("- Extractor Model: {}", self.extractor_model);
        info!("- Embedding Backend: {}", self.embedding_base_url);
        info!("- Embedding Model: {} (dim {})", self.embedding_model, self.embedding_dimensions);
        info!("- Side-Effect Workers: {}", self.side_effect_workers);
        info!("- Meaningful Target: {}", self.summary_meaningful_target);
        info!("- Summary Debounce: {}s", self.summary_debounce_seconds);
        info!("- Topic Shift Cosine Min: {}", self.topic_shift_cosine_min);
        info!("- LLM API Key: {}", if self.llm_api_key.is_some() { "set" } else { "unset" });
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn summarizer_config(&self) -> SummarizerConfig {
        let defaults = SummarizerConfig::default();
        SummarizerConfig {
            meaningful_target: self.summary_meaningful_target,
            debounce: Duration::from_secs(self.summary_debounce_seconds),
            topic_shift_cosine_min: self.topic_shift_cosine_min,
            completion: CompletionOptions {
                model: self.summary_model.clone(),
                ..defaults.completion.clone()
            },
            ..defaults
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        let defaults = ExtractorConfig::default();
        ExtractorConfig {
            completion: CompletionOptions {
                model: self.extractor_model.clone(),
                ..defaults.completion.clone()
            },
            ..defaults
        }
    }

    /// Sampling for user-facing replies.
    pub fn chat_options(&self) -> CompletionOptions {
        CompletionOptions::new(self.chat_model.clone(), 0.6, 600)
    }

    pub fn thread_pool_config(&self) -> ThreadPoolConfig {
        ThreadPoolConfig {
            workers: self.side_effect_workers,
            ..ThreadPoolConfig::default()
        }
    }

    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            default_history_limit: self.history_limit,
            ..ContextConfig::default()
        }
    }

    pub fn completion_client_config(&self) -> LlmClientConfig {
        LlmClientConfig {
            base_url: self.llm_base_url.clone(),
            api_key: self.llm_api_key.clone(),
            embedding_model: self.embedding_model.clone(),
            embedding_dimensions: self.embedding_dimensions,
            timeout: self.request_timeout(),
        }
    }

    pub fn embedding_client_config(&self) -> LlmClientConfig {
        LlmClientConfig {
            base_url: self.embedding_base_url.clone(),
            api_key: self.embedding_api_key.clone(),
            embedding_model: self.embedding_model.clone(),
            embedding_dimensions: self.embedding_dimensions,
            timeout: self.request_timeout(),
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper function to create a test Config with default values
    fn create_test_config() -> Config {
        Config {
            db_path: PathBuf::from("/tmp/cortex-test.db"),
            db_pool_size: 10,
            llm_base_url: "http://127.0.0.1:8081/v1".to_string(),
            llm_api_key: None,
            chat_model: "llama-3.1-8b-instant".to_string(),
            summary_model: "llama-3.1-8b-instant".to_string(),
            extractor_model: "llama-3.1-8b-instant".to_string(),
            embedding_base_url: "http://127.0.0.1:8082/v1".to_string(),
            embedding_api_key: Some("sk-test".to_string()),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            request_timeout_seconds: 60,
            side_effect_workers: 2,
            persona_path: None,
            heuristics_path: None,
            summary_meaningful_target: 10,
            summary_debounce_seconds: 180,
            topic_shift_cosine_min: 0.75,
            history_limit: 30,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(create_test_config().validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = create_test_config();
        config.side_effect_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut config = create_test_config();
        config.db_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cosine_threshold_out_of_range_rejected() {
        let mut config = create_test_config();
        config.topic_shift_cosine_min = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summarizer_config_carries_overrides() {
        let mut config = create_test_config();
        config.summary_meaningful_target = 4;
        config.summary_debounce_seconds = 0;
        let summarizer = config.summarizer_config();
        assert_eq!(summarizer.meaningful_target, 4);
        assert_eq!(summarizer.debounce, Duration::ZERO);
        assert_eq!(summarizer.lookback, SummarizerConfig::default().lookback);
        assert_eq!(summarizer.completion.max_tokens, 350);
    }

    #[test]
    fn test_models_are_routed_per_component() {
        let mut config = create_test_config();
        config.summary_model = "summary-model".into();
        config.extractor_model = "extractor-model".into();
        config.chat_model = "chat-model".into();
        assert_eq!(config.summarizer_config().completion.model, "summary-model");
        assert_eq!(config.extractor_config().completion.model, "extractor-model");
        assert_eq!(config.extractor_config().completion.max_tokens, 400);
        assert_eq!(config.chat_options().model, "chat-model");
        assert_eq!(config.thread_pool_config().workers, 2);
    }

    #[test]
    fn test_client_configs_use_separate_backends() {
        let config = create_test_config();
        let completion = config.completion_client_config();
        let embedding = config.embedding_client_config();
        assert_eq!(completion.base_url, "http://127.0.0.1:8081/v1");
        assert_eq!(embedding.base_url, "http://127.0.0.1:8082/v1");
        assert_eq!(embedding.api_key.as_deref(), Some("sk-test"));
        assert_eq!(completion.timeout, Duration::from_secs(60));
    }
}
