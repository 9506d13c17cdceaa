//! OpenAI-compatible HTTP client for chat completions and embeddings.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::memory::Message;
use crate::services::{CompletionOptions, CompletionService, EmbeddingService};
use crate::utils::TextUtils;

/// Embedding inputs are cut to this many characters before sending.
const MAX_EMBED_CHARS: usize = 20_000;

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Base URL including the API version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    /// Expected embedding length; 0 disables the check.
    pub embedding_dimensions: usize,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct LlmClient {
    config: LlmClientConfig,
    http_client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmClientConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        info!("LLM client initialized with backend: {}", config.base_url);
        Ok(Self { config, http_client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http_client.post(self.url(path));
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> anyhow::Result<String> {
        debug!(
            "Requesting completion from {} ({} messages)",
            options.model,
            messages.len()
        );
        let request = ChatCompletionRequest {
            model: &options.model,
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream: false,
        };
        let response = self
            .post("chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("LLM backend request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("LLM backend returned {}: {}", status, body));
        }
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {}", e))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl EmbeddingService for LlmClient {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let input = text.trim();
        if input.is_empty() {
            return Err(anyhow::anyhow!("Cannot embed empty text"));
        }
        let input = TextUtils::truncate_chars(input, MAX_EMBED_CHARS);
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input,
        };
        let response = self
            .post("embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Embedding request failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Embedding endpoint returned {}: {}", status, body));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse embedding response: {}", e))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))?;

        let expected = self.config.embedding_dimensions;
        if expected > 0 && embedding.len() != expected {
            return Err(anyhow::anyhow!(
                "Embedding dimension mismatch: got {}, expected {}",
                embedding.len(),
                expected
            ));
        }
        debug!("Generated embedding (dim={})", embedding.len());
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard, dims: usize) -> LlmClient {
        LlmClient::new(LlmClientConfig {
            base_url: format!("{}/v1", server.url()),
            api_key: Some("sk-test".into()),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: dims,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_parses_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "llama-3.1-8b-instant",
                "max_tokens": 350
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"  - fact one \n"}}]}"#)
            .create_async()
            .await;

        let client = client_for(&server, 0);
        let out = client
            .complete(
                &[Message::user("hi")],
                &CompletionOptions::new("llama-3.1-8b-instant", 0.2, 350),
            )
            .await
            .unwrap();
        assert_eq!(out, "- fact one");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = client_for(&server, 0);
        let err = client
            .complete(&[Message::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_embed_checks_dimensions() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"embedding":[0.1,0.2,0.3]}]}"#)
            .expect(2)
            .create_async()
            .await;

        let ok = client_for(&server, 3).embed("hello").await.unwrap();
        assert_eq!(ok, vec![0.1, 0.2, 0.3]);

        let err = client_for(&server, 4).embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_text_without_request() {
        let server = mockito::Server::new_async().await;
        assert!(client_for(&server, 0).embed("   ").await.is_err());
    }
}
