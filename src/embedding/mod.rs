//! 임베딩 모듈 - OpenAI 호환 API를 통한 텍스트 벡터화
//!
//! Upstage(`embedding-query`)와 OpenAI(`text-embedding-3-small`)는 같은
//! `/embeddings` 요청 형식을 사용하므로 하나의 구현체로 처리합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiCompatibleEmbedding::new(&config.require_provider()?)?;
//! let embedding = embedder.embed("온실가스 배출권").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{LlmProvider, ProviderConfig};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible Embedding
// ============================================================================

/// 429 / 전송 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// OpenAI 호환 임베딩 구현체
pub struct OpenAiCompatibleEmbedding {
    provider: LlmProvider,
    api_key: String,
    url: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
}

impl OpenAiCompatibleEmbedding {
    /// 프로바이더 설정으로 생성
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.embedding_dimension == 0 {
            anyhow::bail!("Invalid embedding dimension: 0");
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            provider: config.provider,
            api_key: config.api_key.clone(),
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.embedding_model.clone(),
            client,
            dimension: config.embedding_dimension,
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input,
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (429 / 전송 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            let response = match self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let mut parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                if parsed.data.len() != input.len() {
                    anyhow::bail!(
                        "Embedding count mismatch: requested {}, received {}",
                        input.len(),
                        parsed.data.len()
                    );
                }
                parsed.data.sort_by_key(|d| d.index);
                return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
            }

            if status.as_u16() == 429 {
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 다른 에러 - 즉시 실패
                if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                    anyhow::bail!(
                        "{} embedding API error ({}): {}",
                        self.provider.name(),
                        status,
                        error.error.message
                    );
                }
                anyhow::bail!(
                    "{} embedding API error ({}): {}",
                    self.provider.name(),
                    status,
                    snippet(&body)
                );
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }
}

/// 임베딩 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// 임베딩 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// API 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub(crate) error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub(crate) message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        tracing::debug!("Embedding batch of {} texts ({})", texts.len(), self.model);
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 에러 본문 앞부분 (로그용)
pub(crate) fn snippet(body: &str) -> String {
    const MAX_CHARS: usize = 300;
    if body.chars().count() <= MAX_CHARS {
        body.to_string()
    } else {
        format!("{}...", body.chars().take(MAX_CHARS).collect::<String>())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_config(dimension: usize) -> ProviderConfig {
        ProviderConfig {
            provider: LlmProvider::Upstage,
            api_key: "fake_key".to_string(),
            base_url: "https://api.upstage.ai/v1/".to_string(),
            chat_model: "solar-mini".to_string(),
            embedding_model: "embedding-query".to_string(),
            embedding_dimension: dimension,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_invalid_dimension() {
        let result = OpenAiCompatibleEmbedding::new(&provider_config(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_and_dimension() {
        let embedder = OpenAiCompatibleEmbedding::new(&provider_config(4096)).unwrap();
        assert_eq!(embedder.url, "https://api.upstage.ai/v1/embeddings");
        assert_eq!(embedder.dimension(), 4096);
        assert_eq!(embedder.name(), "embedding-query");
    }

    #[tokio::test]
    async fn test_empty_text_returns_zero_vector() {
        let embedder = OpenAiCompatibleEmbedding::new(&provider_config(8)).unwrap();
        let vector = embedder.embed("   ").await.unwrap();
        assert_eq!(vector, vec![0.0; 8]);
    }

    #[test]
    fn test_response_parsing_orders_by_index() {
        let body = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let mut parsed: EmbedResponse = serde_json::from_str(body).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0]);
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "가".repeat(400);
        assert!(snippet(&long).ends_with("..."));
        assert_eq!(snippet("short"), "short");
    }
}
