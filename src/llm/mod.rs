//! 채팅 LLM 모듈
//!
//! Upstage Solar / OpenAI 채팅 완성 API (OpenAI 호환 `/chat/completions`, 비스트리밍).

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{LlmProvider, ProviderConfig};
use crate::embedding::{snippet, ApiError};

/// 채팅 프로바이더 트레이트
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 프롬프트 하나에 대한 답변 생성
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn model(&self) -> &str;
}

/// OpenAI 호환 채팅 구현체 (temperature 0)
pub struct OpenAiCompatibleChat {
    provider: LlmProvider,
    api_key: String,
    url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleChat {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        tracing::info!(
            provider = config.provider.name(),
            model = %config.chat_model,
            "Chat provider initialized"
        );

        Ok(Self {
            provider: config.provider,
            api_key: config.api_key.clone(),
            url,
            model: config.chat_model.clone(),
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send chat request")?;

        let status = response.status();
        let text = response.text().await.context("Failed to read chat response")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&text) {
                anyhow::bail!(
                    "{} chat API error ({}): {}",
                    self.provider.name(),
                    status,
                    error.error.message
                );
            }
            anyhow::bail!(
                "{} chat API error ({}): {}",
                self.provider.name(),
                status,
                snippet(&text)
            );
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).context("Failed to parse chat response")?;
        let content = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Chat response has no choices"))?;

        tracing::debug!(
            model = %self.model,
            latency_ms = started.elapsed().as_millis() as u64,
            "Chat completion finished"
        );
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
