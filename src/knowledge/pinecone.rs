//! Pinecone Vector Index - REST 게이트웨이
//!
//! - 컨트롤 플레인 (`https://api.pinecone.io`): 인덱스 조회/생성, 호스트 확인
//! - 데이터 플레인 (`https://<host>`): upsert / delete / stats / query
//!
//! 텍스트 임베딩은 주입된 [`EmbeddingProvider`]로 수행합니다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use url::Url;

use crate::config::PineconeConfig;
use crate::embedding::{snippet, EmbeddingProvider};

use super::vector::{
    source_file_filter, DocumentChunk, IndexSpec, IndexStats, Metric, ScoredChunk, VectorIndex,
    SOURCE_FILE_KEY,
};

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io/";
const API_VERSION: &str = "2024-07";
/// 메타데이터에 원문을 저장하는 키
const TEXT_KEY: &str = "text";
/// 인덱스 생성 후 준비 완료 대기
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const READY_MAX_POLLS: u32 = 30;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    name: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: Metric,
    spec: CreateIndexSpec<'a>,
}

#[derive(Debug, Serialize)]
struct CreateIndexSpec<'a> {
    serverless: ServerlessSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ServerlessSpec<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    vectors: Vec<Vector>,
}

#[derive(Debug, Serialize)]
struct Vector {
    id: String,
    values: Vec<f32>,
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

// ============================================================================
// PineconeIndex
// ============================================================================

/// Pinecone 서버리스 인덱스 게이트웨이
pub struct PineconeIndex {
    client: reqwest::Client,
    api_key: String,
    control_url: Url,
    index_name: String,
    host: OnceCell<Url>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl PineconeIndex {
    pub fn new(
        config: &PineconeConfig,
        index_name: impl Into<String>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            control_url: Url::parse(CONTROL_PLANE_URL).context("Invalid control plane URL")?,
            index_name: index_name.into(),
            host: OnceCell::new(),
            embedder,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>> {
        let url = self
            .control_url
            .join(&format!("indexes/{}", name))
            .context("Invalid index URL")?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("Pinecone describe_index request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(read_json(response, "describe_index").await?))
    }

    /// 데이터 플레인 호스트 (최초 1회 조회 후 캐시)
    async fn data_url(&self, path: &str) -> Result<Url> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let description = self
                    .describe_index(&self.index_name)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Index '{}' not found", self.index_name))?;
                host_url(&description.host)
            })
            .await?;
        host.join(path)
            .with_context(|| format!("Invalid data plane path: {}", path))
    }

    async fn wait_until_ready(&self, name: &str) -> Result<()> {
        for _ in 0..READY_MAX_POLLS {
            if let Some(description) = self.describe_index(name).await? {
                if description.status.map(|s| s.ready).unwrap_or(false) {
                    return Ok(());
                }
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        anyhow::bail!("Index '{}' was not ready in time", name)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn index_exists(&self, name: &str) -> Result<bool> {
        let url = self.control_url.join("indexes").context("Invalid index URL")?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context("Pinecone list_indexes request failed")?;
        let list: IndexList = read_json(response, "list_indexes").await?;
        Ok(list.indexes.iter().any(|index| index.name == name))
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let url = self.control_url.join("indexes").context("Invalid index URL")?;
        let body = CreateIndexRequest {
            name: &spec.name,
            dimension: spec.dimension,
            metric: spec.metric,
            spec: CreateIndexSpec {
                serverless: ServerlessSpec {
                    cloud: &spec.cloud,
                    region: &spec.region,
                },
            },
        };

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .context("Pinecone create_index request failed")?;
        let _: IndexDescription = read_json(response, "create_index").await?;

        self.wait_until_ready(&spec.name).await?;
        tracing::info!("Created Pinecone index '{}'", spec.name);
        Ok(())
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        let url = self.data_url("describe_index_stats").await?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("Pinecone describe_index_stats request failed")?;
        let stats: StatsResponse = read_json(response, "describe_index_stats").await?;

        Ok(IndexStats {
            total_vector_count: stats.total_vector_count,
            dimension: stats.dimension,
        })
    }

    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            anyhow::bail!(
                "Embedding count mismatch: {} chunks, {} embeddings",
                chunks.len(),
                embeddings.len()
            );
        }

        let body = UpsertRequest {
            vectors: chunks
                .iter()
                .zip(embeddings)
                .map(|(chunk, values)| Vector {
                    id: uuid::Uuid::new_v4().to_string(),
                    values,
                    metadata: chunk_metadata(chunk),
                })
                .collect(),
        };

        let url = self.data_url("vectors/upsert").await?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .context("Pinecone upsert request failed")?;
        let result: UpsertResponse = read_json(response, "upsert").await?;

        tracing::debug!("Upserted {} vectors", result.upserted_count);
        Ok(result.upserted_count)
    }

    async fn delete_by_source_files(&self, source_files: &[String]) -> Result<()> {
        if source_files.is_empty() {
            return Ok(());
        }

        let url = self.data_url("vectors/delete").await?;
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({ "filter": source_file_filter(source_files) }))
            .send()
            .await
            .context("Pinecone delete request failed")?;
        let _: serde_json::Value = read_json(response, "delete").await?;
        Ok(())
    }

    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = self.embedder.embed(query).await?;
        let url = self.data_url("query").await?;
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
        };

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .context("Pinecone query request failed")?;
        let result: QueryResponse = read_json(response, "query").await?;

        Ok(result.matches.into_iter().filter_map(scored_chunk).collect())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read Pinecone {} response", operation))?;

    if !status.is_success() {
        anyhow::bail!("Pinecone {} error ({}): {}", operation, status, snippet(&body));
    }

    // delete 등은 빈 본문을 반환할 수 있음
    let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
    serde_json::from_str(body)
        .with_context(|| format!("Failed to parse Pinecone {} response", operation))
}

fn host_url(host: &str) -> Result<Url> {
    if host.is_empty() {
        anyhow::bail!("Index host is not available yet");
    }
    let base = if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}/", host.trim_end_matches('/'))
    } else {
        format!("https://{}/", host.trim_end_matches('/'))
    };
    Url::parse(&base).with_context(|| format!("Invalid index host: {}", host))
}

fn chunk_metadata(chunk: &DocumentChunk) -> serde_json::Value {
    serde_json::json!({
        TEXT_KEY: chunk.text,
        SOURCE_FILE_KEY: chunk.source_file,
    })
}

fn scored_chunk(m: QueryMatch) -> Option<ScoredChunk> {
    let metadata = m.metadata?;
    let text = metadata.get(TEXT_KEY)?.as_str()?.to_string();
    let source_file = metadata
        .get(SOURCE_FILE_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Some(ScoredChunk {
        chunk: DocumentChunk { text, source_file },
        score: m.score,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_url() {
        let url = host_url("carbon-abc123.svc.aped-4627-b74a.pinecone.io").unwrap();
        assert_eq!(
            url.join("vectors/upsert").unwrap().as_str(),
            "https://carbon-abc123.svc.aped-4627-b74a.pinecone.io/vectors/upsert"
        );
        assert!(host_url("").is_err());
    }

    #[test]
    fn test_host_url_with_scheme() {
        let url = host_url("http://localhost:5080/").unwrap();
        assert_eq!(url.join("query").unwrap().as_str(), "http://localhost:5080/query");
    }

    #[test]
    fn test_create_index_body() {
        let body = CreateIndexRequest {
            name: "carbon-multiagent",
            dimension: 4096,
            metric: Metric::Cosine,
            spec: CreateIndexSpec {
                serverless: ServerlessSpec {
                    cloud: "aws",
                    region: "us-east-1",
                },
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "name": "carbon-multiagent",
                "dimension": 4096,
                "metric": "cosine",
                "spec": {"serverless": {"cloud": "aws", "region": "us-east-1"}}
            })
        );
    }

    #[test]
    fn test_chunk_metadata() {
        let chunk = DocumentChunk::new("배출권 거래", "guide.pdf");
        assert_eq!(
            chunk_metadata(&chunk),
            serde_json::json!({"text": "배출권 거래", "source_file": "guide.pdf"})
        );
    }

    #[test]
    fn test_query_response_parsing() {
        let body = r#"{
            "matches": [
                {"id": "1", "score": 0.91, "metadata": {"text": "과태료 기준", "source_file": "a.pdf"}},
                {"id": "2", "score": 0.5}
            ],
            "namespace": ""
        }"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        let chunks: Vec<ScoredChunk> = response.matches.into_iter().filter_map(scored_chunk).collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk.source_file, "a.pdf");
        assert!((chunks[0].score - 0.91).abs() < 1e-6);
    }

    #[test]
    fn test_stats_response_parsing() {
        let body = r#"{"namespaces":{"":{"vectorCount":42}},"dimension":4096,"indexFullness":0.0,"totalVectorCount":42}"#;
        let stats: StatsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(stats.total_vector_count, 42);
        assert_eq!(stats.dimension, Some(4096));
    }

    #[test]
    fn test_query_request_camel_case() {
        let body = QueryRequest {
            vector: vec![0.1],
            top_k: 3,
            include_metadata: true,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["topK"], 3);
        assert_eq!(value["includeMetadata"], true);
    }
}
