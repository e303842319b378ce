//! In-memory Vector Index
//!
//! 프로세스 메모리에 청크를 보관하는 게이트웨이 구현입니다.
//! 임베딩 프로바이더가 있으면 코사인 유사도, 없으면 토큰 겹침으로 순위를 매깁니다.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::embedding::EmbeddingProvider;

use super::vector::{
    cosine_similarity, DocumentChunk, IndexSpec, IndexStats, ScoredChunk, VectorIndex,
};

struct StoredChunk {
    chunk: DocumentChunk,
    embedding: Option<Vec<f32>>,
}

#[derive(Default)]
struct MemoryState {
    indexes: BTreeSet<String>,
    chunks: Vec<StoredChunk>,
    dimension: Option<usize>,
}

/// 메모리 벡터 인덱스
pub struct InMemoryVectorIndex {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    state: Mutex<MemoryState>,
}

impl InMemoryVectorIndex {
    /// 임베딩 없이 생성 (토큰 겹침 검색)
    pub fn new() -> Self {
        Self {
            embedder: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// 임베딩 프로바이더와 함께 생성 (코사인 유사도 검색)
    pub fn with_embedder(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder: Some(embedder),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// 저장된 청크 스냅샷
    pub async fn chunks(&self) -> Vec<DocumentChunk> {
        let state = self.state.lock().await;
        state.chunks.iter().map(|s| s.chunk.clone()).collect()
    }

    /// 모든 벡터 삭제 (인덱스가 외부에서 재생성된 상황 재현용)
    pub async fn clear(&self) {
        self.state.lock().await.chunks.clear();
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().await.indexes.contains(name))
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        state.indexes.insert(spec.name.clone());
        state.dimension = Some(spec.dimension);
        Ok(())
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        let state = self.state.lock().await;
        Ok(IndexStats {
            total_vector_count: state.chunks.len() as u64,
            dimension: state.dimension,
        })
    }

    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings: Vec<Option<Vec<f32>>> = match &self.embedder {
            Some(embedder) => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                embedder.embed_batch(&texts).await?.into_iter().map(Some).collect()
            }
            None => vec![None; chunks.len()],
        };

        let mut state = self.state.lock().await;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            state.chunks.push(StoredChunk {
                chunk: chunk.clone(),
                embedding,
            });
        }

        Ok(chunks.len())
    }

    async fn delete_by_source_files(&self, source_files: &[String]) -> Result<()> {
        let targets: HashSet<&str> = source_files.iter().map(String::as_str).collect();
        let mut state = self.state.lock().await;
        let before = state.chunks.len();
        state
            .chunks
            .retain(|s| !targets.contains(s.chunk.source_file.as_str()));
        tracing::debug!("Deleted {} vectors from memory index", before - state.chunks.len());
        Ok(())
    }

    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let query_embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed(query).await?),
            None => None,
        };
        let query_tokens = tokenize(query);

        let state = self.state.lock().await;
        let mut results: Vec<ScoredChunk> = state
            .chunks
            .iter()
            .map(|stored| {
                let score = match (&query_embedding, &stored.embedding) {
                    (Some(q), Some(e)) => cosine_similarity(q, e),
                    _ => token_overlap(&query_tokens, &stored.chunk.text),
                };
                ScoredChunk {
                    chunk: stored.chunk.clone(),
                    score,
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// 질의 토큰 중 청크에 등장하는 비율
fn token_overlap(query_tokens: &HashSet<String>, text: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens = tokenize(text);
    let hits = query_tokens.iter().filter(|t| text_tokens.contains(*t)).count();
    hits as f32 / query_tokens.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_and_stats() {
        let index = InMemoryVectorIndex::new();
        assert_eq!(index.describe_stats().await.unwrap().total_vector_count, 0);

        let chunks = vec![
            DocumentChunk::new("배출권 거래제 개요", "a.pdf"),
            DocumentChunk::new("과태료 부과 기준", "b.pdf"),
        ];
        assert_eq!(index.upsert(&chunks).await.unwrap(), 2);
        assert_eq!(index.describe_stats().await.unwrap().total_vector_count, 2);
    }

    #[tokio::test]
    async fn test_delete_by_source_files() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(&[
                DocumentChunk::new("one", "a.pdf"),
                DocumentChunk::new("two", "a.pdf"),
                DocumentChunk::new("three", "b.pdf"),
            ])
            .await
            .unwrap();

        index
            .delete_by_source_files(&["a.pdf".to_string()])
            .await
            .unwrap();

        let remaining = index.chunks().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source_file, "b.pdf");
    }

    #[tokio::test]
    async fn test_token_overlap_search() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(&[
                DocumentChunk::new("배출권 할당 기준", "a.pdf"),
                DocumentChunk::new("과태료 부과 기준 및 금액", "b.pdf"),
            ])
            .await
            .unwrap();

        let results = index.similarity_search("과태료 금액", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_file, "b.pdf");
    }

    #[tokio::test]
    async fn test_create_index() {
        let index = InMemoryVectorIndex::new();
        assert!(!index.index_exists("carbon").await.unwrap());

        index
            .create_index(&IndexSpec::serverless("carbon", 8))
            .await
            .unwrap();
        assert!(index.index_exists("carbon").await.unwrap());
        assert_eq!(index.describe_stats().await.unwrap().dimension, Some(8));
    }
}
