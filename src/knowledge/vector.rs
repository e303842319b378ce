//! Vector Index - 벡터 인덱스 게이트웨이 트레이트 및 유틸리티
//!
//! 동기화 코어가 의존하는 외부 벡터 인덱스 인터페이스입니다.
//! 구현체: [`PineconeIndex`](super::PineconeIndex), [`InMemoryVectorIndex`](super::InMemoryVectorIndex)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 청크 메타데이터의 소스 파일 키 (삭제 필터 키)
pub const SOURCE_FILE_KEY: &str = "source_file";

// ============================================================================
// Types
// ============================================================================

/// 검색 가능한 텍스트 단위
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// 정제된 청크 텍스트
    pub text: String,
    /// 원본 파일 이름 (경로가 아닌 basename)
    pub source_file: String,
}

impl DocumentChunk {
    pub fn new(text: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_file: source_file.into(),
        }
    }
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    /// 유사도 스코어 (높을수록 유사)
    pub score: f32,
}

/// 인덱스 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub total_vector_count: u64,
    pub dimension: Option<usize>,
}

/// 거리 측정 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
    Dotproduct,
}

/// 인덱스 생성 명세
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub cloud: String,
    pub region: String,
}

impl IndexSpec {
    /// 서버리스 기본값 (cosine, aws, us-east-1)
    pub fn serverless(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric: Metric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 벡터 인덱스 게이트웨이 (async)
///
/// 임베딩은 구현체 내부에서 수행합니다. 호출자는 텍스트 청크만 다룹니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 인덱스 존재 여부
    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// 인덱스 생성
    async fn create_index(&self, spec: &IndexSpec) -> Result<()>;

    /// 인덱스 통계 조회
    async fn describe_stats(&self) -> Result<IndexStats>;

    /// 청크 업서트 (한 배치)
    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<usize>;

    /// `source_file ∈ source_files` 인 벡터 삭제
    ///
    /// 경로가 아닌 파일 이름으로 매칭하므로, 이름이 같은 다른 폴더의 파일도 함께 삭제됩니다.
    async fn delete_by_source_files(&self, source_files: &[String]) -> Result<()>;

    /// 질의와 가장 유사한 청크 `top_k`개
    async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>>;
}

/// 존재하지 않으면 인덱스 생성
pub async fn ensure_index(index: &dyn VectorIndex, spec: &IndexSpec) -> Result<bool> {
    if index.index_exists(&spec.name).await? {
        tracing::info!("Using existing index '{}'", spec.name);
        return Ok(false);
    }

    tracing::info!(
        "Index '{}' not found, creating (dimension={}, metric={:?})",
        spec.name,
        spec.dimension,
        spec.metric
    );
    index.create_index(spec).await?;
    Ok(true)
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 삭제 필터 생성: `{"source_file": {"$in": [...]}}`
pub fn source_file_filter(source_files: &[String]) -> serde_json::Value {
    serde_json::json!({ SOURCE_FILE_KEY: { "$in": source_files } })
}

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
