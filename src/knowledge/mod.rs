//! Knowledge 모듈 - 문서 동기화 및 벡터 인덱스
//!
//! - Hasher: 파일 내용 SHA-256 지문
//! - Manifest: 인덱스별 임베딩 기록부 (JSON)
//! - Chunker: 텍스트 정제 + 재귀 문자 분할
//! - Vector: 벡터 인덱스 게이트웨이 (Pinecone / 메모리)
//! - Sync: 증분 동기화 상태 머신

pub mod chunker;
pub mod hasher;
pub mod manifest;
mod memory;
mod pinecone;
pub mod sync;
mod vector;

// Re-exports
pub use chunker::{clean_text, ChunkConfig, Chunker, RecursiveChunker};
pub use hasher::{fingerprint, fingerprint_bytes};
pub use manifest::{EmbeddingManifest, FileFingerprints, LEGACY_INDEX_NAME};
pub use memory::InMemoryVectorIndex;
pub use pinecone::PineconeIndex;
pub use sync::{plan_sync, DocumentSynchronizer, SyncPlan, SyncReport};
pub use vector::{
    cosine_similarity, ensure_index, source_file_filter, DocumentChunk, IndexSpec, IndexStats,
    Metric, ScoredChunk, VectorIndex, SOURCE_FILE_KEY,
};
