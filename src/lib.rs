//! carbon-doc-rag - 탄소 배출 문서 동기화 및 RAG 질의응답
//!
//! PDF 문서 폴더를 벡터 인덱스와 증분 동기화하고,
//! 검색된 문맥으로 LLM 답변을 생성합니다.

pub mod agent;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod llm;
pub mod rag;

// Re-exports
pub use agent::{open_index, DocumentRagAgent};
pub use config::{AppConfig, LlmProvider, ParserKind, ProviderConfig, SyncConfig};
pub use embedding::{EmbeddingProvider, OpenAiCompatibleEmbedding};
pub use error::{ConfigError, SyncError};
pub use extractor::{DocumentParser, PdfTextParser, UpstageDocumentParser};
pub use knowledge::{
    DocumentChunk, DocumentSynchronizer, EmbeddingManifest, InMemoryVectorIndex, PineconeIndex,
    SyncPlan, SyncReport, VectorIndex,
};
pub use llm::{ChatProvider, OpenAiCompatibleChat};
pub use rag::{is_error_answer, PromptTemplate, RagAnswerer, ERROR_PREFIX};
