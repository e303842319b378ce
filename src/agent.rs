//! 문서 RAG 에이전트
//!
//! 설정으로부터 프로바이더와 인덱스를 구성하고, 동기화 패스를 한 번 실행한 뒤
//! 질문에 답변합니다.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::embedding::{EmbeddingProvider, OpenAiCompatibleEmbedding};
use crate::error::ConfigError;
use crate::extractor::{create_parser, DocumentParser};
use crate::knowledge::{
    ensure_index, DocumentSynchronizer, InMemoryVectorIndex, IndexSpec, PineconeIndex,
    SyncReport, VectorIndex,
};
use crate::llm::{ChatProvider, OpenAiCompatibleChat};
use crate::rag::{PromptTemplate, RagAnswerer};

/// 문서 RAG 에이전트
pub struct DocumentRagAgent {
    index: Arc<dyn VectorIndex>,
    answerer: RagAnswerer,
    sync_report: Option<SyncReport>,
}

impl DocumentRagAgent {
    /// 설정으로 초기화
    ///
    /// `use_memory_index`가 참이면 Pinecone 대신 프로세스 메모리 인덱스를 사용하고,
    /// manifest 기록은 [`AppConfig::for_memory_index`] 네임스페이스에 남깁니다.
    pub async fn initialize(config: &AppConfig, use_memory_index: bool) -> Result<Self> {
        let config = if use_memory_index {
            config.for_memory_index()
        } else {
            config.clone()
        };
        let provider = config.require_provider()?;
        let index = open_index(&config, use_memory_index).await?;
        let parser = create_parser(&config)?;
        let chat: Arc<dyn ChatProvider> =
            Arc::new(OpenAiCompatibleChat::new(provider).context("채팅 프로바이더 생성 실패")?);

        Ok(Self::assemble(&config, index, parser, Some(chat)).await)
    }

    /// 구성 요소로 에이전트 조립 후 동기화 1회 실행
    ///
    /// 동기화 실패는 기록만 하고, 기존 인덱스 내용으로 답변을 계속합니다.
    pub async fn assemble(
        config: &AppConfig,
        index: Arc<dyn VectorIndex>,
        parser: Arc<dyn DocumentParser>,
        chat: Option<Arc<dyn ChatProvider>>,
    ) -> Self {
        let synchronizer = DocumentSynchronizer::new(config.sync.clone(), index.clone(), parser);
        let sync_report = match synchronizer.run().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("Document sync failed: {}", e);
                None
            }
        };

        let template = PromptTemplate::load_or_default(config.rag.prompt_file.as_deref());
        let answerer = RagAnswerer::new(index.clone(), chat, template, config.rag.top_k);

        Self {
            index,
            answerer,
            sync_report,
        }
    }

    /// 질문에 답변 (실패 시 `[오류]`로 시작하는 답변)
    pub async fn ask(&self, question: &str) -> String {
        self.answerer.ask(question).await
    }

    /// 초기화 시 실행한 동기화 결과 (실패했으면 None)
    pub fn sync_report(&self) -> Option<&SyncReport> {
        self.sync_report.as_ref()
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }
}

/// 벡터 인덱스 열기 (없으면 생성)
///
/// 메모리 인덱스는 LLM 키 없이도 열 수 있으며, 이 경우 토큰 겹침으로 검색합니다.
pub async fn open_index(
    config: &AppConfig,
    use_memory_index: bool,
) -> Result<Arc<dyn VectorIndex>> {
    let embedder: Option<Arc<dyn EmbeddingProvider>> = match &config.provider {
        Some(provider) => Some(Arc::new(
            OpenAiCompatibleEmbedding::new(provider).context("임베딩 프로바이더 생성 실패")?,
        )),
        None => None,
    };
    let dimension = embedder.as_ref().map(|e| e.dimension()).unwrap_or(0);
    let mut spec = IndexSpec::serverless(&config.sync.index_name, dimension);

    let index: Arc<dyn VectorIndex> = if use_memory_index {
        match embedder {
            Some(embedder) => Arc::new(InMemoryVectorIndex::with_embedder(embedder)),
            None => Arc::new(InMemoryVectorIndex::new()),
        }
    } else {
        let embedder =
            embedder.ok_or(ConfigError::MissingKey("UPSTAGE_API_KEY or OPENAI_API_KEY"))?;
        let pinecone = config.require_pinecone()?;
        spec.cloud = pinecone.cloud.clone();
        spec.region = pinecone.region.clone();
        Arc::new(PineconeIndex::new(pinecone, &config.sync.index_name, embedder)?)
    };

    ensure_index(index.as_ref(), &spec)
        .await
        .with_context(|| format!("인덱스 준비 실패: {}", spec.name))?;
    Ok(index)
}
