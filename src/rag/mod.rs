//! RAG 답변 모듈
//!
//! 질문 → 상위 k개 청크 검색 → 프롬프트 구성 → LLM 호출 → 답변 문자열.
//!
//! `ask()`는 실패해도 항상 문자열을 반환합니다. 실패 답변은 [`ERROR_PREFIX`]로
//! 시작하므로 호출자는 [`is_error_answer`]로 구분합니다.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::knowledge::{ScoredChunk, VectorIndex};
use crate::llm::ChatProvider;

/// 실패 답변 접두사
pub const ERROR_PREFIX: &str = "[오류]";

/// 검색된 청크 구분자
pub const CONTEXT_SEPARATOR: &str = "\n\n";

const DEFAULT_TEMPLATE: &str =
    "Answer the question based only on the following context:\n{context}\n\nQuestion: {question}";

/// 실패 답변인지 확인
pub fn is_error_answer(answer: &str) -> bool {
    answer.starts_with(ERROR_PREFIX)
}

fn error_answer(message: &str) -> String {
    format!("{} {}", ERROR_PREFIX, message)
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(context|question)\}").expect("valid regex"))
}

// ============================================================================
// PromptTemplate
// ============================================================================

/// `{context}` / `{question}` 자리표시자를 가진 프롬프트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// 템플릿 문자열 검증 후 생성
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for placeholder in ["{context}", "{question}"] {
            if !template.contains(placeholder) {
                anyhow::bail!("Prompt template is missing {}", placeholder);
            }
        }
        Ok(Self { template })
    }

    /// 파일에서 로드
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file: {:?}", path))?;
        Self::new(raw)
    }

    /// 파일이 있으면 로드, 실패하면 기본 템플릿
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::from_file(path) {
            Ok(template) => {
                tracing::info!("Loaded prompt template from {:?}", path);
                template
            }
            Err(e) => {
                tracing::warn!("Using default prompt template: {:#}", e);
                Self::default()
            }
        }
    }

    /// 자리표시자 치환 (삽입된 문맥 안의 중괄호는 다시 치환하지 않음)
    pub fn render(&self, context: &str, question: &str) -> String {
        placeholder_re()
            .replace_all(&self.template, |caps: &Captures| match &caps[1] {
                "context" => context.to_string(),
                _ => question.to_string(),
            })
            .into_owned()
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

/// 검색 결과를 문맥 문자열로 결합
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

// ============================================================================
// RagAnswerer
// ============================================================================

/// 문서 RAG 답변기
pub struct RagAnswerer {
    index: Arc<dyn VectorIndex>,
    chat: Option<Arc<dyn ChatProvider>>,
    template: PromptTemplate,
    top_k: usize,
}

impl RagAnswerer {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        chat: Option<Arc<dyn ChatProvider>>,
        template: PromptTemplate,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            chat,
            template,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// 질문에 답변 (실패 시 `[오류]` 답변)
    pub async fn ask(&self, question: &str) -> String {
        let Some(chat) = &self.chat else {
            return error_answer(
                "RAG 체인이 초기화되지 않았습니다. 에이전트 초기화 중 오류가 발생했을 수 있습니다.",
            );
        };

        match self.answer(chat.as_ref(), question).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("RAG answer failed: {:#}", e);
                error_answer("답변을 생성하는 동안 오류가 발생했습니다.")
            }
        }
    }

    async fn answer(&self, chat: &dyn ChatProvider, question: &str) -> Result<String> {
        let retrieved = self
            .index
            .similarity_search(question, self.top_k)
            .await
            .context("Retrieval failed")?;
        tracing::debug!("Retrieved {} chunks for question", retrieved.len());

        let prompt = self.template.render(&format_context(&retrieved), question);
        chat.complete(&prompt)
            .await
            .with_context(|| format!("LLM call failed ({})", chat.model()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::knowledge::{DocumentChunk, InMemoryVectorIndex};

    /// 받은 프롬프트를 기록하고 고정 답변을 반환
    struct EchoChat {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    impl EchoChat {
        fn new(fail: bool) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl ChatProvider for EchoChat {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                anyhow::bail!("503 Service Unavailable");
            }
            Ok("과태료는 최대 1천만원입니다.".to_string())
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    async fn seeded_index() -> Arc<dyn VectorIndex> {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(&[
                DocumentChunk::new("배출권 할당 기준은 매년 고시된다", "a.pdf"),
                DocumentChunk::new("보고 의무 위반 시 과태료 부과", "b.pdf"),
                DocumentChunk::new("과태료 금액은 1천만원 이하", "b.pdf"),
                DocumentChunk::new("탄소중립 기본법 개요", "c.pdf"),
            ])
            .await
            .unwrap();
        Arc::new(index)
    }

    #[tokio::test]
    async fn test_ask_without_chat_returns_error_answer() {
        let answerer = RagAnswerer::new(seeded_index().await, None, PromptTemplate::default(), 3);
        let answer = answerer.ask("과태료는?").await;
        assert!(is_error_answer(&answer));
        assert!(answer.contains("RAG 체인이 초기화되지 않았습니다"));
    }

    #[tokio::test]
    async fn test_ask_builds_prompt_from_top_k() {
        let chat = Arc::new(EchoChat::new(false));
        let answerer = RagAnswerer::new(
            seeded_index().await,
            Some(chat.clone() as Arc<dyn ChatProvider>),
            PromptTemplate::default(),
            2,
        );

        let answer = answerer.ask("과태료 금액").await;
        assert!(!is_error_answer(&answer));
        assert_eq!(answer, "과태료는 최대 1천만원입니다.");

        let prompts = chat.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Answer the question based only on the following context:\n"));
        assert!(prompts[0].contains("과태료 금액은 1천만원 이하\n\n"));
        assert!(prompts[0].ends_with("Question: 과태료 금액"));
        assert!(!prompts[0].contains("탄소중립"));
    }

    #[tokio::test]
    async fn test_llm_failure_returns_error_answer() {
        let answerer = RagAnswerer::new(
            seeded_index().await,
            Some(Arc::new(EchoChat::new(true))),
            PromptTemplate::default(),
            3,
        );
        let answer = answerer.ask("질문").await;
        assert_eq!(answer, "[오류] 답변을 생성하는 동안 오류가 발생했습니다.");
    }

    #[test]
    fn test_template_requires_placeholders() {
        assert!(PromptTemplate::new("{context} only").is_err());
        assert!(PromptTemplate::new("{question} only").is_err());
        assert!(PromptTemplate::new("문맥: {context}\n질문: {question}").is_ok());
    }

    #[test]
    fn test_render_does_not_expand_inserted_braces() {
        let template = PromptTemplate::new("C={context} Q={question}").unwrap();
        assert_eq!(template.render("{question}", "q"), "C={question} Q=q");
    }

    #[test]
    fn test_load_or_default() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("good.txt");
        let bad = temp_dir.path().join("bad.txt");
        std::fs::write(&good, "다음 문맥으로 답하세요.\n{context}\n질문: {question}").unwrap();
        std::fs::write(&bad, "no placeholders").unwrap();

        assert!(PromptTemplate::load_or_default(Some(good.as_path())).as_str().starts_with("다음 문맥"));
        assert_eq!(PromptTemplate::load_or_default(Some(bad.as_path())), PromptTemplate::default());
        assert_eq!(
            PromptTemplate::load_or_default(Some(temp_dir.path().join("missing.txt").as_path())),
            PromptTemplate::default()
        );
        assert_eq!(PromptTemplate::load_or_default(None), PromptTemplate::default());
    }

    #[test]
    fn test_format_context() {
        let chunks = vec![
            ScoredChunk {
                chunk: DocumentChunk::new("one", "a.pdf"),
                score: 0.9,
            },
            ScoredChunk {
                chunk: DocumentChunk::new("two", "b.pdf"),
                score: 0.8,
            },
        ];
        assert_eq!(format_context(&chunks), "one\n\ntwo");
    }
}
