//! 설정 모듈
//!
//! 프로세스 시작 시 환경변수(및 `.env`)에서 한 번 읽어 각 컴포넌트 생성자에 주입합니다.
//! LLM 프로바이더는 import 시점 탐색이 아닌 설정값으로 선택합니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::knowledge::ChunkConfig;

/// 기본 Pinecone 인덱스 이름
pub const DEFAULT_INDEX_NAME: &str = "carbon-multiagent";

/// 메모리 인덱스 실행 시 manifest 네임스페이스에 붙는 접미사
pub const MEMORY_INDEX_SUFFIX: &str = "-memory";

/// Upstage document-parse 요청 하나당 페이지 수
pub const DEFAULT_PARSE_PAGE_BATCH: usize = 10;

// ============================================================================
// LLM Provider
// ============================================================================

/// LLM / 임베딩 프로바이더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Upstage,
    OpenAi,
}

impl LlmProvider {
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Upstage => "upstage",
            LlmProvider::OpenAi => "openai",
        }
    }

    /// OpenAI 호환 API 기본 주소
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Upstage => "https://api.upstage.ai/v1",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_chat_model(&self) -> &'static str {
        match self {
            LlmProvider::Upstage => "solar-mini",
            LlmProvider::OpenAi => "gpt-4.1-nano",
        }
    }

    pub fn default_embedding_model(&self) -> &'static str {
        match self {
            LlmProvider::Upstage => "embedding-query",
            LlmProvider::OpenAi => "text-embedding-3-small",
        }
    }

    /// 임베딩 모델 차원 (알 수 없는 모델은 프로바이더 기본값)
    pub fn embedding_dimension(&self, model: &str) -> usize {
        match (self, model) {
            (LlmProvider::OpenAi, "text-embedding-3-large") => 3072,
            (LlmProvider::OpenAi, _) => 1536,
            (LlmProvider::Upstage, _) => 4096,
        }
    }

    fn api_key_var(&self) -> &'static str {
        match self {
            LlmProvider::Upstage => "UPSTAGE_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upstage" => Ok(LlmProvider::Upstage),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(format!("unknown provider '{}' (upstage | openai)", other)),
        }
    }
}

/// 문서 파서 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// Upstage document-parse API
    Upstage,
    /// 로컬 pdf-extract
    Local,
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upstage" => Ok(ParserKind::Upstage),
            "local" => Ok(ParserKind::Local),
            other => Err(format!("unknown parser '{}' (upstage | local)", other)),
        }
    }
}

// ============================================================================
// Config Sections
// ============================================================================

/// LLM / 임베딩 프로바이더 설정
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub request_timeout: Duration,
}

/// Pinecone 설정
#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub cloud: String,
    pub region: String,
    pub request_timeout: Duration,
}

/// 동기화 설정
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 감시할 문서 폴더
    pub docs_dir: PathBuf,
    /// 임베딩 기록부 경로
    pub manifest_path: PathBuf,
    /// 벡터 인덱스 이름 (manifest 네임스페이스)
    pub index_name: String,
    /// 대상 파일 확장자
    pub file_extension: String,
    pub chunk: ChunkConfig,
    /// 업서트 배치 크기 (청크 수)
    pub upsert_batch_size: usize,
    /// EMBED 단계 동시 처리 파일 수
    pub embed_concurrency: usize,
    /// 파일 하나(파싱 + 청킹 + 업서트)의 제한 시간
    pub file_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("docs"),
            manifest_path: PathBuf::from("agent/embedding_manifest.json"),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            file_extension: "pdf".to_string(),
            chunk: ChunkConfig::default(),
            upsert_batch_size: 20,
            embed_concurrency: 1,
            file_timeout: Duration::from_secs(600),
        }
    }
}

/// RAG 답변 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub top_k: usize,
    pub prompt_file: Option<PathBuf>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            prompt_file: None,
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// LLM 키가 없으면 `None` (status / plan 명령은 키 없이 동작)
    pub provider: Option<ProviderConfig>,
    pub pinecone: Option<PineconeConfig>,
    pub parser: ParserKind,
    pub upstage_api_key: Option<String>,
    /// document-parse 분할 업로드 단위 (페이지 수)
    pub parse_page_batch: usize,
    pub sync: SyncConfig,
    pub rag: RagConfig,
}

impl AppConfig {
    /// 환경변수에서 로드 (`.env` 파일이 있으면 먼저 읽음)
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로부터 로드
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let request_timeout = Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 60u64)?);
        let upstage_api_key = get("UPSTAGE_API_KEY");

        // 프로바이더: 명시값 > Upstage 키 > OpenAI 키
        let provider = match get("LLM_PROVIDER") {
            Some(raw) => Some(raw.parse::<LlmProvider>().map_err(|reason| {
                ConfigError::InvalidValue {
                    key: "LLM_PROVIDER",
                    value: raw.clone(),
                    reason,
                }
            })?),
            None if upstage_api_key.is_some() => Some(LlmProvider::Upstage),
            None if get("OPENAI_API_KEY").is_some() => Some(LlmProvider::OpenAi),
            None => None,
        };

        let provider = match provider {
            Some(provider) => {
                let api_key = get(provider.api_key_var())
                    .ok_or(ConfigError::MissingKey(provider.api_key_var()))?;
                let embedding_model = get("EMBEDDING_MODEL")
                    .unwrap_or_else(|| provider.default_embedding_model().to_string());
                let embedding_dimension = parse_or(
                    &get,
                    "EMBEDDING_DIMENSION",
                    provider.embedding_dimension(&embedding_model),
                )?;
                Some(ProviderConfig {
                    provider,
                    api_key,
                    base_url: get("LLM_BASE_URL")
                        .unwrap_or_else(|| provider.default_base_url().to_string()),
                    chat_model: get("CHAT_MODEL")
                        .unwrap_or_else(|| provider.default_chat_model().to_string()),
                    embedding_model,
                    embedding_dimension,
                    request_timeout,
                })
            }
            None => None,
        };

        let pinecone = get("PINECONE_API_KEY").map(|api_key| PineconeConfig {
            api_key,
            cloud: get("PINECONE_CLOUD").unwrap_or_else(|| "aws".to_string()),
            region: get("PINECONE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            request_timeout,
        });

        let parser = match get("DOC_PARSER") {
            Some(raw) => raw.parse::<ParserKind>().map_err(|reason| ConfigError::InvalidValue {
                key: "DOC_PARSER",
                value: raw.clone(),
                reason,
            })?,
            None if upstage_api_key.is_some() => ParserKind::Upstage,
            None => ParserKind::Local,
        };

        let defaults = SyncConfig::default();
        let chunk = ChunkConfig {
            chunk_size: positive(&get, "CHUNK_SIZE", defaults.chunk.chunk_size)?,
            chunk_overlap: parse_or(&get, "CHUNK_OVERLAP", defaults.chunk.chunk_overlap)?,
        };
        chunk.validate().map_err(|e| ConfigError::InvalidValue {
            key: "CHUNK_OVERLAP",
            value: chunk.chunk_overlap.to_string(),
            reason: e.to_string(),
        })?;

        let sync = SyncConfig {
            docs_dir: get("DOCS_DIR").map(PathBuf::from).unwrap_or(defaults.docs_dir),
            manifest_path: get("MANIFEST_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.manifest_path),
            index_name: get("PINECONE_INDEX").unwrap_or(defaults.index_name),
            file_extension: get("DOC_EXTENSION").unwrap_or(defaults.file_extension),
            chunk,
            upsert_batch_size: positive(&get, "UPSERT_BATCH_SIZE", defaults.upsert_batch_size)?,
            embed_concurrency: positive(&get, "EMBED_CONCURRENCY", defaults.embed_concurrency)?,
            file_timeout: Duration::from_secs(positive(
                &get,
                "FILE_TIMEOUT_SECS",
                defaults.file_timeout.as_secs() as usize,
            )? as u64),
        };

        let rag = RagConfig {
            top_k: positive(&get, "RAG_TOP_K", RagConfig::default().top_k)?,
            prompt_file: get("RAG_PROMPT_FILE").map(PathBuf::from),
        };

        Ok(Self {
            provider,
            pinecone,
            parser,
            upstage_api_key,
            parse_page_batch: positive(&get, "PARSE_PAGE_BATCH", DEFAULT_PARSE_PAGE_BATCH)?,
            sync,
            rag,
        })
    }

    /// 메모리 인덱스 실행용 설정
    ///
    /// 프로세스가 끝나면 사라지는 인덱스이므로 manifest 기록을 별도 네임스페이스에 둡니다.
    /// 같은 이름을 쓰면 실제 인덱스에 올라가지 않은 파일이 임베딩된 것으로 기록됩니다.
    pub fn for_memory_index(&self) -> AppConfig {
        let mut config = self.clone();
        config.sync.index_name = format!("{}{}", self.sync.index_name, MEMORY_INDEX_SUFFIX);
        config
    }

    /// LLM 프로바이더 설정 (없으면 에러)
    pub fn require_provider(&self) -> Result<&ProviderConfig, ConfigError> {
        self.provider
            .as_ref()
            .ok_or(ConfigError::MissingKey("UPSTAGE_API_KEY or OPENAI_API_KEY"))
    }

    /// Pinecone 설정 (없으면 에러)
    pub fn require_pinecone(&self) -> Result<&PineconeConfig, ConfigError> {
        self.pinecone
            .as_ref()
            .ok_or(ConfigError::MissingKey("PINECONE_API_KEY"))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn positive<G>(get: &G, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(value)
}

// ============================================================================
// Tests
// ============================================================================
