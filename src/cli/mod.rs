//! CLI 모듈
//!
//! carbon-doc-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::agent::{open_index, DocumentRagAgent};
use crate::config::AppConfig;
use crate::embedding::{EmbeddingProvider, OpenAiCompatibleEmbedding};
use crate::extractor::create_parser;
use crate::knowledge::{
    plan_sync, DocumentSynchronizer, EmbeddingManifest, PineconeIndex, SyncPlan, SyncReport,
    VectorIndex,
};
use crate::rag::is_error_answer;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "carbon-doc-rag")]
#[command(version, about = "탄소 배출 문서 동기화 및 RAG 질의응답", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 경로 / 인덱스 재정의 (환경변수보다 우선)
#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// 감시할 문서 폴더
    #[arg(long)]
    pub docs_dir: Option<PathBuf>,

    /// 임베딩 기록부 (manifest) 경로
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// 벡터 인덱스 이름
    #[arg(long)]
    pub index: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서 폴더를 벡터 인덱스와 동기화
    Sync {
        #[command(flatten)]
        paths: PathArgs,

        /// Pinecone 대신 메모리 인덱스 사용 (테스트용)
        #[arg(long)]
        memory_index: bool,
    },

    /// 동기화 계획만 출력 (인덱스 변경 없음)
    Plan {
        #[command(flatten)]
        paths: PathArgs,
    },

    /// 문서 기반 질의응답
    Ask {
        /// 질문
        question: String,

        /// 검색할 청크 개수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[command(flatten)]
        paths: PathArgs,

        /// Pinecone 대신 메모리 인덱스 사용
        #[arg(long)]
        memory_index: bool,
    },

    /// 상태 확인
    Status {
        /// 임베딩 기록부 (manifest) 경로
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// 벡터 인덱스 이름
        #[arg(long)]
        index: Option<String>,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync {
            paths,
            memory_index,
        } => cmd_sync(&paths, memory_index).await,
        Commands::Plan { paths } => cmd_plan(&paths).await,
        Commands::Ask {
            question,
            top_k,
            paths,
            memory_index,
        } => cmd_ask(&question, top_k, &paths, memory_index).await,
        Commands::Status { manifest, index } => {
            let paths = PathArgs {
                manifest,
                index,
                ..Default::default()
            };
            cmd_status(&paths).await
        }
    }
}

/// 환경변수 설정 로드 후 CLI 재정의 적용
fn load_config(paths: &PathArgs) -> Result<AppConfig> {
    let mut config = AppConfig::from_env().context("설정 로드 실패")?;
    apply_overrides(&mut config, paths);
    Ok(config)
}

fn apply_overrides(config: &mut AppConfig, paths: &PathArgs) {
    if let Some(ref dir) = paths.docs_dir {
        config.sync.docs_dir = dir.clone();
    }
    if let Some(ref manifest) = paths.manifest {
        config.sync.manifest_path = manifest.clone();
    }
    if let Some(ref index) = paths.index {
        config.sync.index_name = index.clone();
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 동기화 명령어 (sync)
async fn cmd_sync(paths: &PathArgs, memory_index: bool) -> Result<()> {
    let config = load_config(paths)?;
    let config = if memory_index {
        config.for_memory_index()
    } else {
        config
    };

    println!(
        "[*] 문서 동기화: {} -> '{}'",
        config.sync.docs_dir.display(),
        config.sync.index_name
    );

    let index = open_index(&config, memory_index)
        .await
        .context("벡터 인덱스 열기 실패")?;
    let parser = create_parser(&config)?;
    println!("[*] 문서 파서: {}", parser.name());

    let synchronizer = DocumentSynchronizer::new(config.sync.clone(), index, parser);
    let report = synchronizer.run().await.context("동기화 실패")?;

    print_report(&report);
    Ok(())
}

/// 계획 명령어 (plan)
async fn cmd_plan(paths: &PathArgs) -> Result<()> {
    let config = load_config(paths)?;
    let plan = plan_sync(&config.sync).context("동기화 계획 계산 실패")?;

    if plan.is_empty() {
        println!("[OK] 변경 사항 없음 ('{}')", config.sync.index_name);
        if !plan.unreadable.is_empty() {
            print_section("읽기 실패 (건너뜀)", &plan.unreadable);
        }
        return Ok(());
    }

    print_plan(&plan);
    Ok(())
}

/// 질의 명령어 (ask)
async fn cmd_ask(
    question: &str,
    top_k: Option<usize>,
    paths: &PathArgs,
    memory_index: bool,
) -> Result<()> {
    let mut config = load_config(paths)?;
    if let Some(k) = top_k {
        config.rag.top_k = k.max(1);
    }

    println!("[*] 에이전트 초기화 중...");
    let agent = DocumentRagAgent::initialize(&config, memory_index)
        .await
        .context("에이전트 초기화 실패")?;

    match agent.sync_report() {
        Some(report) if !report.is_noop() => print_report(report),
        Some(_) => {}
        None => println!("[!] 문서 동기화 실패: 기존 인덱스로 답변합니다."),
    }

    println!("[*] 질문: {}", truncate_text(question, 100));
    let answer = agent.ask(question).await;

    if is_error_answer(&answer) {
        println!("[!] {}", answer);
    } else {
        println!("[OK] 답변:\n");
        println!("{}", answer);
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(paths: &PathArgs) -> Result<()> {
    println!("carbon-doc-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = load_config(paths)?;

    // 프로바이더
    match &config.provider {
        Some(provider) => println!(
            "[OK] LLM: {} (chat: {}, embedding: {} / {}d)",
            provider.provider.name(),
            provider.chat_model,
            provider.embedding_model,
            provider.embedding_dimension
        ),
        None => {
            println!("[!] LLM API 키: 미설정");
            println!("    설정: export UPSTAGE_API_KEY=your-key (또는 OPENAI_API_KEY)");
        }
    }

    if config.pinecone.is_some() {
        println!("[OK] Pinecone API 키: 설정됨");
    } else {
        println!("[!] Pinecone API 키: 미설정");
    }
    println!("[*] 문서 파서: {:?}", config.parser);
    println!("[*] 문서 폴더: {}", config.sync.docs_dir.display());

    // manifest
    let manifest_path = &config.sync.manifest_path;
    match std::fs::metadata(manifest_path) {
        Ok(meta) => println!(
            "[*] manifest: {} ({})",
            manifest_path.display(),
            format_bytes(meta.len() as usize)
        ),
        Err(_) => println!("[!] manifest 없음: {}", manifest_path.display()),
    }

    match EmbeddingManifest::peek(manifest_path, &config.sync.index_name) {
        Ok(manifest) => {
            for name in manifest.index_names() {
                let count = manifest.index_entries(name).map(|e| e.len()).unwrap_or(0);
                let marker = if name == manifest.index_name() { "*" } else { " " };
                println!("    {} {:<24} {} 파일", marker, name, count);
            }
        }
        Err(e) => println!("[!] manifest 읽기 실패: {}", e),
    }

    // 벡터 인덱스 상태 (키가 모두 있을 때만)
    if let (Some(provider), Some(pinecone)) = (&config.provider, &config.pinecone) {
        let result = async {
            let embedder: Arc<dyn EmbeddingProvider> =
                Arc::new(OpenAiCompatibleEmbedding::new(provider)?);
            let index = PineconeIndex::new(pinecone, &config.sync.index_name, embedder)?;
            if !index.index_exists(&config.sync.index_name).await? {
                return Ok(None);
            }
            Ok::<_, anyhow::Error>(Some(index.describe_stats().await?))
        }
        .await;

        match result {
            Ok(Some(stats)) => println!(
                "[OK] 벡터 인덱스 '{}': {} 벡터",
                config.sync.index_name, stats.total_vector_count
            ),
            Ok(None) => println!("[!] 벡터 인덱스 '{}' 없음", config.sync.index_name),
            Err(e) => {
                tracing::debug!("벡터 통계 조회 실패: {:#}", e);
                println!("[!] 벡터 인덱스 상태 조회 실패");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Output Helpers
// ============================================================================

fn print_section<'a, I>(label: &str, files: I)
where
    I: IntoIterator<Item = &'a String>,
{
    let files: Vec<&String> = files.into_iter().collect();
    if files.is_empty() {
        return;
    }
    println!("  {} ({}):", label, files.len());
    for file in files {
        println!("    - {}", file);
    }
}

fn print_plan(plan: &SyncPlan) {
    println!(
        "[*] 동기화 계획: 신규 {} / 수정 {} / 삭제 {}",
        plan.new.len(),
        plan.modified.len(),
        plan.deleted.len()
    );
    print_section("신규", &plan.new);
    print_section("수정", &plan.modified);
    print_section("삭제", &plan.deleted);
    print_section("읽기 실패 (건너뜀)", &plan.unreadable);
}

fn print_report(report: &SyncReport) {
    if report.repaired {
        println!("[!] manifest와 인덱스가 불일치하여 기록을 초기화했습니다.");
    }

    if report.is_noop() {
        println!("[OK] 변경 사항 없음 ('{}')", report.index_name);
        return;
    }

    print_plan(&report.plan);

    if report.purge_failed {
        println!("[!] 기존 벡터 삭제 실패 (다음 동기화에서 중복이 남을 수 있음)");
    }

    println!(
        "[OK] 임베딩 완료: {} 파일, {} 청크 ({:.1}s)",
        report.embedded.len(),
        report.chunks_upserted,
        report.elapsed().num_milliseconds() as f64 / 1000.0
    );

    print_section("내용 없음 (건너뜀)", &report.skipped_empty);

    if !report.failed.is_empty() {
        println!("[!] 실패 ({}):", report.failed.len());
        for (file, error) in &report.failed {
            println!("    - {}: {}", file, truncate_text(error, 120));
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("배출권 거래제 안내", 3), "배출권...");
    }

    #[test]
    fn test_apply_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([("PINECONE_INDEX", "from-env")]);
        let mut config = AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.sync.index_name, "from-env");

        let paths = PathArgs {
            docs_dir: Some(PathBuf::from("pdfs")),
            manifest: None,
            index: Some("from-cli".to_string()),
        };
        apply_overrides(&mut config, &paths);

        assert_eq!(config.sync.index_name, "from-cli");
        assert_eq!(config.sync.docs_dir, PathBuf::from("pdfs"));
        assert_eq!(
            config.sync.manifest_path,
            PathBuf::from("agent/embedding_manifest.json")
        );
    }

    #[test]
    fn test_cli_parses_sync_flags() {
        let cli = Cli::try_parse_from([
            "carbon-doc-rag",
            "sync",
            "--docs-dir",
            "docs",
            "--index",
            "carbon-test",
            "--memory-index",
        ])
        .unwrap();

        match cli.command {
            Commands::Sync {
                paths,
                memory_index,
            } => {
                assert!(memory_index);
                assert_eq!(paths.index.as_deref(), Some("carbon-test"));
                assert_eq!(paths.docs_dir, Some(PathBuf::from("docs")));
            }
            _ => panic!("expected sync command"),
        }
    }

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::try_parse_from(["carbon-doc-rag", "ask", "과태료 기준은?", "-k", "5"]).unwrap();
        match cli.command {
            Commands::Ask {
                question, top_k, ..
            } => {
                assert_eq!(question, "과태료 기준은?");
                assert_eq!(top_k, Some(5));
            }
            _ => panic!("expected ask command"),
        }
    }
}
