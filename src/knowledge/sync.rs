//! Document Synchronizer - 증분 임베딩 동기화
//!
//! 한 번의 동기화 패스는 다음 순서로 진행됩니다.
//!
//! ```text
//! INIT → INCONSISTENCY_CHECK → DIFF → PURGE → EMBED → PERSIST → DONE
//! ```
//!
//! - 변경이 없으면 DIFF 직후 종료하며 인덱스와 manifest를 건드리지 않습니다.
//! - 파일 단위 실패는 로그만 남기고 다음 패스에서 재시도됩니다.
//! - 패스 전체 실패(`SyncError`)는 manifest 로드 실패와 폴더 스캔 실패뿐입니다.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::collector::{scan_documents, source_file_name};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::extractor::DocumentParser;

use super::chunker::{clean_text, RecursiveChunker};
use super::hasher::fingerprint;
use super::manifest::EmbeddingManifest;
use super::vector::VectorIndex;

// ============================================================================
// SyncPlan
// ============================================================================

/// 한 패스의 변경 집합 (서로소, 경로 정렬)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// 지문 계산에 실패해 이번 패스에서 제외된 기존 파일
    pub unreadable: BTreeSet<String>,
}

impl SyncPlan {
    /// manifest와 디스크 파일 목록 비교
    pub fn compute<F>(manifest: &EmbeddingManifest, on_disk: &BTreeSet<String>, hash: F) -> Self
    where
        F: Fn(&str) -> std::io::Result<String>,
    {
        let known = manifest.known_files();
        let mut plan = SyncPlan {
            new: on_disk.difference(&known).cloned().collect(),
            deleted: known.difference(on_disk).cloned().collect(),
            ..Default::default()
        };

        for path in known.intersection(on_disk) {
            match hash(path) {
                Ok(current) => {
                    if manifest.get_fingerprint(path) != Some(current.as_str()) {
                        plan.modified.insert(path.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to fingerprint {}, skipping this pass: {}", path, e);
                    plan.unreadable.insert(path.clone());
                }
            }
        }

        plan
    }

    /// `new ∪ modified`
    pub fn files_to_embed(&self) -> BTreeSet<String> {
        self.new.union(&self.modified).cloned().collect()
    }

    /// `modified ∪ deleted`
    pub fn files_to_purge(&self) -> BTreeSet<String> {
        self.modified.union(&self.deleted).cloned().collect()
    }

    /// 변경 없음
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// 설정의 폴더와 manifest로 변경 집합 계산
///
/// 인덱스를 호출하지 않고 manifest 파일도 바꾸지 않습니다.
pub fn plan_sync(config: &SyncConfig) -> Result<SyncPlan, SyncError> {
    let manifest = EmbeddingManifest::peek(&config.manifest_path, &config.index_name)?;
    let on_disk = scan_documents(&config.docs_dir, &config.file_extension)?;
    Ok(SyncPlan::compute(&manifest, &on_disk, |p| fingerprint(Path::new(p))))
}

// ============================================================================
// SyncReport
// ============================================================================

/// 동기화 패스 결과
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub index_name: String,
    pub plan: SyncPlan,
    /// manifest/인덱스 불일치로 기록을 초기화했는지
    pub repaired: bool,
    /// 삭제 요청 실패 여부 (패스는 계속 진행)
    pub purge_failed: bool,
    pub embedded: Vec<String>,
    /// 파싱 결과가 비어 건너뛴 파일
    pub skipped_empty: Vec<String>,
    /// (파일 경로, 에러 메시지)
    pub failed: Vec<(String, String)>,
    pub chunks_upserted: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn start(index_name: &str) -> Self {
        let now = Utc::now();
        Self {
            index_name: index_name.to_string(),
            plan: SyncPlan::default(),
            repaired: false,
            purge_failed: false,
            embedded: Vec::new(),
            skipped_empty: Vec::new(),
            failed: Vec::new(),
            chunks_upserted: 0,
            started_at: now,
            finished_at: now,
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// 인덱스와 manifest를 건드리지 않고 끝난 패스
    pub fn is_noop(&self) -> bool {
        self.plan.is_empty()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

// ============================================================================
// DocumentSynchronizer
// ============================================================================

/// 파일 하나의 EMBED 결과
enum FileOutcome {
    Embedded { fingerprint: String, chunks: usize },
    Empty,
}

/// 문서 폴더와 벡터 인덱스 동기화기
pub struct DocumentSynchronizer {
    config: SyncConfig,
    index: Arc<dyn VectorIndex>,
    parser: Arc<dyn DocumentParser>,
    chunker: RecursiveChunker,
}

impl DocumentSynchronizer {
    pub fn new(
        config: SyncConfig,
        index: Arc<dyn VectorIndex>,
        parser: Arc<dyn DocumentParser>,
    ) -> Self {
        let chunker = RecursiveChunker::new(config.chunk.clone());
        Self {
            config,
            index,
            parser,
            chunker,
        }
    }

    /// 변경 집합만 계산 (인덱스 호출 없음)
    pub async fn plan(&self) -> Result<SyncPlan, SyncError> {
        plan_sync(&self.config)
    }

    /// 동기화 패스 1회 실행
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::start(&self.config.index_name);

        // INIT
        let mut manifest =
            EmbeddingManifest::load(&self.config.manifest_path, &self.config.index_name)?;

        // INCONSISTENCY_CHECK
        match self.index.describe_stats().await {
            Ok(stats) if manifest.file_count() > 0 && stats.total_vector_count == 0 => {
                tracing::warn!(
                    "Manifest lists {} files for '{}' but the index is empty; resetting manifest",
                    manifest.file_count(),
                    self.config.index_name
                );
                manifest.reset_index();
                manifest.save()?;
                report.repaired = true;
            }
            Ok(stats) => {
                tracing::debug!("Index holds {} vectors", stats.total_vector_count);
            }
            Err(e) => {
                tracing::warn!("Index stats unavailable, continuing with manifest as-is: {:#}", e);
            }
        }

        // DIFF
        let on_disk = scan_documents(&self.config.docs_dir, &self.config.file_extension)?;
        let plan = SyncPlan::compute(&manifest, &on_disk, |p| fingerprint(Path::new(p)));
        report.plan = plan.clone();

        if plan.is_empty() {
            tracing::info!("No document changes for '{}'", self.config.index_name);
            return Ok(report.finish());
        }

        tracing::info!(
            "Sync plan: {} new, {} modified, {} deleted",
            plan.new.len(),
            plan.modified.len(),
            plan.deleted.len()
        );

        // PURGE (파일 이름 기준)
        let purge: Vec<String> = plan
            .files_to_purge()
            .iter()
            .map(|p| source_file_name(p))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !purge.is_empty() {
            if let Err(e) = self.index.delete_by_source_files(&purge).await {
                tracing::warn!("Failed to delete vectors for {:?}: {:#}", purge, e);
                report.purge_failed = true;
            }
        }
        manifest.forget(&plan.deleted);

        // EMBED (정렬된 순서, 결과 반영은 이 태스크에서만)
        let files: Vec<String> = plan.files_to_embed().into_iter().collect();
        let concurrency = self.config.embed_concurrency.max(1);
        let mut outcomes = std::pin::pin!(stream::iter(files)
            .map(|path| async move {
                let outcome = self.embed_file(&path).await;
                (path, outcome)
            })
            .buffered(concurrency));

        while let Some((path, outcome)) = outcomes.next().await {
            match outcome {
                Ok(FileOutcome::Embedded {
                    fingerprint,
                    chunks,
                }) => {
                    tracing::info!("Embedded {} ({} chunks)", path, chunks);
                    manifest.set_fingerprint(path.clone(), fingerprint);
                    report.chunks_upserted += chunks;
                    report.embedded.push(path);
                }
                Ok(FileOutcome::Empty) => {
                    tracing::warn!("No content parsed from {}, will retry next pass", path);
                    report.skipped_empty.push(path);
                }
                Err(e) => {
                    tracing::warn!("Failed to embed {}: {:#}", path, e);
                    report.failed.push((path, format!("{:#}", e)));
                }
            }
        }

        // PERSIST
        manifest.save()?;

        let report = report.finish();
        tracing::info!(
            "Sync finished: {} embedded, {} empty, {} failed, {} chunks in {}ms",
            report.embedded.len(),
            report.skipped_empty.len(),
            report.failed.len(),
            report.chunks_upserted,
            report.elapsed().num_milliseconds()
        );
        Ok(report)
    }

    /// 파일 하나 처리: 지문 → 파싱 → 정제/분할 → 배치 업서트
    async fn embed_file(&self, path: &str) -> Result<FileOutcome> {
        let limit = self.config.file_timeout;
        match tokio::time::timeout(limit, self.embed_file_inner(path)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("timed out after {}", format_duration(limit))),
        }
    }

    async fn embed_file_inner(&self, path: &str) -> Result<FileOutcome> {
        // 파싱 전에 지문을 계산해 업로드 중 수정된 파일은 다음 패스에서 다시 감지
        let file_fingerprint =
            fingerprint(Path::new(path)).with_context(|| format!("Failed to fingerprint {}", path))?;

        let raw = self
            .parser
            .parse(Path::new(path))
            .await
            .with_context(|| format!("{} failed to parse {}", self.parser.name(), path))?;

        let cleaned = clean_text(&raw);
        if cleaned.is_empty() {
            return Ok(FileOutcome::Empty);
        }

        let chunks = self
            .chunker
            .split_document(&cleaned, &source_file_name(path));
        if chunks.is_empty() {
            return Ok(FileOutcome::Empty);
        }

        let batch_size = self.config.upsert_batch_size.max(1);
        let batch_count = chunks.len().div_ceil(batch_size);
        for (i, batch) in chunks.chunks(batch_size).enumerate() {
            self.index
                .upsert(batch)
                .await
                .with_context(|| format!("Upsert batch {}/{} failed", i + 1, batch_count))?;
        }

        Ok(FileOutcome::Embedded {
            fingerprint: file_fingerprint,
            chunks: chunks.len(),
        })
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:03}s", secs, duration.subsec_millis())
    }
}

// ============================================================================
// Tests
// ============================================================================
