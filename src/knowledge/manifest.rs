//! 임베딩 기록부 (embedding manifest)
//!
//! 인덱스별로 `{파일 경로 → SHA-256}` 를 JSON 파일에 기록합니다.
//!
//! ```json
//! {
//!     "carbon-multiagent": { "docs/a.pdf": "e3b0c4..." },
//!     "carbon-rag": { ... }
//! }
//! ```
//!
//! 이전 버전의 평면 구조(`{파일: 해시}`)는 최초 로드 시 `carbon-rag` 인덱스로
//! 옮겨지고 즉시 저장됩니다. 최상위 값 중 하나라도 객체이면 새 구조로 간주하므로
//! 마이그레이션은 한 번만 일어납니다.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::SyncError;

/// 이전 버전 manifest의 기본 인덱스 이름
pub const LEGACY_INDEX_NAME: &str = "carbon-rag";

/// 한 인덱스의 `{파일 경로 → 지문}` 매핑
pub type FileFingerprints = BTreeMap<String, String>;

// ============================================================================
// EmbeddingManifest
// ============================================================================

/// 임베딩 기록부
///
/// 동기화 패스 동안 `DocumentSynchronizer`가 단독으로 소유합니다.
/// 동시에 여러 프로세스가 같은 파일에 저장하면 마지막 저장이 이깁니다.
#[derive(Debug, Clone)]
pub struct EmbeddingManifest {
    path: PathBuf,
    index_name: String,
    indices: BTreeMap<String, FileFingerprints>,
}

impl EmbeddingManifest {
    /// 빈 기록부 생성 (디스크에 쓰지 않음)
    pub fn fresh(path: &Path, index_name: &str) -> Self {
        let mut indices = BTreeMap::new();
        indices.insert(index_name.to_string(), FileFingerprints::new());
        Self {
            path: path.to_path_buf(),
            index_name: index_name.to_string(),
            indices,
        }
    }

    /// 기록부 로드
    ///
    /// - 파일이 없으면 빈 기록부
    /// - JSON 파싱 실패 또는 비정상 구조면 경고 후 빈 기록부 (손상은 치명적이지 않음)
    /// - 이전 평면 구조면 마이그레이션 후 즉시 저장
    /// - 현재 인덱스가 없으면 메모리에만 빈 매핑 추가
    pub fn load(path: &Path, index_name: &str) -> Result<Self, SyncError> {
        let (manifest, migrated) = Self::read(path, index_name)?;
        if migrated {
            manifest.save()?;
        }
        Ok(manifest)
    }

    /// 읽기 전용 로드 (마이그레이션 결과를 디스크에 쓰지 않음)
    pub fn peek(path: &Path, index_name: &str) -> Result<Self, SyncError> {
        Self::read(path, index_name).map(|(manifest, _)| manifest)
    }

    /// 파일 해석. 두 번째 값은 이전 평면 구조에서 변환했는지 여부
    fn read(path: &Path, index_name: &str) -> Result<(Self, bool), SyncError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Manifest not found, starting fresh: {:?}", path);
                return Ok((Self::fresh(path, index_name), false));
            }
            Err(source) => {
                return Err(SyncError::ManifestRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    "Manifest is not valid JSON, discarding all records: {:?} ({})",
                    path,
                    e
                );
                return Ok((Self::fresh(path, index_name), false));
            }
        };

        let top = match value {
            Value::Object(map) if !map.is_empty() => map,
            Value::Object(_) => return Ok((Self::fresh(path, index_name), false)),
            other => {
                tracing::warn!(
                    "Manifest top level is not an object ({}), discarding all records: {:?}",
                    json_kind(&other),
                    path
                );
                return Ok((Self::fresh(path, index_name), false));
            }
        };

        // 최상위 값 중 객체가 하나도 없으면 이전 평면 구조
        if !top.values().any(Value::is_object) {
            tracing::warn!(
                "Legacy flat manifest detected, migrating records to index '{}'",
                LEGACY_INDEX_NAME
            );
            let legacy = string_entries(&top, LEGACY_INDEX_NAME);

            let mut indices = BTreeMap::new();
            indices.insert(LEGACY_INDEX_NAME.to_string(), legacy);
            indices
                .entry(index_name.to_string())
                .or_insert_with(FileFingerprints::new);

            let manifest = Self {
                path: path.to_path_buf(),
                index_name: index_name.to_string(),
                indices,
            };
            return Ok((manifest, true));
        }

        let mut indices = BTreeMap::new();
        for (name, files) in &top {
            match files {
                Value::Object(files) => {
                    indices.insert(name.clone(), string_entries(files, name));
                }
                other => {
                    tracing::warn!(
                        "Ignoring manifest entry '{}' ({} instead of object)",
                        name,
                        json_kind(other)
                    );
                }
            }
        }
        indices
            .entry(index_name.to_string())
            .or_insert_with(FileFingerprints::new);

        Ok((
            Self {
                path: path.to_path_buf(),
                index_name: index_name.to_string(),
                indices,
            },
            false,
        ))
    }

    /// 모든 인덱스 기록을 디스크에 저장
    ///
    /// 임시 파일에 쓴 뒤 rename 하므로 중간에 잘린 파일이 남지 않습니다.
    pub fn save(&self) -> Result<(), SyncError> {
        let bytes = self.to_json_bytes()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| SyncError::ManifestWrite {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }

        let tmp_path = temp_path(&self.path);
        std::fs::write(&tmp_path, &bytes)
            .and_then(|_| std::fs::rename(&tmp_path, &self.path))
            .map_err(|source| SyncError::ManifestWrite {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!("Manifest saved: {:?}", self.path);
        Ok(())
    }

    /// JSON 직렬화 (4칸 들여쓰기, 비ASCII 문자 그대로)
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, SyncError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.indices.serialize(&mut ser)?;
        Ok(buf)
    }

    /// 파일의 기록된 지문
    pub fn get_fingerprint(&self, file_path: &str) -> Option<&str> {
        self.indices
            .get(&self.index_name)
            .and_then(|files| files.get(file_path))
            .map(String::as_str)
    }

    /// 파일 지문 기록 (메모리)
    pub fn set_fingerprint(&mut self, file_path: impl Into<String>, fingerprint: impl Into<String>) {
        self.active_mut().insert(file_path.into(), fingerprint.into());
    }

    /// 현재 인덱스에 기록된 파일 경로 집합
    pub fn known_files(&self) -> BTreeSet<String> {
        self.indices
            .get(&self.index_name)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 현재 인덱스에서 파일 기록 제거 (없는 경로는 무시)
    pub fn forget<I, S>(&mut self, file_paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let files = self.active_mut();
        for path in file_paths {
            files.remove(path.as_ref());
        }
    }

    /// 현재 인덱스의 모든 기록 초기화 (다른 인덱스는 유지)
    pub fn reset_index(&mut self) {
        self.active_mut().clear();
    }

    /// 현재 인덱스에 기록된 파일 수
    pub fn file_count(&self) -> usize {
        self.indices
            .get(&self.index_name)
            .map(|files| files.len())
            .unwrap_or(0)
    }

    /// 기록부에 있는 모든 인덱스 이름
    pub fn index_names(&self) -> Vec<&str> {
        self.indices.keys().map(String::as_str).collect()
    }

    /// 특정 인덱스의 기록
    pub fn index_entries(&self, index_name: &str) -> Option<&FileFingerprints> {
        self.indices.get(index_name)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn active_mut(&mut self) -> &mut FileFingerprints {
        self.indices
            .entry(self.index_name.clone())
            .or_insert_with(FileFingerprints::new)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자열 값만 추출 (그 외 값은 경고 후 무시)
fn string_entries(map: &serde_json::Map<String, Value>, index_name: &str) -> FileFingerprints {
    map.iter()
        .filter_map(|(path, hash)| match hash {
            Value::String(h) => Some((path.clone(), h.clone())),
            other => {
                tracing::warn!(
                    "Ignoring non-string fingerprint for '{}' in index '{}' ({})",
                    path,
                    index_name,
                    json_kind(other)
                );
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

// ============================================================================
// Tests
// ============================================================================
