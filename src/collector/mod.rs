//! 문서 수집 모듈
//!
//! 감시 폴더에서 동기화 대상 파일 목록을 수집합니다.
//! 하위 폴더는 탐색하지 않으며, 확장자는 대소문자를 구분하지 않습니다.

use std::collections::BTreeSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::SyncError;

/// 확장자가 일치하는지 확인 (대소문자 무시, 선행 `.` 허용)
pub fn has_extension(path: &Path, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

/// 폴더 바로 아래의 대상 파일 경로 수집
///
/// 반환 경로는 `dir`을 접두사로 가지며 manifest 키로 그대로 사용됩니다.
/// 폴더가 없거나 읽을 수 없으면 패스 전체가 중단됩니다.
pub fn scan_documents(dir: &Path, extension: &str) -> Result<BTreeSet<String>, SyncError> {
    if !dir.is_dir() {
        return Err(SyncError::DocsDirMissing(dir.to_path_buf()));
    }

    let mut files = BTreeSet::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| SyncError::Scan {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;

        if !entry.file_type().is_file() || !has_extension(entry.path(), extension) {
            continue;
        }

        files.insert(entry.path().to_string_lossy().into_owned());
    }

    tracing::debug!("Scanned {:?}: {} .{} files", dir, files.len(), extension);
    Ok(files)
}

/// 경로에서 파일 이름만 추출 (벡터 메타데이터 `source_file` 값)
pub fn source_file_name(file_path: &str) -> String {
    Path::new(file_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.to_string())
}

// ============================================================================
// Tests
// ============================================================================
