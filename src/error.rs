//! 에러 타입
//!
//! 동기화 패스 전체를 중단시키는 치명적 에러와 설정 에러만 타입으로 정의합니다.
//! 파일 단위 실패는 `anyhow::Error`로 기록하고 패스를 계속 진행합니다.

use std::path::PathBuf;

use thiserror::Error;

/// 동기화 패스 치명적 에러
///
/// 이 에러가 반환되면 해당 패스에서 manifest는 저장되지 않습니다.
#[derive(Debug, Error)]
pub enum SyncError {
    /// 문서 폴더가 없음
    #[error("문서 폴더를 찾을 수 없습니다: {0}")]
    DocsDirMissing(PathBuf),

    /// 문서 폴더 스캔 실패
    #[error("문서 폴더 스캔 실패 ({path}): {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// manifest 읽기 실패 (파싱 실패가 아닌 IO 에러)
    #[error("manifest 읽기 실패 ({path}): {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// manifest 쓰기 실패
    #[error("manifest 저장 실패 ({path}): {source}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// manifest 직렬화 실패
    #[error("manifest 직렬화 실패: {0}")]
    ManifestEncode(#[from] serde_json::Error),
}

/// 설정 에러
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API 키가 설정되지 않았습니다: {0}")]
    MissingKey(&'static str),

    #[error("잘못된 설정값 {key}={value}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}
