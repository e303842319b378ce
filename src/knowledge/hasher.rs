//! 파일 콘텐츠 지문 (SHA-256)
//!
//! 변경 감지 전용입니다. 악의적 변조 검증 용도가 아닙니다.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// 스트리밍 읽기 단위 (8 KiB)
const READ_CHUNK_SIZE: usize = 8192;

/// 파일의 SHA-256 hex 지문 계산
///
/// 파일이 없거나 읽을 수 없으면 IO 에러를 그대로 반환합니다.
pub fn fingerprint(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(to_hex(&hasher.finalize()))
}

/// 바이트 슬라이스의 SHA-256 hex 지문
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"%PDF-1.4 hello").unwrap();

        let first = fingerprint(&path).unwrap();
        let second = fingerprint(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_on_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"content").unwrap();
        let before = fingerprint(&path).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"!").unwrap();
        drop(file);

        let after = fingerprint(&path).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_matches_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();

        assert_eq!(
            fingerprint(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_spans_multiple_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.pdf");
        let data = vec![7u8; READ_CHUNK_SIZE * 3 + 17];
        std::fs::write(&path, &data).unwrap();

        assert_eq!(fingerprint(&path).unwrap(), fingerprint_bytes(&data));
    }

    #[test]
    fn test_fingerprint_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = fingerprint(&dir.path().join("nope.pdf"));
        assert!(result.is_err());
    }
}
