//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.
//! 외부 API 없이 동작하는 로컬 파서입니다.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::DocumentParser;

/// PDF에서 페이지별 텍스트 추출
///
/// 페이지 번호는 1부터 시작합니다. 텍스트가 없으면 빈 벡터를 반환합니다.
pub fn extract_text_from_pdf(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .collect())
}

/// PDF 텍스트를 폼피드(`\x0c`) 기준으로 페이지 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    text.split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 로컬 PDF 파서
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextParser;

#[async_trait]
impl DocumentParser for PdfTextParser {
    async fn parse(&self, path: &Path) -> Result<String> {
        // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || extract_text_from_pdf(&owned))
            .await
            .context("PDF extraction task failed")??;

        tracing::debug!("Extracted {} pages from {:?}", pages.len(), path);
        Ok(pages
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn name(&self) -> &str {
        "pdf-extract"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_pdf_pages_with_formfeed() {
        let text = "Page 1 content\x0cPage 2 content\x0cPage 3 content";
        let pages = split_pdf_pages(text);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], "Page 1 content");
        assert_eq!(pages[1], "Page 2 content");
    }

    #[test]
    fn test_split_pdf_pages_drops_blank_pages() {
        let pages = split_pdf_pages("first\x0c   \x0csecond");
        assert_eq!(pages, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_split_pdf_pages_no_separator() {
        let pages = split_pdf_pages("Just some text without page breaks");
        assert_eq!(pages.len(), 1);
    }

    #[tokio::test]
    async fn test_parse_invalid_pdf_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        assert!(PdfTextParser.parse(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_parse_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(PdfTextParser
            .parse(&temp_dir.path().join("missing.pdf"))
            .await
            .is_err());
    }
}
