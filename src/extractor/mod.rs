//! 문서 파싱 모듈
//!
//! PDF 파일을 원문 텍스트로 변환합니다.
//! - Upstage Document Parse API (기본, API 키 필요, 페이지 묶음 단위 업로드)
//! - pdf-extract 로컬 추출 (폴백)

pub mod pdf;
pub mod upstage;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AppConfig, ParserKind};

pub use pdf::PdfTextParser;
pub use upstage::UpstageDocumentParser;

/// 문서 파서 트레이트
///
/// 빈 문자열은 "이번 패스에 임베딩할 내용 없음"으로 처리됩니다.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<String>;

    fn name(&self) -> &str;
}

/// 설정에 맞는 파서 생성
pub fn create_parser(config: &AppConfig) -> Result<Arc<dyn DocumentParser>> {
    match config.parser {
        ParserKind::Upstage => {
            let api_key = config
                .upstage_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DOC_PARSER=upstage requires UPSTAGE_API_KEY"))?;
            let timeout = config
                .provider
                .as_ref()
                .map(|p| p.request_timeout)
                .unwrap_or(std::time::Duration::from_secs(60));
            let parser = UpstageDocumentParser::new(api_key, timeout)?
                .with_page_batch(config.parse_page_batch);
            Ok(Arc::new(parser))
        }
        ParserKind::Local => Ok(Arc::new(PdfTextParser)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_create_local_parser() {
        let parser = create_parser(&config_from(&[])).unwrap();
        assert_eq!(parser.name(), "pdf-extract");
    }

    #[test]
    fn test_create_upstage_parser() {
        let parser = create_parser(&config_from(&[("UPSTAGE_API_KEY", "up-key")])).unwrap();
        assert_eq!(parser.name(), "upstage-document-parse");
    }

    #[test]
    fn test_upstage_parser_requires_key() {
        let config = config_from(&[("DOC_PARSER", "upstage")]);
        assert!(create_parser(&config).is_err());
    }
}
