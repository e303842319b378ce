//! Upstage Document Parse 클라이언트
//!
//! PDF를 페이지 묶음으로 나눠 `document-digitization` 엔드포인트에 차례로 업로드하고,
//! 각 응답의 `content.html`을 일반 텍스트로 변환해 이어 붙입니다.
//! 동기 엔드포인트는 요청당 페이지 수 제한이 있어 긴 규정 문서는 분할이 필요합니다.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Node};
use serde::Deserialize;

use super::DocumentParser;
use crate::config::DEFAULT_PARSE_PAGE_BATCH;
use crate::embedding::snippet;

const DOCUMENT_PARSE_URL: &str = "https://api.upstage.ai/v1/document-digitization";
const DOCUMENT_PARSE_MODEL: &str = "document-parse";

/// 줄바꿈으로 구분할 블록 요소
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "table", "tr", "caption",
    "header", "footer", "section", "article", "figure", "figcaption", "blockquote", "br",
];

/// 텍스트에서 제외할 요소
const SKIP_TAGS: &[&str] = &["script", "style", "img"];

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    content: ParseContent,
}

#[derive(Debug, Default, Deserialize)]
struct ParseContent {
    #[serde(default)]
    html: String,
    #[serde(default)]
    text: String,
}

impl ParseContent {
    /// HTML이 있으면 텍스트로 변환, 없으면 평문 사용
    fn into_text(self) -> String {
        if !self.html.trim().is_empty() {
            html_to_text(&self.html)
        } else {
            self.text
        }
    }
}

/// Upstage 문서 파서
pub struct UpstageDocumentParser {
    api_key: String,
    url: String,
    client: reqwest::Client,
    page_batch: usize,
}

impl UpstageDocumentParser {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("HTTP 클라이언트 생성 실패")?;

        Ok(Self {
            api_key: api_key.into(),
            url: DOCUMENT_PARSE_URL.to_string(),
            client,
            page_batch: DEFAULT_PARSE_PAGE_BATCH,
        })
    }

    /// 요청 하나당 페이지 수 지정
    pub fn with_page_batch(mut self, pages: usize) -> Self {
        self.page_batch = pages.max(1);
        self
    }

    /// 분할된 PDF 하나 업로드
    async fn parse_part(&self, bytes: Vec<u8>, file_name: String) -> Result<ParseContent> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .context("Invalid MIME type")?;
        let form = reqwest::multipart::Form::new()
            .text("model", DOCUMENT_PARSE_MODEL)
            .text("ocr", "auto")
            .text("base64_encoding", "['figure']")
            .part("document", part);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Document parse request failed")?;

        let status = response.status();
        let body = response.text().await.context("응답 본문 읽기 실패")?;
        if !status.is_success() {
            anyhow::bail!("Upstage document parse error ({}): {}", status, snippet(&body));
        }

        let parsed: ParseResponse =
            serde_json::from_str(&body).context("Failed to parse document-parse response")?;
        Ok(parsed.content)
    }
}

#[async_trait]
impl DocumentParser for UpstageDocumentParser {
    async fn parse(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read document: {:?}", path))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let page_batch = self.page_batch;
        let split_name = file_name.clone();
        let parts = tokio::task::spawn_blocking(move || match split_pdf(&bytes, page_batch) {
            Ok(parts) => parts,
            Err(e) => {
                // 분할에 실패하면 원본 그대로 한 번에 업로드
                tracing::warn!(
                    "Could not split {} into pages, uploading whole file: {:#}",
                    split_name,
                    e
                );
                vec![bytes]
            }
        })
        .await
        .context("PDF split task failed")?;

        tracing::info!(
            "Parsing {} via Upstage ({} part(s) of up to {} pages)",
            file_name,
            parts.len(),
            page_batch
        );

        let single = parts.len() == 1;
        let (whole_name, stem) = (&file_name, &stem);
        join_parts(&file_name, parts, move |i, part| {
            let name = if single {
                whole_name.clone()
            } else {
                format!("{}_{}.pdf", stem, i + 1)
            };
            self.parse_part(part, name)
        })
        .await
    }

    fn name(&self) -> &str {
        "upstage-document-parse"
    }
}

/// PDF를 `pages_per_part` 페이지씩 나눈 PDF 바이트 목록
///
/// 페이지 수가 한 묶음 이하이면 원본 바이트 하나를 그대로 돌려줍니다.
pub fn split_pdf(bytes: &[u8], pages_per_part: usize) -> Result<Vec<Vec<u8>>> {
    let document = lopdf::Document::load_mem(bytes).context("Failed to load PDF")?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    let pages_per_part = pages_per_part.max(1);
    if pages.len() <= pages_per_part {
        return Ok(vec![bytes.to_vec()]);
    }

    let mut parts = Vec::with_capacity(pages.len().div_ceil(pages_per_part));
    for range in pages.chunks(pages_per_part) {
        let (first, last) = (range[0], range[range.len() - 1]);
        let others: Vec<u32> = pages
            .iter()
            .copied()
            .filter(|p| *p < first || *p > last)
            .collect();

        let mut part = document.clone();
        part.delete_pages(&others);
        part.prune_objects();

        let mut buf = Vec::new();
        part.save_to(&mut buf)
            .with_context(|| format!("Failed to write pages {}-{}", first, last))?;
        parts.push(buf);
    }
    Ok(parts)
}

/// 분할 업로드 결과를 순서대로 이어 붙임
///
/// 일부 묶음이 실패해도 나머지 결과로 계속하고, 모두 실패하면 마지막 에러를 반환합니다.
async fn join_parts<F, Fut>(
    file_name: &str,
    parts: Vec<Vec<u8>>,
    mut parse_part: F,
) -> Result<String>
where
    F: FnMut(usize, Vec<u8>) -> Fut,
    Fut: Future<Output = Result<ParseContent>>,
{
    let total = parts.len();
    let mut texts = Vec::with_capacity(total);
    let mut last_error = None;

    for (i, part) in parts.into_iter().enumerate() {
        match parse_part(i, part).await {
            Ok(content) => {
                let text = content.into_text();
                tracing::debug!(
                    "{} part {}/{}: {} chars",
                    file_name,
                    i + 1,
                    total,
                    text.chars().count()
                );
                texts.push(text);
            }
            Err(e) => {
                tracing::warn!("{} part {}/{} failed: {:#}", file_name, i + 1, total, e);
                last_error = Some(e);
            }
        }
    }

    if texts.is_empty() {
        if let Some(e) = last_error {
            return Err(e.context(format!("All {} part(s) of {} failed", total, file_name)));
        }
    }

    Ok(texts
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// HTML을 텍스트로 변환 (블록 요소는 줄바꿈으로 구분)
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    collect_text(fragment.root_element(), &mut out);

    out.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            // 원문 줄바꿈은 블록 경계가 아니므로 공백으로 취급
            Node::Text(text) => out.push_str(&text.replace(['\n', '\r'], " ")),
            Node::Element(_) => {
                let Some(child_element) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child_element.value().name();
                if SKIP_TAGS.contains(&name) {
                    continue;
                }
                let is_block = BLOCK_TAGS.contains(&name);
                if is_block {
                    out.push('\n');
                }
                collect_text(child_element, out);
                if is_block {
                    out.push('\n');
                } else if name == "td" || name == "th" {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_blocks() {
        let html = r#"<h1 id='0'>온실가스 배출권</h1><p id='1'>할당 대상 업체는
            매년 보고해야 합니다.</p><br><p>두 번째 문단</p>"#;
        let text = html_to_text(html);
        assert_eq!(
            text,
            "온실가스 배출권\n할당 대상 업체는 매년 보고해야 합니다.\n두 번째 문단"
        );
    }

    #[test]
    fn test_html_to_text_table_and_images() {
        let html = r#"<table><tr><td>연도</td><td>배출량</td></tr><tr><td>2023</td><td>100</td></tr></table><figure><img src="data:image/png;base64,AAAA" alt="chart"></figure>"#;
        let text = html_to_text(html);
        assert_eq!(text, "연도 배출량\n2023 100");
    }

    #[test]
    fn test_html_to_text_empty() {
        assert_eq!(html_to_text(""), "");
    }

    #[test]
    fn test_parse_response_defaults() {
        let parsed: ParseResponse = serde_json::from_str(r#"{"api":"2.0"}"#).unwrap();
        assert!(parsed.content.html.is_empty());
        assert!(parsed.content.text.is_empty());
    }

    #[test]
    fn test_parser_name() {
        let parser = UpstageDocumentParser::new("key", Duration::from_secs(5)).unwrap();
        assert_eq!(parser.name(), "upstage-document-parse");
        assert_eq!(parser.page_batch, DEFAULT_PARSE_PAGE_BATCH);
        assert_eq!(parser.with_page_batch(0).page_batch, 1);
    }

    /// 빈 페이지 `count`장짜리 PDF
    fn blank_pdf(count: u32) -> Vec<u8> {
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for _ in 0..count {
            let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
            });
            kids.push(Object::Reference(page_id));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn page_count(bytes: &[u8]) -> usize {
        lopdf::Document::load_mem(bytes).unwrap().get_pages().len()
    }

    #[test]
    fn test_split_pdf_into_page_batches() {
        let parts = split_pdf(&blank_pdf(23), 10).unwrap();
        let counts: Vec<usize> = parts.iter().map(|p| page_count(p)).collect();
        assert_eq!(counts, vec![10, 10, 3]);
    }

    #[test]
    fn test_split_short_pdf_keeps_original() {
        let original = blank_pdf(4);
        let parts = split_pdf(&original, 10).unwrap();
        assert_eq!(parts, vec![original]);
    }

    #[test]
    fn test_split_invalid_pdf_is_error() {
        assert!(split_pdf(b"not a pdf", 10).is_err());
    }

    #[tokio::test]
    async fn test_join_parts_skips_failed_part() {
        let parts = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let text = join_parts("law.pdf", parts, |i, _| async move {
            if i == 1 {
                anyhow::bail!("502 Bad Gateway");
            }
            Ok(ParseContent {
                html: format!("<h1>제{}장</h1><p>배출권 할당</p>", i + 1),
                text: String::new(),
            })
        })
        .await
        .unwrap();

        assert_eq!(text, "제1장\n배출권 할당\n제3장\n배출권 할당");
    }

    #[tokio::test]
    async fn test_join_parts_all_failed_is_error() {
        let parts = vec![b"a".to_vec(), b"b".to_vec()];
        let result = join_parts("law.pdf", parts, |_, _| async move {
            Err::<ParseContent, _>(anyhow::anyhow!("401 Unauthorized"))
        })
        .await;

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("All 2 part(s) of law.pdf failed"));
        assert!(message.contains("401 Unauthorized"));
    }

    #[tokio::test]
    async fn test_join_parts_uses_plain_text_without_html() {
        let text = join_parts("memo.pdf", vec![Vec::new()], |_, _| async move {
            Ok::<_, anyhow::Error>(ParseContent {
                html: String::new(),
                text: "온실가스 감축".to_string(),
            })
        })
        .await
        .unwrap();
        assert_eq!(text, "온실가스 감축");
    }
}
