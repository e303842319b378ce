//! Text Chunking Module
//!
//! 파싱된 문서 텍스트를 정제하고 겹치는 고정 크기 청크로 분할합니다.
//!
//! 분할 우선순위: 문단(`\n\n`) → 줄(`\n`) → 문장(`. `) → 단어(` `) → 문자.
//! 길이는 모두 문자(char) 단위입니다.

use std::sync::OnceLock;

use regex::Regex;

use super::vector::DocumentChunk;

/// 기본 분할 구분자 (우선순위 순)
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 인접 청크 간 오버랩 (문자 수)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> anyhow::Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정 유효성 검사
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        Ok(())
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// Text Cleaning
// ============================================================================

fn reference_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // [그림 1], [표 1-1], [Figure 2.3], [Table 4]
    RE.get_or_init(|| Regex::new(r"\[(그림|표|Figure|Table)\s*[\d.\-]+\]").expect("valid regex"))
}

fn page_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(페이지|Page)\s+\d+").expect("valid regex"))
}

fn leader_dots_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.{5,}").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// 문서 텍스트 정제
///
/// 참조 태그, 페이지 표시, 목차 점선을 제거한 뒤 공백을 하나로 합치고 양끝을 자릅니다.
/// 제거 규칙은 더 이상 바뀌지 않을 때까지 반복 적용하므로
/// `clean_text(clean_text(x)) == clean_text(x)` 입니다.
pub fn clean_text(raw: &str) -> String {
    let mut text = raw.to_string();

    loop {
        let before = text.len();
        text = reference_tag_re().replace_all(&text, "").into_owned();
        text = page_marker_re().replace_all(&text, "").into_owned();
        text = leader_dots_re().replace_all(&text, "").into_owned();
        if text.len() == before {
            break;
        }
    }

    whitespace_re().replace_all(&text, " ").trim().to_string()
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 재귀 문자 분할기
///
/// 가장 우선순위가 높은 구분자로 나눈 뒤, `chunk_size`를 넘는 조각만
/// 다음 구분자로 다시 나눕니다. 구분자는 뒤 조각의 앞에 붙여 보존합니다.
/// 더 나눌 수 없는 단일 조각만 `chunk_size`를 넘을 수 있습니다.
pub struct RecursiveChunker {
    config: ChunkConfig,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 정제된 텍스트를 소스 파일 메타데이터가 붙은 청크로 분할
    pub fn split_document(&self, cleaned: &str, source_file: &str) -> Vec<DocumentChunk> {
        self.chunk(cleaned)
            .into_iter()
            .map(|text| DocumentChunk::new(text, source_file))
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        // 텍스트에 실제로 존재하는 첫 구분자 선택
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut rest: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep.as_str();
                rest = &separators[i + 1..];
                break;
            }
        }

        let splits = split_keep_separator(text, separator);

        let mut good_splits: Vec<String> = Vec::new();
        for piece in splits {
            if char_len(&piece) < self.config.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if rest.is_empty() {
                final_chunks.push(piece);
            } else {
                final_chunks.extend(self.split_recursive(&piece, rest));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    /// 작은 조각들을 `chunk_size` 이내로 합치고, 뒤 청크에 오버랩을 남김
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut docs = Vec::new();
        let mut current: Vec<(&str, usize)> = Vec::new();
        let mut start = 0usize;
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);

            if total + len > size && current.len() > start {
                if total > size {
                    tracing::debug!("Created a chunk of size {}, which is longer than {}", total, size);
                }
                if let Some(doc) = join_pieces(&current[start..]) {
                    docs.push(doc);
                }

                // 오버랩 크기 이하가 될 때까지 앞 조각 제거
                while start < current.len()
                    && (total > overlap || (total + len > size && total > 0))
                {
                    total -= current[start].1;
                    start += 1;
                }
            }

            current.push((piece.as_str(), len));
            total += len;
        }

        if let Some(doc) = join_pieces(&current[start..]) {
            docs.push(doc);
        }

        docs
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        self.split_recursive(text, &self.separators)
            .into_iter()
            .filter(|c| !c.is_empty())
            .collect()
    }

    fn name(&self) -> &'static str {
        "RecursiveChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 구분자를 뒤 조각의 앞에 붙여 분할 (빈 조각 제거)
///
/// 빈 구분자는 문자 단위 분할입니다.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut last = 0;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[last..idx]);
        last = idx;
    }
    pieces.push(&text[last..]);

    pieces
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_pieces(pieces: &[(&str, usize)]) -> Option<String> {
    let joined: String = pieces.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> RecursiveChunker {
        RecursiveChunker::new(ChunkConfig::new(size, overlap).unwrap())
    }

    #[test]
    fn test_clean_removes_reference_tags() {
        let cleaned = clean_text("배출권 [그림 1] 할당 [표 1-1] 기준 [Figure 2.3] 및 [Table 4]");
        assert_eq!(cleaned, "배출권 할당 기준 및");
    }

    #[test]
    fn test_clean_removes_page_markers_and_dots() {
        let cleaned = clean_text("목차..........3\n\n페이지 10\tPage 11 본문");
        assert_eq!(cleaned, "목차3 본문");
    }

    #[test]
    fn test_clean_keeps_short_dot_runs() {
        assert_eq!(clean_text("계속....  된다"), "계속.... 된다");
    }

    #[test]
    fn test_clean_collapses_whitespace() {
        assert_eq!(clean_text("  a \n\n b\t\tc  "), "a b c");
    }

    #[test]
    fn test_clean_idempotent() {
        let inputs = [
            "plain text",
            "[그림 [표 1]1] nested tag",
            "....[표 1]. leader dots",
            "Page [표 2]5 glued page marker",
            "  \n페이지\n\n12  ...... [Table 3.1]  끝 ",
            "",
        ];
        for input in inputs {
            let once = clean_text(input);
            assert_eq!(clean_text(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_chunker_empty() {
        let chunks = RecursiveChunker::with_defaults().chunk("   ");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_document_single_chunk() {
        let cleaned = clean_text("hello world");
        let chunks = chunker(100, 10).split_document(&cleaned, "doc1.pdf");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, cleaned);
        assert_eq!(chunks[0].source_file, "doc1.pdf");
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..200)
            .map(|i| format!("문장 번호 {} 입니다", i))
            .collect::<Vec<_>>()
            .join(". ");
        let chunks = chunker(120, 20).chunk(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 120, "chunk too long: {}", char_len(chunk));
        }
    }

    #[test]
    fn test_chunks_overlap() {
        let text = (0..60).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunker(40, 15).chunk(&text);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(
                pair[1].split(' ').any(|w| w == last_word),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_chunks_reconstruct_text() {
        let text = (0..80).map(|i| format!("t{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunker(50, 12).chunk(&text);

        // 오버랩 구간을 제거하며 이어붙이면 원문 단어열이 복원됨
        let mut words: Vec<String> = Vec::new();
        for chunk in &chunks {
            let chunk_words: Vec<&str> = chunk.split(' ').collect();
            let mut skip = 0;
            for k in (1..=chunk_words.len().min(words.len())).rev() {
                if words[words.len() - k..]
                    .iter()
                    .zip(&chunk_words[..k])
                    .all(|(a, b)| a == b)
                {
                    skip = k;
                    break;
                }
            }
            words.extend(chunk_words[skip..].iter().map(|w| w.to_string()));
        }
        assert_eq!(words.join(" "), text);
    }

    #[test]
    fn test_atomic_unit_falls_back_to_characters() {
        let text = "가".repeat(25);
        let chunks = chunker(10, 0).chunk(&text);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let text = format!("{}\n\n{}", "a ".repeat(20).trim(), "b ".repeat(20).trim());
        let chunks = chunker(50, 0).chunk(&text);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with('a') && !chunks[0].contains('b'));
        assert!(chunks[1].starts_with('b'));
    }

    #[test]
    fn test_split_keep_separator() {
        assert_eq!(
            split_keep_separator("a. b. c", ". "),
            vec!["a", ". b", ". c"]
        );
        assert_eq!(split_keep_separator(". a", ". "), vec![". a"]);
        assert_eq!(split_keep_separator("ab", ""), vec!["a", "b"]);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkConfig::new(100, 100).is_err());
        assert!(ChunkConfig::new(0, 0).is_err());

        let default = ChunkConfig::default();
        assert_eq!(default.chunk_size, 1500);
        assert_eq!(default.chunk_overlap, 200);
    }
}
