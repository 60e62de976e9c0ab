//! Text Chunking Module
//!
//! 구분자 계층(문단 → 줄 → 문장 → 단어 → 문자)을 따라 문서를 분할합니다.
//! 가능한 가장 큰 구분자에서 잘라 문장이 깨지는 것을 최소화하고,
//! 인접 청크는 정확히 `overlap` 문자만큼 겹칩니다.
//!
//! 모든 길이는 바이트가 아닌 문자(char) 단위입니다.

use std::ops::Range;

use thiserror::Error;

use super::document::{Chunk, Document};

/// 구분자 계층 (큰 단위부터)
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", " "];

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 인접 청크 간 오버랩 (문자 수, `chunk_size` 미만)
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 450,
            overlap: 50,
        }
    }
}

impl ChunkConfig {
    /// 검증된 설정 생성
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(ChunkError::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// 오버랩을 제외한 본문 크기
    fn body_budget(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// 청킹 에러
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Invalid chunk config: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 문서를 청크로 분할 (빈 문서는 빈 Vec)
    fn chunk(&self, document: &Document) -> Vec<Chunk>;

    /// 여러 문서를 순서대로 분할
    fn chunk_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents.iter().flat_map(|doc| self.chunk(doc)).collect()
    }

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// RecursiveChunker
// ============================================================================

/// 구분자 계층 기반 재귀 청커
pub struct RecursiveChunker {
    config: ChunkConfig,
}

impl RecursiveChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 기본 설정(450/50)으로 생성
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 텍스트를 청크 문자열로 분할
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        if char_len(text) <= self.config.chunk_size {
            return vec![text.to_string()];
        }

        let mut bodies = Vec::new();
        split_range(
            text,
            0..text.len(),
            SEPARATORS,
            self.config.body_budget(),
            &mut bodies,
        );

        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| {
                let start = if i == 0 {
                    body.start
                } else {
                    back_chars(text, body.start, self.config.overlap)
                };
                text[start..body.end].to_string()
            })
            .collect()
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let texts = self.split_text(&document.text);
        if texts.is_empty() {
            tracing::warn!("No chunks generated for empty document: {}", document.id);
            return vec![];
        }

        tracing::debug!("Chunked {} into {} chunks", document.id, texts.len());

        texts
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| Chunk::from_document(document, ordinal, text))
            .collect()
    }

    fn name(&self) -> &'static str {
        "RecursiveChunker"
    }
}

// ============================================================================
// Splitting
// ============================================================================

/// `range` 구간을 `budget` 이하 본문 구간들로 분할
///
/// 결과 구간들은 원문에서 연속적이며 합치면 `range` 전체가 됩니다.
fn split_range(
    text: &str,
    range: Range<usize>,
    separators: &[&str],
    budget: usize,
    out: &mut Vec<Range<usize>>,
) {
    let slice = &text[range.clone()];
    if char_len(slice) <= budget {
        out.push(range);
        return;
    }

    let Some(level) = separators.iter().position(|sep| slice.contains(sep)) else {
        split_by_chars(text, range, budget, out);
        return;
    };
    let finer = &separators[level + 1..];

    let mut current: Option<Range<usize>> = None;
    let mut current_len = 0;

    for segment in segments_keeping_separator(slice, separators[level]) {
        let segment = (range.start + segment.start)..(range.start + segment.end);
        let segment_len = char_len(&text[segment.clone()]);

        // 구분자 하나로도 예산 초과 → 더 작은 구분자로 재귀
        if segment_len > budget {
            if let Some(cur) = current.take() {
                out.push(cur);
            }
            current_len = 0;
            split_range(text, segment, finer, budget, out);
            continue;
        }

        if current.is_some() && current_len + segment_len <= budget {
            if let Some(cur) = current.as_mut() {
                cur.end = segment.end;
            }
            current_len += segment_len;
        } else {
            if let Some(cur) = current.replace(segment) {
                out.push(cur);
            }
            current_len = segment_len;
        }
    }

    if let Some(cur) = current {
        out.push(cur);
    }
}

/// 구분자를 앞 조각 끝에 붙인 채로 분할 (상대 구간 반환)
fn segments_keeping_separator(text: &str, separator: &str) -> Vec<Range<usize>> {
    let mut segments = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        segments.push(start..end);
        start = end;
    }

    if start < text.len() {
        segments.push(start..text.len());
    }

    segments
}

/// 구분자가 없는 구간을 문자 단위로 자르기
fn split_by_chars(text: &str, range: Range<usize>, budget: usize, out: &mut Vec<Range<usize>>) {
    let mut start = range.start;
    let mut count = 0;

    for (offset, _) in text[range.clone()].char_indices() {
        if count == budget {
            out.push(start..range.start + offset);
            start = range.start + offset;
            count = 0;
        }
        count += 1;
    }

    if start < range.end {
        out.push(start..range.end);
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// `index`에서 `n` 문자 앞의 바이트 위치 (문서 시작에서 멈춤)
fn back_chars(text: &str, index: usize, n: usize) -> usize {
    if n == 0 {
        return index;
    }
    text[..index]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정을 지정한 청커 생성
pub fn recursive_chunker(config: ChunkConfig) -> Result<Box<dyn Chunker>, ChunkError> {
    Ok(Box::new(RecursiveChunker::new(config)?))
}

// ============================================================================
// Tests
// ============================================================================
