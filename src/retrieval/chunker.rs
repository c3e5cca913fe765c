//! Text Chunking - 페이지 단위 텍스트를 검색 가능한 청크로 분할
//!
//! 자연 경계(문단 > 문장 > 단어)를 우선해서 자르고,
//! 경계가 없으면 chunk_size에서 강제로 자릅니다.
//! 청크 간 문맥 유지를 위해 직전 청크의 끝부분을 overlap으로 붙입니다.

use serde::{Deserialize, Serialize};

use crate::error::RagError;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
///
/// 크기는 전부 문자(char) 단위입니다.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 청크 본문 최대 크기 (문자 수)
    pub chunk_size: usize,
    /// 청크 간 중첩 크기 (문자 수)
    pub overlap: usize,
    /// 자연 경계를 탐색하는 chunk_size 아래 허용 범위 (문자 수)
    pub boundary_window: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
            boundary_window: 100,
        }
    }
}

impl ChunkConfig {
    /// 긴 문서용 설정 (청크를 크게, 중첩도 넉넉히)
    pub fn for_long_documents() -> Self {
        Self {
            chunk_size: 1500,
            overlap: 150,
            boundary_window: 300,
        }
    }

    /// 설정 검증: `0 < overlap < chunk_size`, window < chunk_size
    pub fn validate(&self) -> Result<(), RagError> {
        if self.overlap == 0 || self.overlap >= self.chunk_size {
            return Err(RagError::InvalidInput(format!(
                "overlap must satisfy 0 < overlap < chunk_size (got overlap={}, chunk_size={})",
                self.overlap, self.chunk_size
            )));
        }
        if self.boundary_window >= self.chunk_size {
            return Err(RagError::InvalidInput(format!(
                "boundary_window must be smaller than chunk_size (got window={}, chunk_size={})",
                self.boundary_window, self.chunk_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Types
// ============================================================================

/// 페이지 단위 텍스트 입력
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// 검색 단위 청크
///
/// 불변이며 재인덱싱 시 수정이 아닌 교체로 대체됩니다.
/// id는 (source, sequence_index) 조합당 유일합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_doc_id: String,
    pub page: u32,
    pub sequence_index: u32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

// ============================================================================
// ChunkSplitter
// ============================================================================

/// 텍스트 분할기
///
/// 페이지 경계에서는 항상 새 청크를 시작하며(중첩 없음),
/// 페이지 내 연속 청크는 직전 청크의 끝 `overlap`자로 시작합니다.
pub struct ChunkSplitter {
    config: ChunkConfig,
}

impl ChunkSplitter {
    /// 설정 검증 후 생성
    pub fn new(config: ChunkConfig) -> Result<Self, RagError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    /// 페이지 텍스트들을 청크 목록으로 분할
    ///
    /// - 빈 텍스트: 청크 0개
    /// - chunk_size보다 짧은 텍스트: 청크 1개
    /// - sequence_index는 source 전체에서 이어지는 일련번호
    pub fn split(&self, source_doc_id: &str, text_units: &[PageText]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut seq: u32 = 0;

        for unit in text_units {
            if unit.text.trim().is_empty() {
                continue;
            }

            let chars: Vec<char> = unit.text.chars().collect();
            let mut pos = 0;
            // 페이지 경계는 항상 새 청크 (중첩 없음)
            let mut prev_tail: Option<String> = None;

            while pos < chars.len() {
                let remaining = chars.len() - pos;
                let body_len = if remaining <= self.config.chunk_size {
                    remaining
                } else {
                    self.find_cut(&chars[pos..pos + self.config.chunk_size])
                };

                let body: String = chars[pos..pos + body_len].iter().collect();
                let text = match &prev_tail {
                    Some(tail) => format!("{}{}", tail, body),
                    None => body,
                };

                prev_tail = Some(trailing_chars(&text, self.config.overlap));

                chunks.push(Chunk {
                    id: format!("{}#{:05}", source_doc_id, seq),
                    source_doc_id: source_doc_id.to_string(),
                    page: unit.page,
                    sequence_index: seq,
                    text,
                    vector: None,
                });

                seq += 1;
                pos += body_len;
            }
        }

        chunks
    }

    /// 자를 위치 결정 (본문 길이 반환)
    ///
    /// `[chunk_size - boundary_window, chunk_size]` 범위에서
    /// 문단 경계 > 문장 끝 > 단어 경계 순으로 탐색하고,
    /// 없으면 정확히 chunk_size에서 강제로 자릅니다.
    fn find_cut(&self, window: &[char]) -> usize {
        let size = window.len();
        let min_cut = size.saturating_sub(self.config.boundary_window).max(1);

        // 1. 문단 경계 ("\n\n" 직후)
        for cut in (min_cut..=size).rev() {
            if cut >= 2 && window[cut - 1] == '\n' && window[cut - 2] == '\n' {
                return cut;
            }
        }

        // 2. 문장 끝 (마침표류 + 공백/끝)
        for cut in (min_cut..=size).rev() {
            let c = window[cut - 1];
            let is_sentence_end = matches!(c, '.' | '!' | '?' | '。');
            let followed_by_break = cut == size || window[cut].is_whitespace();
            if is_sentence_end && followed_by_break {
                return cut;
            }
        }

        // 3. 단어 경계 (공백 직후)
        for cut in (min_cut..=size).rev() {
            if window[cut - 1].is_whitespace() {
                return cut;
            }
        }

        // 4. 강제 절단
        size
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자열의 끝 `n`자 반환 (문자 단위)
fn trailing_chars(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(n);
    chars[start..].iter().collect()
}

// ============================================================================
// Tests
// ============================================================================
