//! Answer Synthesis - 검색 결과로 답변 생성
//!
//! LLM capability가 설정되어 있으면 생성을 위임하고, 어떤 실패든
//! (인증/네트워크/한도 초과) 로컬에서 잡아 fallback으로 전환합니다.
//! 검색이 청크를 하나라도 돌려줬다면 답변은 항상 비어 있지 않습니다.

use std::sync::Arc;

use serde::Serialize;

use crate::llm::LlmClient;

use super::fusion::OriginRanks;

/// 생성 시스템 프롬프트 (고정)
const SYSTEM_PROMPT: &str = "당신은 제공된 문서 내용만 근거로 질문에 답하는 어시스턴트입니다. \
     문서에 관련 정보가 없으면 없다고 답하세요. 답변은 정확하고 간결해야 합니다.";

// ============================================================================
// Configuration
// ============================================================================

/// 답변 생성 설정
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// 컨텍스트에 넣을 최대 청크 수
    pub max_context_chunks: usize,
    /// LLM 최대 토큰
    pub max_tokens: u32,
    /// LLM temperature
    pub temperature: f32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            max_context_chunks: 5,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 생성 모드 (구성 시점에 결정)
///
/// 런타임 null 체크 대신 명시적 variant로 주입합니다.
pub enum AnswerMode {
    /// LLM capability로 생성, 실패 시 fallback
    Llm(Arc<dyn LlmClient>),
    /// 항상 결정적 템플릿 답변
    Fallback,
}

/// 실제로 답변을 만든 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Llm,
    Fallback,
}

/// 랭킹이 끝난 검색 청크 (답변 컨텍스트 입력)
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source: String,
    pub page: u32,
    pub text: String,
    pub score: f32,
    pub origin: OriginRanks,
}

/// 생성 결과
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub answer: String,
    pub mode: AnswerSource,
}

// ============================================================================
// AnswerSynthesizer
// ============================================================================

/// 답변 생성기
pub struct AnswerSynthesizer {
    mode: AnswerMode,
    config: SynthesizerConfig,
}

impl AnswerSynthesizer {
    pub fn new(mode: AnswerMode, config: SynthesizerConfig) -> Self {
        Self { mode, config }
    }

    /// 답변 생성
    ///
    /// 실패하지 않습니다: LLM 에러는 전부 흡수되고 fallback이
    /// 비어 있지 않은 답변을 보장합니다.
    pub async fn synthesize(&self, question: &str, chunks: &[RetrievedChunk]) -> Synthesis {
        // 검색 결과가 없으면 LLM을 부르지 않고 고정 안내문
        if chunks.is_empty() {
            return Synthesis {
                answer: "관련 문서를 찾지 못했습니다. 먼저 문서를 인덱싱했는지 확인해 주세요."
                    .to_string(),
                mode: AnswerSource::Fallback,
            };
        }

        let context_chunks = &chunks[..chunks.len().min(self.config.max_context_chunks)];
        let context = build_context(context_chunks);

        match &self.mode {
            AnswerMode::Llm(client) => {
                let user_prompt = format!(
                    "다음 문서 내용을 근거로 질문에 답하세요.\n\n\
                     질문: {}\n\n관련 문서:\n{}",
                    question, context
                );

                match client
                    .complete(
                        SYSTEM_PROMPT,
                        &user_prompt,
                        self.config.max_tokens,
                        self.config.temperature,
                    )
                    .await
                {
                    Ok(answer) if !answer.trim().is_empty() => Synthesis {
                        answer,
                        mode: AnswerSource::Llm,
                    },
                    Ok(_) => {
                        tracing::warn!("LLM returned empty answer, falling back");
                        self.fallback_answer(context_chunks)
                    }
                    Err(e) => {
                        // 생성 실패는 절대 호출자에게 전파하지 않음
                        tracing::warn!("LLM generation failed, falling back: {}", e);
                        self.fallback_answer(context_chunks)
                    }
                }
            }
            AnswerMode::Fallback => self.fallback_answer(context_chunks),
        }
    }

    /// 결정적 템플릿 답변
    ///
    /// 관련도 순으로 청크 본문과 출처를 나열합니다.
    fn fallback_answer(&self, chunks: &[RetrievedChunk]) -> Synthesis {
        let mut answer = String::from("검색된 문서에서 찾은 관련 내용입니다:\n");

        for chunk in chunks {
            answer.push_str(&format!(
                "\n[출처: {}, 페이지: {}]\n{}\n",
                chunk.source, chunk.page, chunk.text
            ));
        }

        Synthesis {
            answer,
            mode: AnswerSource::Fallback,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 출처+페이지를 보존한 컨텍스트 블록 (관련도 순)
fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[출처: {}, 페이지: {}]\n{}", c.source, c.page, c.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::LlmError;

    fn chunk(id: &str, source: &str, page: u32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: id.to_string(),
            source: source.to_string(),
            page,
            text: text.to_string(),
            score: 0.5,
            origin: OriginRanks::default(),
        }
    }

    /// 항상 성공하는 LLM
    struct GoodLlm;

    #[async_trait]
    impl LlmClient for GoodLlm {
        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, LlmError> {
            Ok("생성된 답변입니다.".to_string())
        }

        fn model(&self) -> &str {
            "good"
        }
    }

    /// 항상 AuthError를 내는 LLM
    struct AuthFailLlm;

    #[async_trait]
    impl LlmClient for AuthFailLlm {
        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, LlmError> {
            Err(LlmError::Auth("invalid api key".into()))
        }

        fn model(&self) -> &str {
            "auth-fail"
        }
    }

    #[tokio::test]
    async fn test_llm_mode_uses_llm_answer() {
        let synthesizer = AnswerSynthesizer::new(
            AnswerMode::Llm(Arc::new(GoodLlm)),
            SynthesizerConfig::default(),
        );

        let result = synthesizer
            .synthesize("질문", &[chunk("a", "doc.pdf", 1, "내용")])
            .await;

        assert_eq!(result.mode, AnswerSource::Llm);
        assert_eq!(result.answer, "생성된 답변입니다.");
    }

    #[tokio::test]
    async fn test_auth_error_falls_back_and_never_propagates() {
        let synthesizer = AnswerSynthesizer::new(
            AnswerMode::Llm(Arc::new(AuthFailLlm)),
            SynthesizerConfig::default(),
        );

        let result = synthesizer
            .synthesize("질문", &[chunk("a", "doc.pdf", 3, "핵심 내용")])
            .await;

        assert_eq!(result.mode, AnswerSource::Fallback);
        assert!(!result.answer.is_empty());
        assert!(result.answer.contains("핵심 내용"));
        assert!(result.answer.contains("doc.pdf"));
        assert!(result.answer.contains("3"));
    }

    #[tokio::test]
    async fn test_fallback_mode_is_deterministic() {
        let synthesizer =
            AnswerSynthesizer::new(AnswerMode::Fallback, SynthesizerConfig::default());
        let chunks = [
            chunk("a", "doc.pdf", 1, "첫 번째"),
            chunk("b", "doc.pdf", 2, "두 번째"),
        ];

        let first = synthesizer.synthesize("질문", &chunks).await;
        let second = synthesizer.synthesize("질문", &chunks).await;

        assert_eq!(first.answer, second.answer);
        assert_eq!(first.mode, AnswerSource::Fallback);
    }

    #[tokio::test]
    async fn test_empty_chunks_yield_no_results_answer() {
        let synthesizer = AnswerSynthesizer::new(
            AnswerMode::Llm(Arc::new(GoodLlm)),
            SynthesizerConfig::default(),
        );

        let result = synthesizer.synthesize("질문", &[]).await;

        assert_eq!(result.mode, AnswerSource::Fallback);
        assert!(result.answer.contains("찾지 못했습니다"));
    }

    #[tokio::test]
    async fn test_context_limited_to_max_chunks() {
        let synthesizer = AnswerSynthesizer::new(
            AnswerMode::Fallback,
            SynthesizerConfig {
                max_context_chunks: 2,
                ..SynthesizerConfig::default()
            },
        );

        let chunks: Vec<RetrievedChunk> = (0..5)
            .map(|i| chunk(&format!("c{}", i), "doc", 1, &format!("chunk-{}", i)))
            .collect();

        let result = synthesizer.synthesize("질문", &chunks).await;

        assert!(result.answer.contains("chunk-0"));
        assert!(result.answer.contains("chunk-1"));
        assert!(!result.answer.contains("chunk-2"));
    }

    #[test]
    fn test_build_context_preserves_order_and_provenance() {
        let chunks = [
            chunk("a", "first.pdf", 1, "alpha"),
            chunk("b", "second.pdf", 7, "beta"),
        ];

        let context = build_context(&chunks);
        let alpha_pos = context.find("alpha").unwrap();
        let beta_pos = context.find("beta").unwrap();

        assert!(alpha_pos < beta_pos);
        assert!(context.contains("[출처: first.pdf, 페이지: 1]"));
        assert!(context.contains("[출처: second.pdf, 페이지: 7]"));
        assert!(context.contains("---"));
    }
}
