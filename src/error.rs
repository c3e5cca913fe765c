//! 에러 타입 정의
//!
//! 파이프라인 전반의 에러 분류:
//! - 입력 에러는 호출자에게 그대로 전달
//! - 한쪽 검색 브랜치 실패는 에러가 아닌 degraded 플래그로 기록
//! - LLM 생성 실패는 synthesizer 내부에서 흡수 (절대 전파되지 않음)

use thiserror::Error;

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 입력 (top_k=0, overlap >= chunk_size 등)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 외부 capability 접근 불가 (임베딩/인덱스)
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// 두 검색 브랜치 모두 실패 - 해당 쿼리는 실패 처리
    #[error("retrieval failed: vector branch: {vector}; lexical branch: {lexical}")]
    RetrievalFailed { vector: String, lexical: String },

    /// 크로스 인코더 리랭킹 실패
    #[error("rerank failed: {0}")]
    RerankFailed(String),

    /// 인덱스 저장소 에러
    #[error("index error: {0}")]
    Index(#[from] anyhow::Error),

    /// 쿼리 타임아웃 초과
    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// LLM capability 에러
///
/// synthesizer가 전량 흡수하고 fallback으로 전환합니다.
/// `RagError`로 변환되지 않으며 쿼리 결과에 노출되지 않습니다.
#[derive(Debug, Error)]
pub enum LlmError {
    /// 인증 실패 (401/403)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 요청 한도 초과 (429)
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// 네트워크/서버 에러
    #[error("network error: {0}")]
    Network(String),
}

// ============================================================================
// Tests
// ============================================================================
