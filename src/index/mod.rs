//! Index 모듈 - 청크 + 벡터 + 메타데이터 저장소
//!
//! - SQLite: 청크 텍스트 저장 + FTS5 키워드 검색 (BM25)
//! - LanceDB: 벡터 검색 (cosine)
//! - LocalDocumentIndex: 두 저장소를 하나의 DocumentIndex로 결합
//!
//! 영속 스키마는 인덱싱 경로와 쿼리 경로 사이의 계약입니다:
//! `{text, text_vector(dims, cosine), page, source, chunk_id}`
//! 벡터 차원 변경은 전체 재인덱싱을 요구합니다.

mod lance;
mod store;
mod local;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RagError;

pub use lance::LanceVectorIndex;
pub use local::LocalDocumentIndex;
pub use store::SqliteChunkStore;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.fuserag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fuserag")
}

// ============================================================================
// Types
// ============================================================================

/// 인덱스에 기록되는 문서 단위 (청크 + 벡터 + 메타데이터)
///
/// 청크당 1회 기록(write-once)이며, 같은 source의 재인덱싱 시
/// 통째로 교체됩니다. 개별 수정은 없습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub chunk_id: String,
    pub source: String,
    pub page: u32,
    pub sequence_index: u32,
    pub text: String,
    pub text_vector: Vec<f32>,
}

/// 인덱스 쿼리 결과 한 건
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub source: String,
    pub page: u32,
    pub text: String,
    /// 브랜치 고유 스코어 (벡터: cosine 유사도, 키워드: 정규화된 BM25)
    pub score: f32,
}

/// 인덱스 통계
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub source_count: usize,
    pub size_bytes: u64,
}

// ============================================================================
// DocumentIndex Trait
// ============================================================================

/// 문서 인덱스 capability 트레이트
///
/// 파이프라인이 소비하는 외부 검색 엔진 인터페이스입니다.
/// 벡터 쿼리와 키워드 쿼리는 서로 독립적이며 동시 실행이 가능해야 합니다.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// source의 기존 청크를 전부 교체 (재인덱싱 멱등성 보장)
    async fn replace_source(
        &self,
        source: &str,
        docs: &[IndexedDocument],
    ) -> Result<usize, RagError>;

    /// cosine 유사도 벡터 쿼리, 스코어 내림차순
    async fn vector_query(
        &self,
        vector: &[f32],
        top_n: usize,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    /// BM25 키워드 쿼리, 관련도 내림차순
    async fn lexical_query(&self, query: &str, top_n: usize)
        -> Result<Vec<ScoredChunk>, RagError>;

    /// source의 청크 전부 삭제, 삭제된 개수 반환
    async fn delete_source(&self, source: &str) -> Result<usize, RagError>;

    /// 인덱싱된 source 목록
    async fn sources(&self) -> Result<Vec<String>, RagError>;

    /// 인덱스 통계
    async fn stats(&self) -> Result<IndexStats, RagError>;
}
