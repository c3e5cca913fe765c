//! Hybrid Search - 벡터 브랜치와 키워드 브랜치 동시 실행
//!
//! 두 브랜치는 데이터 의존성이 없으며 동시에 실행됩니다.
//! 한쪽 실패는 degraded로 기록하고 계속 진행하며,
//! 양쪽 모두 실패할 때만 쿼리가 실패합니다.

use std::sync::Arc;
use std::time::Duration;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::index::{DocumentIndex, ScoredChunk};

// ============================================================================
// Configuration
// ============================================================================

/// 검색 설정
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// 브랜치당 오버페치 배수 (top_k * factor 만큼 후보 확보, 권장 2~4)
    pub overfetch_factor: usize,
    /// 쿼리 전체 타임아웃
    pub query_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 3,
            query_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 검색 히트 (쿼리당 일회성)
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    pub page: u32,
    /// 브랜치 고유 스코어
    pub score: f32,
    /// 해당 브랜치 내 0-based 순위
    pub branch_rank: usize,
}

/// 두 브랜치의 랭킹 결과
///
/// 융합(fusion)은 두 브랜치가 모두 반환되거나 확정적으로 실패한
/// 뒤에만 진행됩니다. 부분/스트리밍 융합은 없습니다.
#[derive(Debug, Clone, Default)]
pub struct BranchResults {
    /// 벡터 브랜치 랭킹 (cosine 유사도 내림차순)
    pub vector: Vec<SearchHit>,
    /// 키워드 브랜치 랭킹 (BM25 관련도 내림차순)
    pub lexical: Vec<SearchHit>,
    /// 한쪽 브랜치가 실패했는지 여부
    pub degraded: bool,
}

impl BranchResults {
    /// 양쪽 브랜치 모두 비었는지
    pub fn is_empty(&self) -> bool {
        self.vector.is_empty() && self.lexical.is_empty()
    }
}

// ============================================================================
// HybridSearchEngine
// ============================================================================

/// 하이브리드 검색 엔진
///
/// 동일한 인덱스 상태에서는 결정적(deterministic)으로 동작합니다.
pub struct HybridSearchEngine {
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl HybridSearchEngine {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    /// 두 브랜치를 동시에 실행하고 랭킹 쌍을 반환
    ///
    /// - `top_k == 0`은 입력 에러
    /// - 빈 인덱스는 빈 결과 (에러 아님)
    /// - 한쪽 브랜치 실패: 나머지로 계속, `degraded = true`
    /// - 양쪽 실패: `RagError::RetrievalFailed`
    pub async fn search(&self, query: &str, top_k: usize) -> Result<BranchResults, RagError> {
        if top_k == 0 {
            return Err(RagError::InvalidInput(
                "top_k must be greater than 0".to_string(),
            ));
        }

        let width = top_k * self.config.overfetch_factor.max(1);

        // 벡터 브랜치: 쿼리 임베딩 후 cosine 검색
        let vector_branch = async {
            let query_vector = self.embedder.embed_query(query).await?;
            self.index.vector_query(&query_vector, width).await
        };

        // 키워드 브랜치: BM25 검색
        let lexical_branch = self.index.lexical_query(query, width);

        let (vector_result, lexical_result) = tokio::join!(vector_branch, lexical_branch);

        match (vector_result, lexical_result) {
            (Ok(vector), Ok(lexical)) => Ok(BranchResults {
                vector: to_hits(vector),
                lexical: to_hits(lexical),
                degraded: false,
            }),
            (Ok(vector), Err(e)) => {
                tracing::warn!("Lexical branch failed, continuing vector-only: {}", e);
                Ok(BranchResults {
                    vector: to_hits(vector),
                    lexical: Vec::new(),
                    degraded: true,
                })
            }
            (Err(e), Ok(lexical)) => {
                tracing::warn!("Vector branch failed, continuing lexical-only: {}", e);
                Ok(BranchResults {
                    vector: Vec::new(),
                    lexical: to_hits(lexical),
                    degraded: true,
                })
            }
            (Err(vector_err), Err(lexical_err)) => Err(RagError::RetrievalFailed {
                vector: vector_err.to_string(),
                lexical: lexical_err.to_string(),
            }),
        }
    }

    /// 오버페치 배수 반환
    pub fn overfetch_factor(&self) -> usize {
        self.config.overfetch_factor
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 인덱스 결과를 브랜치 순위가 매겨진 히트로 변환
fn to_hits(chunks: Vec<ScoredChunk>) -> Vec<SearchHit> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(rank, c)| SearchHit {
            chunk_id: c.chunk_id,
            text: c.text,
            source: c.source,
            page: c.page,
            score: c.score,
            branch_rank: rank,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::index::{IndexStats, IndexedDocument};

    /// 테스트용 인메모리 인덱스
    struct FakeIndex {
        vector_hits: Vec<ScoredChunk>,
        lexical_hits: Vec<ScoredChunk>,
        fail_vector: bool,
        fail_lexical: bool,
    }

    impl FakeIndex {
        fn new(vector_hits: Vec<ScoredChunk>, lexical_hits: Vec<ScoredChunk>) -> Self {
            Self {
                vector_hits,
                lexical_hits,
                fail_vector: false,
                fail_lexical: false,
            }
        }
    }

    #[async_trait]
    impl DocumentIndex for FakeIndex {
        async fn replace_source(
            &self,
            _source: &str,
            docs: &[IndexedDocument],
        ) -> Result<usize, RagError> {
            Ok(docs.len())
        }

        async fn vector_query(
            &self,
            _vector: &[f32],
            top_n: usize,
        ) -> Result<Vec<ScoredChunk>, RagError> {
            if self.fail_vector {
                return Err(RagError::CapabilityUnavailable("vector down".into()));
            }
            Ok(self.vector_hits.iter().take(top_n).cloned().collect())
        }

        async fn lexical_query(
            &self,
            _query: &str,
            top_n: usize,
        ) -> Result<Vec<ScoredChunk>, RagError> {
            if self.fail_lexical {
                return Err(RagError::CapabilityUnavailable("lexical down".into()));
            }
            Ok(self.lexical_hits.iter().take(top_n).cloned().collect())
        }

        async fn delete_source(&self, _source: &str) -> Result<usize, RagError> {
            Ok(0)
        }

        async fn sources(&self) -> Result<Vec<String>, RagError> {
            Ok(vec![])
        }

        async fn stats(&self) -> Result<IndexStats, RagError> {
            Ok(IndexStats {
                chunk_count: self.vector_hits.len(),
                source_count: 1,
                size_bytes: 0,
            })
        }
    }

    /// 고정 벡터를 돌려주는 테스트용 임베더
    struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
            Ok(vec![0.1; 4])
        }

        fn dimension(&self) -> usize {
            4
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn scored(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk_id: id.to_string(),
            source: "doc".to_string(),
            page: 1,
            text: format!("text of {}", id),
            score,
        }
    }

    fn engine(index: FakeIndex) -> HybridSearchEngine {
        HybridSearchEngine::new(
            Arc::new(index),
            Arc::new(FakeEmbedder),
            SearchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_both_branches_returned_with_ranks() {
        let index = FakeIndex::new(
            vec![scored("a", 0.9), scored("b", 0.8)],
            vec![scored("b", 0.7), scored("c", 0.6)],
        );

        let results = engine(index).search("query", 2).await.unwrap();

        assert!(!results.degraded);
        assert_eq!(results.vector.len(), 2);
        assert_eq!(results.lexical.len(), 2);
        assert_eq!(results.vector[0].branch_rank, 0);
        assert_eq!(results.vector[1].branch_rank, 1);
        assert_eq!(results.lexical[0].chunk_id, "b");
    }

    #[tokio::test]
    async fn test_top_k_zero_is_input_error() {
        let index = FakeIndex::new(vec![], vec![]);
        let err = engine(index).search("query", 0).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty_not_error() {
        let index = FakeIndex::new(vec![], vec![]);
        let results = engine(index).search("query", 5).await.unwrap();
        assert!(results.is_empty());
        assert!(!results.degraded);
    }

    #[tokio::test]
    async fn test_vector_failure_degrades_to_lexical() {
        let mut index = FakeIndex::new(vec![scored("a", 0.9)], vec![scored("b", 0.7)]);
        index.fail_vector = true;

        let results = engine(index).search("query", 5).await.unwrap();

        assert!(results.degraded);
        assert!(results.vector.is_empty());
        assert_eq!(results.lexical.len(), 1);
    }

    #[tokio::test]
    async fn test_lexical_failure_degrades_to_vector() {
        let mut index = FakeIndex::new(vec![scored("a", 0.9)], vec![scored("b", 0.7)]);
        index.fail_lexical = true;

        let results = engine(index).search("query", 5).await.unwrap();

        assert!(results.degraded);
        assert_eq!(results.vector.len(), 1);
        assert!(results.lexical.is_empty());
    }

    #[tokio::test]
    async fn test_both_failures_fail_the_query() {
        let mut index = FakeIndex::new(vec![scored("a", 0.9)], vec![scored("b", 0.7)]);
        index.fail_vector = true;
        index.fail_lexical = true;

        let err = engine(index).search("query", 5).await.unwrap_err();
        assert!(matches!(err, RagError::RetrievalFailed { .. }));
    }

    #[tokio::test]
    async fn test_overfetch_width_applied() {
        // 후보 6개, top_k=2, factor=3 → 브랜치당 6개까지 확보
        let many: Vec<ScoredChunk> = (0..10).map(|i| scored(&format!("c{}", i), 0.5)).collect();
        let index = FakeIndex::new(many.clone(), many);

        let results = engine(index).search("query", 2).await.unwrap();
        assert_eq!(results.vector.len(), 6);
        assert_eq!(results.lexical.len(), 6);
    }
}
