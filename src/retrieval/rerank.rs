//! Cross-Encoder Reranking - (쿼리, 후보) 쌍별 관련도 재채점
//!
//! RRF의 대안 전략입니다. 두 브랜치 오버페치 집합의 합집합을
//! 쌍별 관련도 capability로 전부 재채점하고, 모델이 돌려준 스칼라
//! 스코어만으로 순서를 다시 매깁니다. 입력 순서는 결과에 영향이 없습니다.
//!
//! 비용은 후보 수 x 쌍당 추론 비용에 비례하므로, 오버페치 폭이
//! 이 전략의 지연/재현율 트레이드오프를 결정합니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::RagError;

use super::fusion::{FusedResult, OriginRanks, RankingStrategy};
use super::search::BranchResults;

/// 기본 워커 풀 크기
pub const DEFAULT_RERANK_CONCURRENCY: usize = 4;

// ============================================================================
// PairScorer Trait
// ============================================================================

/// 쌍별 관련도 채점 capability
///
/// 크로스 인코더 모델이 (쿼리, 후보 텍스트) 한 쌍을 공동 인코딩해
/// 스칼라 관련도를 반환합니다.
#[async_trait]
pub trait PairScorer: Send + Sync {
    /// 단일 쌍 채점
    async fn score(&self, query: &str, text: &str) -> Result<f32, RagError>;

    /// 채점기 이름
    fn name(&self) -> &str;
}

// ============================================================================
// CrossEncoderReranker
// ============================================================================

/// 크로스 인코더 리랭커
///
/// 채점은 고정 크기 세마포어 워커 풀에서 실행됩니다. 풀은 리랭커
/// 인스턴스 단위로 공유되므로 동시 쿼리가 많아도 추론 동시성은
/// `max_concurrency`를 넘지 않습니다. 쿼리 간 순서 의존성은 없습니다.
pub struct CrossEncoderReranker {
    scorer: Arc<dyn PairScorer>,
    pool: Arc<Semaphore>,
    max_concurrency: usize,
}

impl CrossEncoderReranker {
    pub fn new(scorer: Arc<dyn PairScorer>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            scorer,
            pool: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn with_defaults(scorer: Arc<dyn PairScorer>) -> Self {
        Self::new(scorer, DEFAULT_RERANK_CONCURRENCY)
    }
}

/// 합집합 후보 한 건
struct Candidate {
    chunk_id: String,
    text: String,
    origin: OriginRanks,
}

/// 두 브랜치 오버페치 집합의 합집합 (chunk_id 기준 중복 제거)
///
/// 융합 전 집합을 쓰기 때문에 한쪽 브랜치에만 등장한 후보도
/// 재채점 기회를 잃지 않습니다.
fn union_candidates(branches: &BranchResults) -> Vec<Candidate> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, Candidate> = HashMap::new();

    for (rank, hit) in branches.vector.iter().enumerate() {
        let entry = by_id.entry(hit.chunk_id.clone()).or_insert_with(|| {
            order.push(hit.chunk_id.clone());
            Candidate {
                chunk_id: hit.chunk_id.clone(),
                text: hit.text.clone(),
                origin: OriginRanks::default(),
            }
        });
        entry.origin.vector = Some(rank);
    }

    for (rank, hit) in branches.lexical.iter().enumerate() {
        let entry = by_id.entry(hit.chunk_id.clone()).or_insert_with(|| {
            order.push(hit.chunk_id.clone());
            Candidate {
                chunk_id: hit.chunk_id.clone(),
                text: hit.text.clone(),
                origin: OriginRanks::default(),
            }
        });
        entry.origin.lexical = Some(rank);
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

#[async_trait]
impl RankingStrategy for CrossEncoderReranker {
    async fn rank(
        &self,
        query: &str,
        branches: &BranchResults,
        top_k: usize,
    ) -> Result<Vec<FusedResult>, RagError> {
        let candidates = union_candidates(branches);
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        // 모든 쌍을 워커 풀에서 독립적으로 채점
        let scored: Vec<Result<FusedResult, RagError>> = stream::iter(candidates)
            .map(|candidate| {
                let scorer = Arc::clone(&self.scorer);
                let pool = Arc::clone(&self.pool);
                let query = query.to_string();
                async move {
                    let _permit = pool.acquire().await.map_err(|e| {
                        RagError::RerankFailed(format!("worker pool closed: {}", e))
                    })?;
                    let score = scorer.score(&query, &candidate.text).await?;
                    Ok(FusedResult {
                        chunk_id: candidate.chunk_id,
                        score,
                        origin: candidate.origin,
                    })
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut results = Vec::with_capacity(scored.len());
        for item in scored {
            match item {
                Ok(result) => results.push(result),
                Err(e) => {
                    return Err(RagError::RerankFailed(format!(
                        "pair scoring failed: {}",
                        e
                    )))
                }
            }
        }

        // 모델 출력 순서는 신뢰하지 않고 스코어만으로 재정렬
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(top_k);

        Ok(results)
    }

    fn name(&self) -> &'static str {
        "cross-encoder"
    }
}

// ============================================================================
// HTTP Cross-Encoder Client
// ============================================================================

/// HTTP 리랭크 서비스 채점기
///
/// text-embeddings-inference 계열 `/rerank` 엔드포인트를 사용합니다.
/// 요청: `{"query": .., "texts": [..]}`, 응답: `[{"index": 0, "score": ..}]`
pub struct HttpCrossEncoder {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: String, api_key: Option<String>) -> Result<Self, RagError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                RagError::CapabilityUnavailable(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }

    /// 환경변수 RERANKER_URL (+ 선택 RERANKER_API_KEY)에서 생성
    pub fn from_env() -> Result<Self, RagError> {
        let endpoint = std::env::var("RERANKER_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                RagError::CapabilityUnavailable("RERANKER_URL not set".to_string())
            })?;
        let api_key = std::env::var("RERANKER_API_KEY").ok().filter(|v| !v.is_empty());
        Self::new(endpoint, api_key)
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankEntry {
    #[allow(dead_code)]
    index: usize,
    score: f32,
}

#[async_trait]
impl PairScorer for HttpCrossEncoder {
    async fn score(&self, query: &str, text: &str) -> Result<f32, RagError> {
        let request = RerankRequest {
            query,
            texts: vec![text],
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            RagError::CapabilityUnavailable(format!("rerank request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::CapabilityUnavailable(format!(
                "rerank service returned {}: {}",
                status, body
            )));
        }

        let entries: Vec<RerankEntry> = response.json().await.map_err(|e| {
            RagError::CapabilityUnavailable(format!("failed to parse rerank response: {}", e))
        })?;

        entries
            .first()
            .map(|e| e.score)
            .ok_or_else(|| RagError::CapabilityUnavailable("empty rerank response".to_string()))
    }

    fn name(&self) -> &str {
        "http-cross-encoder"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::retrieval::search::SearchHit;

    fn hit(id: &str, rank: usize) -> SearchHit {
        SearchHit {
            chunk_id: id.to_string(),
            text: format!("text {}", id),
            source: "doc".to_string(),
            page: 1,
            score: 0.5,
            branch_rank: rank,
        }
    }

    fn branches(vector: &[&str], lexical: &[&str]) -> BranchResults {
        BranchResults {
            vector: vector.iter().enumerate().map(|(r, id)| hit(id, r)).collect(),
            lexical: lexical.iter().enumerate().map(|(r, id)| hit(id, r)).collect(),
            degraded: false,
        }
    }

    /// 텍스트 내용으로 고정 스코어를 돌려주는 채점기
    struct FixedScorer;

    #[async_trait]
    impl PairScorer for FixedScorer {
        async fn score(&self, _query: &str, text: &str) -> Result<f32, RagError> {
            // "text A" -> 0.1, "text B" -> 0.2, ...
            let last = text.chars().last().unwrap_or('A');
            Ok(0.1 * (last as u32 - 'A' as u32 + 1) as f32)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// 항상 실패하는 채점기
    struct FailingScorer;

    #[async_trait]
    impl PairScorer for FailingScorer {
        async fn score(&self, _query: &str, _text: &str) -> Result<f32, RagError> {
            Err(RagError::CapabilityUnavailable("model down".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// 최대 동시 실행 수를 기록하는 채점기
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PairScorer for ConcurrencyProbe {
        async fn score(&self, _query: &str, _text: &str) -> Result<f32, RagError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(0.5)
        }

        fn name(&self) -> &str {
            "probe"
        }
    }

    #[tokio::test]
    async fn test_orders_by_returned_score_only() {
        let reranker = CrossEncoderReranker::new(Arc::new(FixedScorer), 2);
        let results = reranker
            .rank("q", &branches(&["A", "B", "C"], &["C", "D"]), 10)
            .await
            .unwrap();

        // 합집합 {A,B,C,D}, 스코어 D > C > B > A
        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["D", "C", "B", "A"]);
    }

    #[tokio::test]
    async fn test_input_order_does_not_matter() {
        let reranker = CrossEncoderReranker::new(Arc::new(FixedScorer), 2);

        let forward = reranker
            .rank("q", &branches(&["A", "B", "C"], &["D"]), 10)
            .await
            .unwrap();
        let reversed = reranker
            .rank("q", &branches(&["C", "B", "A"], &["D"]), 10)
            .await
            .unwrap();

        let forward_ids: Vec<&str> = forward.iter().map(|r| r.chunk_id.as_str()).collect();
        let reversed_ids: Vec<&str> = reversed.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(forward_ids, reversed_ids);
    }

    #[tokio::test]
    async fn test_union_keeps_single_branch_candidates() {
        let reranker = CrossEncoderReranker::new(Arc::new(FixedScorer), 2);
        // D는 키워드 브랜치에만 등장하지만 재채점 대상에 포함되어야 함
        let results = reranker
            .rank("q", &branches(&["A"], &["D"]), 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "D");
        assert_eq!(results[0].origin.lexical, Some(0));
        assert_eq!(results[0].origin.vector, None);
    }

    #[tokio::test]
    async fn test_truncates_to_top_k_after_scoring() {
        let reranker = CrossEncoderReranker::new(Arc::new(FixedScorer), 2);
        let results = reranker
            .rank("q", &branches(&["A", "B", "C", "D"], &[]), 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "D");
        assert_eq!(results[1].chunk_id, "C");
    }

    #[tokio::test]
    async fn test_scorer_failure_fails_rerank() {
        let reranker = CrossEncoderReranker::new(Arc::new(FailingScorer), 2);
        let err = reranker
            .rank("q", &branches(&["A", "B"], &[]), 10)
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::RerankFailed(_)));
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let probe = Arc::new(ConcurrencyProbe {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let reranker = CrossEncoderReranker::new(Arc::clone(&probe) as Arc<dyn PairScorer>, 2);

        let ids: Vec<String> = (0..8).map(|i| format!("c{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        reranker
            .rank("q", &branches(&id_refs, &[]), 10)
            .await
            .unwrap();

        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_candidates_yield_empty() {
        let reranker = CrossEncoderReranker::new(Arc::new(FixedScorer), 2);
        let results = reranker.rank("q", &branches(&[], &[]), 10).await.unwrap();
        assert!(results.is_empty());
    }
}
