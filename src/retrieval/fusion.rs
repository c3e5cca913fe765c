//! Rank Fusion - RRF (Reciprocal Rank Fusion)
//!
//! 두 브랜치의 랭킹을 스코어 정규화 없이 순위만으로 융합합니다.
//! ref: https://www.elastic.co/blog/hybrid-search-rrf
//!
//! RRF Score = sum(1 / (k + rank + 1)), rank는 0-based
//! 이 공식(0-based + 1)은 기존 인덱스들과의 호환을 위해 그대로
//! 유지해야 합니다. 1-based 공식으로 바꾸면 상위권 가중치가 달라집니다.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RagError;

use super::search::BranchResults;

/// RRF 기본 smoothing 상수
///
/// 클수록 상위 순위의 지배력이 약해집니다.
pub const DEFAULT_RRF_K: f32 = 60.0;

// ============================================================================
// Types
// ============================================================================

/// 각 브랜치에서의 원 순위 (0-based, 없으면 해당 브랜치 미등장)
#[derive(Debug, Clone, Default, Serialize)]
pub struct OriginRanks {
    pub vector: Option<usize>,
    pub lexical: Option<usize>,
}

/// 융합된 최종 랭킹 한 건
///
/// fused score 내림차순, 동점은 chunk_id 오름차순으로 전순서를 이룹니다.
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    pub chunk_id: String,
    pub score: f32,
    pub origin: OriginRanks,
}

// ============================================================================
// RankingStrategy Trait
// ============================================================================

/// 랭킹 전략 트레이트
///
/// RRF와 크로스 인코더 리랭커가 같은 계약을 공유하며
/// 쿼리 단위로 교체 가능합니다.
#[async_trait]
pub trait RankingStrategy: Send + Sync {
    /// 두 브랜치 랭킹을 하나의 최종 랭킹으로 변환
    async fn rank(
        &self,
        query: &str,
        branches: &BranchResults,
        top_k: usize,
    ) -> Result<Vec<FusedResult>, RagError>;

    /// 전략 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// RrfFusion
// ============================================================================

/// RRF 융합 전략
pub struct RrfFusion {
    k: f32,
}

impl RrfFusion {
    /// smoothing 상수 지정 생성
    pub fn new(k: f32) -> Self {
        Self { k }
    }
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self::new(DEFAULT_RRF_K)
    }
}

#[async_trait]
impl RankingStrategy for RrfFusion {
    async fn rank(
        &self,
        _query: &str,
        branches: &BranchResults,
        top_k: usize,
    ) -> Result<Vec<FusedResult>, RagError> {
        // chunk_id -> (누적 스코어, 원 순위)
        let mut scores: HashMap<&str, (f32, OriginRanks)> = HashMap::new();

        for (rank, hit) in branches.vector.iter().enumerate() {
            let entry = scores
                .entry(hit.chunk_id.as_str())
                .or_insert((0.0, OriginRanks::default()));
            entry.0 += 1.0 / (self.k + rank as f32 + 1.0);
            entry.1.vector = Some(rank);
        }

        for (rank, hit) in branches.lexical.iter().enumerate() {
            let entry = scores
                .entry(hit.chunk_id.as_str())
                .or_insert((0.0, OriginRanks::default()));
            entry.0 += 1.0 / (self.k + rank as f32 + 1.0);
            entry.1.lexical = Some(rank);
        }

        let mut fused: Vec<FusedResult> = scores
            .into_iter()
            .map(|(chunk_id, (score, origin))| FusedResult {
                chunk_id: chunk_id.to_string(),
                score,
                origin,
            })
            .collect();

        // 스코어 내림차순, 동점은 chunk_id 오름차순 (재현성)
        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        // 절단은 융합이 끝난 뒤에만 - 한쪽 브랜치에서 약한 청크가
        // 융합 전에 탈락하는 일이 없도록
        fused.truncate(top_k);

        Ok(fused)
    }

    fn name(&self) -> &'static str {
        "rrf"
    }
}

// ============================================================================
// Tests
// ============================================================================
