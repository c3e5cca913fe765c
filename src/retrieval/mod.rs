//! Retrieval 모듈 - 하이브리드 검색 + 랭킹 + 답변 생성 파이프라인
//!
//! - Chunker: 경계 인식 텍스트 분할 (overlap 유지)
//! - Search: 벡터/키워드 브랜치 동시 실행
//! - Fusion/Rerank: RRF와 크로스 인코더, 교체 가능한 랭킹 전략
//! - Synthesizer: LLM 생성 + 결정적 fallback
//!
//! 파이프라인 자체는 설정 외의 공유 가변 상태를 갖지 않아
//! 동시 쿼리에 조정이 필요 없습니다. 유일한 상호 배제는
//! 같은 source의 동시 재인덱싱입니다.

mod chunker;
mod fusion;
mod rerank;
mod search;
mod synthesizer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::index::{DocumentIndex, IndexStats, IndexedDocument};

// Re-exports
pub use chunker::{Chunk, ChunkConfig, ChunkSplitter, PageText};
pub use fusion::{FusedResult, OriginRanks, RankingStrategy, RrfFusion, DEFAULT_RRF_K};
pub use rerank::{
    CrossEncoderReranker, HttpCrossEncoder, PairScorer, DEFAULT_RERANK_CONCURRENCY,
};
pub use search::{BranchResults, HybridSearchEngine, SearchConfig, SearchHit};
pub use synthesizer::{
    AnswerMode, AnswerSource, AnswerSynthesizer, RetrievedChunk, Synthesis, SynthesizerConfig,
};

// ============================================================================
// Configuration
// ============================================================================

/// 파이프라인 전체 설정
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk: ChunkConfig,
    pub search: SearchConfig,
    /// RRF smoothing 상수
    pub rrf_k: f32,
    pub synthesizer: SynthesizerConfig,
    /// 크로스 인코더 워커 풀 크기
    pub rerank_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            search: SearchConfig::default(),
            rrf_k: DEFAULT_RRF_K,
            synthesizer: SynthesizerConfig::default(),
            rerank_concurrency: DEFAULT_RERANK_CONCURRENCY,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 쿼리 결과
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    /// 답변을 실제로 만든 경로 (llm / fallback)
    pub mode: AnswerSource,
    /// 한쪽 검색 브랜치가 실패했는지
    pub degraded: bool,
    pub num_results: usize,
    /// 관련도 순 상위 청크 (최대 top_k개)
    pub retrieved_chunks: Vec<RetrievedChunk>,
}

// ============================================================================
// RagPipeline
// ============================================================================

/// RAG 파이프라인
///
/// 인덱싱 경로: text units → chunker → embedder → index.replace_source
/// 쿼리 경로: question → 하이브리드 검색 → 랭킹 전략 → synthesizer
pub struct RagPipeline {
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    engine: HybridSearchEngine,
    splitter: ChunkSplitter,
    rrf: Arc<dyn RankingStrategy>,
    reranker: Option<Arc<dyn RankingStrategy>>,
    rerank_concurrency: usize,
    synthesizer: AnswerSynthesizer,
    query_timeout: Duration,
    /// source별 재인덱싱 상호 배제 락
    source_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RagPipeline {
    /// 파이프라인 조립
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        answer_mode: AnswerMode,
        config: PipelineConfig,
    ) -> Result<Self, RagError> {
        let splitter = ChunkSplitter::new(config.chunk.clone())?;
        let engine = HybridSearchEngine::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            config.search.clone(),
        );
        let synthesizer = AnswerSynthesizer::new(answer_mode, config.synthesizer.clone());

        Ok(Self {
            index,
            embedder,
            engine,
            splitter,
            rrf: Arc::new(RrfFusion::new(config.rrf_k)),
            reranker: None,
            rerank_concurrency: config.rerank_concurrency,
            synthesizer,
            query_timeout: config.search.query_timeout,
            source_locks: Mutex::new(HashMap::new()),
        })
    }

    /// 크로스 인코더 리랭커 장착 (워커 풀 크기는 설정값 사용)
    pub fn with_reranker(mut self, scorer: Arc<dyn PairScorer>) -> Self {
        self.reranker = Some(Arc::new(CrossEncoderReranker::new(
            scorer,
            self.rerank_concurrency,
        )));
        self
    }

    /// source별 락 획득용 핸들
    async fn source_lock(&self, source: &str) -> Arc<Mutex<()>> {
        let mut locks = self.source_locks.lock().await;
        Arc::clone(
            locks
                .entry(source.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// 문서 인덱싱
    ///
    /// 같은 source_id로 다시 호출하면 이전 청크가 전부 교체됩니다
    /// (멱등). 같은 source의 동시 재인덱싱은 락으로 직렬화됩니다.
    pub async fn index_document(
        &self,
        source_id: &str,
        text_units: &[PageText],
    ) -> Result<usize, RagError> {
        if source_id.trim().is_empty() {
            return Err(RagError::InvalidInput(
                "source_id must not be empty".to_string(),
            ));
        }

        let lock = self.source_lock(source_id).await;
        let _guard = lock.lock().await;

        let chunks = self.splitter.split(source_id, text_units);
        tracing::debug!("Split {} into {} chunks", source_id, chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let docs: Vec<IndexedDocument> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedDocument {
                chunk_id: chunk.id,
                source: chunk.source_doc_id,
                page: chunk.page,
                sequence_index: chunk.sequence_index,
                text: chunk.text,
                text_vector: vector,
            })
            .collect();

        self.index.replace_source(source_id, &docs).await
    }

    /// 쿼리 실행: 검색 → 랭킹 → 답변 생성
    ///
    /// 전체가 `query_timeout` 안에서 실행되며, 타임아웃이나 취소 시
    /// 부분 결과 없이 통째로 중단됩니다 (all-or-nothing).
    pub async fn query(
        &self,
        question: &str,
        top_k: usize,
        use_reranker: bool,
    ) -> Result<QueryResult, RagError> {
        match tokio::time::timeout(
            self.query_timeout,
            self.query_inner(question, top_k, use_reranker),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout(self.query_timeout)),
        }
    }

    async fn query_inner(
        &self,
        question: &str,
        top_k: usize,
        use_reranker: bool,
    ) -> Result<QueryResult, RagError> {
        let branches = self.engine.search(question, top_k).await?;
        let degraded = branches.degraded;

        let ranked = self.rank(question, &branches, top_k, use_reranker).await?;

        // 랭킹 결과를 합집합 히트와 결합해 본문/출처 복원
        let mut by_id: HashMap<&str, &SearchHit> = HashMap::new();
        for hit in branches.vector.iter().chain(branches.lexical.iter()) {
            by_id.entry(hit.chunk_id.as_str()).or_insert(hit);
        }

        let retrieved: Vec<RetrievedChunk> = ranked
            .iter()
            .filter_map(|fused| {
                by_id.get(fused.chunk_id.as_str()).map(|hit| RetrievedChunk {
                    chunk_id: fused.chunk_id.clone(),
                    source: hit.source.clone(),
                    page: hit.page,
                    text: hit.text.clone(),
                    score: fused.score,
                    origin: fused.origin.clone(),
                })
            })
            .collect();

        let synthesis = self.synthesizer.synthesize(question, &retrieved).await;

        Ok(QueryResult {
            question: question.to_string(),
            answer: synthesis.answer,
            mode: synthesis.mode,
            degraded,
            num_results: retrieved.len(),
            retrieved_chunks: retrieved,
        })
    }

    /// 랭킹 전략 선택 및 실행
    ///
    /// 리랭커가 요청됐지만 실패하거나 미장착이면 RRF로 폴백해
    /// 쿼리 자체는 계속 진행합니다.
    async fn rank(
        &self,
        question: &str,
        branches: &BranchResults,
        top_k: usize,
        use_reranker: bool,
    ) -> Result<Vec<FusedResult>, RagError> {
        if use_reranker {
            match &self.reranker {
                Some(reranker) => match reranker.rank(question, branches, top_k).await {
                    Ok(ranked) => return Ok(ranked),
                    Err(e) => {
                        tracing::warn!("Reranker failed, falling back to RRF: {}", e);
                    }
                },
                None => {
                    tracing::warn!("Reranker requested but not configured, using RRF");
                }
            }
        }

        self.rrf.rank(question, branches, top_k).await
    }

    /// source의 청크 전부 삭제
    pub async fn delete_source(&self, source_id: &str) -> Result<usize, RagError> {
        let lock = self.source_lock(source_id).await;
        let _guard = lock.lock().await;
        self.index.delete_source(source_id).await
    }

    /// 인덱싱된 source 목록
    pub async fn sources(&self) -> Result<Vec<String>, RagError> {
        self.index.sources().await
    }

    /// 인덱스 통계
    pub async fn stats(&self) -> Result<IndexStats, RagError> {
        self.index.stats().await
    }

    /// 임베딩 프로바이더 이름
    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }
}

// ============================================================================
// Tests
// ============================================================================
