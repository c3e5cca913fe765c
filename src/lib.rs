//! fuserag - 하이브리드 검색 + 리랭킹 RAG 파이프라인
//!
//! LanceDB 벡터 검색과 SQLite FTS5 키워드 검색을 동시에 실행하고,
//! RRF 또는 크로스 인코더로 융합한 뒤 LLM(또는 결정적 fallback)으로
//! 답변을 생성합니다.

pub mod cli;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod retrieval;

// Re-exports
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use error::{LlmError, RagError};
pub use index::{
    get_data_dir, DocumentIndex, IndexStats, IndexedDocument, LanceVectorIndex,
    LocalDocumentIndex, ScoredChunk, SqliteChunkStore,
};
pub use llm::{LlmClient, OpenAiChat};
pub use retrieval::{
    AnswerMode, AnswerSource, AnswerSynthesizer, BranchResults, Chunk, ChunkConfig, ChunkSplitter,
    CrossEncoderReranker, FusedResult, HttpCrossEncoder, HybridSearchEngine, OriginRanks,
    PageText, PairScorer, PipelineConfig, QueryResult, RagPipeline, RankingStrategy,
    RetrievedChunk, RrfFusion, SearchConfig, SearchHit, Synthesis, SynthesizerConfig,
};
