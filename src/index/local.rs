//! LocalDocumentIndex - SQLite + LanceDB 결합 인덱스
//!
//! 키워드 브랜치(SQLite FTS5)와 벡터 브랜치(LanceDB)를 하나의
//! `DocumentIndex`로 묶습니다. 두 저장소는 청크 단위로 동일한
//! `{text, text_vector, page, source, chunk_id}` 스키마를 공유합니다.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;

use crate::error::RagError;

use super::lance::LanceVectorIndex;
use super::store::SqliteChunkStore;
use super::{DocumentIndex, IndexStats, IndexedDocument, ScoredChunk};

// ============================================================================
// LocalDocumentIndex
// ============================================================================

/// 로컬 문서 인덱스
pub struct LocalDocumentIndex {
    store: SqliteChunkStore,
    vectors: LanceVectorIndex,
}

impl LocalDocumentIndex {
    /// 데이터 디렉토리에서 인덱스 열기
    ///
    /// `dimension`은 임베딩 프로바이더의 차원과 일치해야 하며,
    /// 기존 인덱스와 다르면 전체 재인덱싱을 요구하는 에러를 반환합니다.
    pub async fn open(data_dir: &Path, dimension: usize) -> Result<Self, RagError> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)
                .context("Failed to create data directory")
                .map_err(RagError::Index)?;
        }

        let store = SqliteChunkStore::open(&data_dir.join("chunks.db"))?;
        store.guard_dimension(dimension)?;

        let vectors = LanceVectorIndex::open(&data_dir.join("vectors.lance"), dimension).await?;

        Ok(Self { store, vectors })
    }
}

#[async_trait]
impl DocumentIndex for LocalDocumentIndex {
    async fn replace_source(
        &self,
        source: &str,
        docs: &[IndexedDocument],
    ) -> Result<usize, RagError> {
        // 기존 청크를 양쪽 저장소에서 제거한 뒤 새로 기록 (replace-on-reindex)
        self.vectors.delete_by_source(source).await?;
        self.store.delete_source(source)?;

        if docs.is_empty() {
            tracing::warn!("No chunks to index for source: {}", source);
            return Ok(0);
        }

        self.vectors.insert_batch(docs).await?;
        let count = self.store.insert_chunks(docs)?;

        tracing::info!("Indexed source: {} (chunks={})", source, count);
        Ok(count)
    }

    async fn vector_query(
        &self,
        vector: &[f32],
        top_n: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        Ok(self.vectors.search(vector, top_n).await?)
    }

    async fn lexical_query(
        &self,
        query: &str,
        top_n: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        Ok(self.store.lexical_query(query, top_n)?)
    }

    async fn delete_source(&self, source: &str) -> Result<usize, RagError> {
        self.vectors.delete_by_source(source).await?;
        Ok(self.store.delete_source(source)?)
    }

    async fn sources(&self) -> Result<Vec<String>, RagError> {
        Ok(self.store.sources()?)
    }

    async fn stats(&self) -> Result<IndexStats, RagError> {
        let (chunk_count, source_count, size_bytes) = self.store.stats()?;
        Ok(IndexStats {
            chunk_count,
            source_count,
            size_bytes,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_DIM: usize = 8;

    fn make_doc(source: &str, seq: u32, text: &str, fill: f32) -> IndexedDocument {
        IndexedDocument {
            chunk_id: format!("{}#{:05}", source, seq),
            source: source.to_string(),
            page: 1,
            sequence_index: seq,
            text: text.to_string(),
            text_vector: vec![fill; TEST_DIM],
        }
    }

    #[tokio::test]
    async fn test_replace_source_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let index = LocalDocumentIndex::open(dir.path(), TEST_DIM).await.unwrap();

        index
            .replace_source(
                "doc1",
                &[
                    make_doc("doc1", 0, "alpha text about rust", 0.1),
                    make_doc("doc1", 1, "beta text about rust", 0.2),
                ],
            )
            .await
            .unwrap();

        // 다른 내용으로 재인덱싱하면 이전 청크는 전부 사라져야 함
        index
            .replace_source("doc1", &[make_doc("doc1", 0, "gamma replacement", 0.3)])
            .await
            .unwrap();

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.source_count, 1);

        assert!(index.lexical_query("alpha", 10).await.unwrap().is_empty());
        assert_eq!(index.lexical_query("gamma", 10).await.unwrap().len(), 1);
        assert_eq!(index.vectors.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queries_on_empty_index() {
        let dir = TempDir::new().unwrap();
        let index = LocalDocumentIndex::open(dir.path(), TEST_DIM).await.unwrap();

        let vector_hits = index.vector_query(&vec![0.1; TEST_DIM], 5).await.unwrap();
        assert!(vector_hits.is_empty());

        let lexical_hits = index.lexical_query("anything", 5).await.unwrap();
        assert!(lexical_hits.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_guard_across_open() {
        let dir = TempDir::new().unwrap();

        {
            let _index = LocalDocumentIndex::open(dir.path(), TEST_DIM).await.unwrap();
        }

        let result = LocalDocumentIndex::open(dir.path(), TEST_DIM * 2).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_source_clears_both_sides() {
        let dir = TempDir::new().unwrap();
        let index = LocalDocumentIndex::open(dir.path(), TEST_DIM).await.unwrap();

        index
            .replace_source("doc1", &[make_doc("doc1", 0, "to be removed", 0.1)])
            .await
            .unwrap();
        index
            .replace_source("doc2", &[make_doc("doc2", 0, "to be kept", 0.2)])
            .await
            .unwrap();

        let deleted = index.delete_source("doc1").await.unwrap();
        assert_eq!(deleted, 1);

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(index.sources().await.unwrap(), vec!["doc2".to_string()]);
        assert_eq!(index.vectors.count().await.unwrap(), 1);
    }
}
