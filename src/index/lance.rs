//! LanceDB 벡터 인덱스 - cosine 유사도 검색
//!
//! 벡터 브랜치의 저장소입니다. `text_vector` 컬럼은 고정 차원
//! FixedSizeList이며, 차원은 임베딩 프로바이더와 일치해야 합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::{IndexedDocument, ScoredChunk};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스
///
/// 청크 텍스트와 메타데이터를 벡터 옆에 비정규화해 두어
/// 검색 결과를 추가 조회 없이 바로 돌려줍니다.
pub struct LanceVectorIndex {
    db: Connection,
    dimension: i32,
}

impl LanceVectorIndex {
    /// LanceDB 인덱스 열기
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            dimension: dimension as i32,
        })
    }

    /// 벡터 테이블 스키마
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("page", DataType::Int32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "text_vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 문서들을 Arrow RecordBatch로 변환
    fn docs_to_batch(&self, docs: &[IndexedDocument]) -> Result<RecordBatch> {
        if docs.is_empty() {
            anyhow::bail!("Cannot create batch from empty documents");
        }

        for doc in docs {
            if doc.text_vector.len() != self.dimension as usize {
                anyhow::bail!(
                    "vector dimension mismatch for chunk {}: expected {}, got {}",
                    doc.chunk_id,
                    self.dimension,
                    doc.text_vector.len()
                );
            }
        }

        let chunk_ids: Vec<&str> = docs.iter().map(|d| d.chunk_id.as_str()).collect();
        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        let pages: Vec<i32> = docs.iter().map(|d| d.page as i32).collect();
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();

        let vectors_flat: Vec<f32> = docs
            .iter()
            .flat_map(|d| d.text_vector.iter().copied())
            .collect();

        let values = Float32Array::from(vectors_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create vector array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(StringArray::from(chunk_ids)),
                Arc::new(StringArray::from(sources)),
                Arc::new(Int32Array::from(pages)),
                Arc::new(StringArray::from(texts)),
                Arc::new(vector_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    /// 벡터 배치 삽입
    pub async fn insert_batch(&self, docs: &[IndexedDocument]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let batch = self.docs_to_batch(docs)?;
        let schema = batch.schema();

        if self.table_exists().await {
            let table = self
                .db
                .open_table(TABLE_NAME)
                .execute()
                .await
                .context("Failed to open table")?;

            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(docs.len())
    }

    /// cosine 유사도 검색
    ///
    /// LanceDB는 cosine distance(0~2)를 반환하므로
    /// `1 - distance`로 유사도로 변환합니다.
    pub async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for search")?;

        let results = table
            .vector_search(query_vector.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let mut hits = Vec::new();

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        for batch in batches {
            let chunk_ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_id column"))?;

            let sources = batch
                .column_by_name("source")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing source column"))?;

            let pages = batch
                .column_by_name("page")
                .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing page column"))?;

            let texts = batch
                .column_by_name("text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing text column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                hits.push(ScoredChunk {
                    chunk_id: chunk_ids.value(i).to_string(),
                    source: sources.value(i).to_string(),
                    page: pages.value(i) as u32,
                    text: texts.value(i).to_string(),
                    score: 1.0 - distances.value(i),
                });
            }
        }

        Ok(hits)
    }

    /// source의 벡터 전부 삭제
    pub async fn delete_by_source(&self, source: &str) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for delete")?;

        let before_count = self.count().await?;

        let filter = format!("source = '{}'", escape_sql_literal(source));
        table
            .delete(&filter)
            .await
            .context("Failed to delete vectors")?;

        let after_count = self.count().await?;
        Ok(before_count.saturating_sub(after_count))
    }

    /// 벡터 개수 조회
    pub async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQL 문자열 리터럴 이스케이프 (작은따옴표 중복)
fn escape_sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

// ============================================================================
// Tests
// ============================================================================
