//! SQLite 청크 저장소 - 텍스트 저장 + FTS5 키워드 검색
//!
//! 키워드 브랜치의 저장소입니다. 청크 텍스트와 메타데이터를 보관하고
//! BM25 스코어링된 FTS5 검색을 제공합니다.
//! ref: https://www.sqlite.org/fts5.html

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};

use super::{IndexedDocument, ScoredChunk};

/// meta 테이블에 기록되는 임베딩 차원 키
const META_DIMENSION_KEY: &str = "embedding_dimension";

// ============================================================================
// SqliteChunkStore
// ============================================================================

/// SQLite 기반 청크 저장소
///
/// 청크 텍스트 보관과 FTS5 키워드 검색을 담당합니다.
pub struct SqliteChunkStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteChunkStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        // INSERT OR REPLACE가 삭제하는 행에도 FTS 트리거가 돌도록 설정
        conn.pragma_update(None, "recursive_triggers", true)
            .context("Failed to enable recursive triggers")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                page INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                text TEXT NOT NULL,
                indexed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .context("Failed to create chunks table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)",
            [],
        )
        .context("Failed to create source index")?;

        // 차원 가드용 meta 테이블
        conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create meta table")?;

        // FTS5 가상 테이블 (키워드 검색)
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                text,
                content=chunks,
                content_rowid=rowid
            )",
            [],
        )
        .context("Failed to create FTS5 table")?;

        // FTS5 동기화 트리거
        conn.execute_batch(
            r#"
            CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text)
                VALUES('delete', old.rowid, old.text);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, text)
                VALUES('delete', old.rowid, old.text);
                INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
            END;
            "#,
        )
        .context("Failed to create FTS5 triggers")?;

        tracing::debug!("Chunk store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 저장된 임베딩 차원 확인
    ///
    /// 최초 호출 시 차원을 기록하고, 이후에는 일치 여부를 검사합니다.
    /// 차원이 다르면 전체 재인덱싱 없이는 열 수 없습니다.
    pub fn guard_dimension(&self, dimension: usize) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![META_DIMENSION_KEY],
                |row| row.get(0),
            )
            .ok();

        match stored {
            Some(value) => {
                let stored_dim: usize = value.parse().unwrap_or(0);
                if stored_dim != dimension {
                    anyhow::bail!(
                        "index was built with dimension {} but provider uses {}: \
                         a full reindex is required",
                        stored_dim,
                        dimension
                    );
                }
                Ok(())
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                    params![META_DIMENSION_KEY, dimension.to_string()],
                )
                .context("Failed to record embedding dimension")?;
                Ok(())
            }
        }
    }

    /// 청크 배치 삽입
    pub fn insert_chunks(&self, docs: &[IndexedDocument]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction().context("Failed to start transaction")?;
        for doc in docs {
            tx.execute(
                "INSERT OR REPLACE INTO chunks (chunk_id, source, page, seq, text, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    doc.chunk_id,
                    doc.source,
                    doc.page as i64,
                    doc.sequence_index as i64,
                    doc.text,
                    now
                ],
            )
            .context("Failed to insert chunk")?;
        }
        tx.commit().context("Failed to commit chunk batch")?;

        Ok(docs.len())
    }

    /// source의 청크 전부 삭제
    pub fn delete_source(&self, source: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let rows = conn
            .execute("DELETE FROM chunks WHERE source = ?1", params![source])
            .context("Failed to delete chunks")?;

        Ok(rows)
    }

    /// FTS5 키워드 검색
    ///
    /// BM25 스코어 순으로 반환합니다. bm25()는 음수(작을수록 관련도 높음)를
    /// 반환하므로 `1 / (1 + |bm25|)`로 정규화합니다.
    pub fn lexical_query(&self, query: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let escaped_query = escape_fts5_query(query);
        if escaped_query.is_empty() {
            return Ok(vec![]);
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT
                c.chunk_id,
                c.source,
                c.page,
                c.text,
                bm25(chunks_fts) as score
            FROM chunks_fts
            JOIN chunks c ON c.rowid = chunks_fts.rowid
            WHERE chunks_fts MATCH ?1
            ORDER BY bm25(chunks_fts)
            LIMIT ?2
            "#,
        )?;

        let results = stmt
            .query_map(params![escaped_query, limit as i64], |row| {
                let bm25: f64 = row.get(4)?;
                Ok(ScoredChunk {
                    chunk_id: row.get(0)?,
                    source: row.get(1)?,
                    page: row.get::<_, i64>(2)? as u32,
                    text: row.get(3)?,
                    score: (1.0 / (1.0 + bm25.abs())) as f32,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(results)
    }

    /// 인덱싱된 source 목록 (알파벳 순)
    pub fn sources(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare("SELECT DISTINCT source FROM chunks ORDER BY source")?;
        let sources = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(sources)
    }

    /// 저장소 통계: (청크 수, source 수, 텍스트 바이트 합)
    pub fn stats(&self) -> Result<(usize, usize, u64)> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let chunk_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .unwrap_or(0);

        let source_count: i64 = conn
            .query_row("SELECT COUNT(DISTINCT source) FROM chunks", [], |row| row.get(0))
            .unwrap_or(0);

        let text_bytes: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(text AS BLOB))), 0) FROM chunks",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok((chunk_count as usize, source_count as usize, text_bytes as u64))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// FTS5 쿼리 이스케이프
///
/// 특수 문자를 제거하고 단어만 추출합니다.
/// ref: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn escape_fts5_query(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    trimmed
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Tests
// ============================================================================
