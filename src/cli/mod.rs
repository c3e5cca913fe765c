//! CLI 모듈
//!
//! fuserag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use crate::embedding::{has_api_key, EmbeddingProvider, GeminiEmbedding};
use crate::index::{get_data_dir, LocalDocumentIndex};
use crate::llm::{LlmClient, OpenAiChat};
use crate::retrieval::{
    AnswerMode, ChunkConfig, HttpCrossEncoder, PageText, PipelineConfig, RagPipeline,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "fuserag")]
#[command(version, about = "하이브리드 검색 + 리랭킹 RAG 파이프라인", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 파일 또는 폴더를 인덱스에 추가
    Ingest {
        /// 인덱싱할 파일 경로 (.txt/.md, 페이지 구분은 form feed)
        #[arg(long)]
        file: Option<PathBuf>,

        /// 직접 입력할 텍스트 (--source 필수)
        #[arg(short, long)]
        text: Option<String>,

        /// 인덱싱할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// source 문서 ID (파일 입력 시 기본값: 파일 경로)
        #[arg(short, long)]
        source: Option<String>,

        /// 청크 크기 (문자 수)
        #[arg(long, default_value = "500")]
        chunk_size: usize,

        /// 청크 간 중첩 (문자 수)
        #[arg(long, default_value = "50")]
        overlap: usize,
    },

    /// 질문으로 인덱스 검색 + 답변 생성
    Query {
        /// 질문
        question: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 크로스 인코더 리랭커 사용 (RERANKER_URL 필요)
        #[arg(long)]
        rerank: bool,

        /// JSON 형식으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 인덱싱된 source 목록
    List,

    /// source 삭제
    Delete {
        /// 삭제할 source 문서 ID
        #[arg(short, long)]
        source: String,
    },

    /// 인덱스 상태 확인
    Status {
        /// JSON 형식으로 출력
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            file,
            text,
            dir,
            source,
            chunk_size,
            overlap,
        } => cmd_ingest(file, text, dir, source, chunk_size, overlap).await,
        Commands::Query {
            question,
            limit,
            rerank,
            json,
        } => cmd_query(&question, limit, rerank, json).await,
        Commands::List => cmd_list().await,
        Commands::Delete { source } => cmd_delete(&source).await,
        Commands::Status { json } => cmd_status(json).await,
    }
}

// ============================================================================
// Pipeline Assembly
// ============================================================================

/// 환경변수 기반으로 파이프라인 조립
///
/// - GEMINI_API_KEY: 임베딩 (필수)
/// - OPENAI_API_KEY: LLM 생성 (없으면 fallback 모드)
/// - RERANKER_URL: 크로스 인코더 (없으면 RRF만)
async fn build_pipeline(chunk: ChunkConfig) -> Result<RagPipeline> {
    if !has_api_key() {
        bail!(
            "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set.\n\
             Set: export GEMINI_API_KEY=your-api-key"
        );
    }

    let embedder = Arc::new(GeminiEmbedding::from_env().context("Failed to create embedder")?);

    let index = Arc::new(
        LocalDocumentIndex::open(&get_data_dir(), embedder.dimension())
            .await
            .context("Failed to open document index")?,
    );

    let answer_mode = if OpenAiChat::has_api_key() {
        let llm = OpenAiChat::from_env().context("Failed to create LLM client")?;
        tracing::info!("LLM generation enabled (model: {})", llm.model());
        AnswerMode::Llm(Arc::new(llm))
    } else {
        tracing::info!("OPENAI_API_KEY not set, using fallback answers");
        AnswerMode::Fallback
    };

    let config = PipelineConfig {
        chunk,
        ..PipelineConfig::default()
    };

    let mut pipeline = RagPipeline::new(index, embedder, answer_mode, config)
        .context("Failed to build pipeline")?;

    if let Ok(scorer) = HttpCrossEncoder::from_env() {
        tracing::info!("Cross-encoder reranker enabled");
        pipeline = pipeline.with_reranker(Arc::new(scorer));
    }

    Ok(pipeline)
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_ingest(
    file: Option<PathBuf>,
    text: Option<String>,
    dir: Option<PathBuf>,
    source: Option<String>,
    chunk_size: usize,
    overlap: usize,
) -> Result<()> {
    let chunk = ChunkConfig {
        chunk_size,
        overlap,
        ..ChunkConfig::default()
    };
    let pipeline = build_pipeline(chunk).await?;

    if let Some(text) = text {
        let source =
            source.ok_or_else(|| anyhow::anyhow!("--text requires --source <ID>"))?;
        let count = pipeline
            .index_document(&source, &pages_from_text(&text))
            .await
            .context("Failed to index text")?;
        println!("✅ 인덱싱 완료: {} (청크 {}개)", source, count);
        return Ok(());
    }

    if let Some(path) = file {
        let count = ingest_file(&pipeline, &path, source.as_deref()).await?;
        println!("✅ 인덱싱 완료: {} (청크 {}개)", path.display(), count);
        return Ok(());
    }

    if let Some(dir) = dir {
        let mut files = 0usize;
        let mut chunks = 0usize;

        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !is_text_file(path) {
                continue;
            }
            match ingest_file(&pipeline, path, None).await {
                Ok(count) => {
                    files += 1;
                    chunks += count;
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                }
            }
        }

        println!("✅ 인덱싱 완료: 파일 {}개, 청크 {}개", files, chunks);
        return Ok(());
    }

    bail!("--file, --text, --dir 중 하나를 지정하세요")
}

/// 파일 하나를 읽어 페이지 단위로 인덱싱
async fn ingest_file(
    pipeline: &RagPipeline,
    path: &Path,
    source: Option<&str>,
) -> Result<usize> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let source_id = source
        .map(|s| s.to_string())
        .unwrap_or_else(|| path.display().to_string());

    let count = pipeline
        .index_document(&source_id, &pages_from_text(&content))
        .await
        .with_context(|| format!("Failed to index {}", path.display()))?;

    Ok(count)
}

async fn cmd_query(question: &str, limit: usize, rerank: bool, json: bool) -> Result<()> {
    let pipeline = build_pipeline(ChunkConfig::default()).await?;

    let result = pipeline
        .query(question, limit, rerank)
        .await
        .context("Query failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("\n질문: {}", result.question);
    if result.degraded {
        println!("⚠️  일부 검색 브랜치가 실패해 결과가 제한적일 수 있습니다");
    }
    println!("\n답변 ({:?} 모드):\n{}", result.mode, result.answer);

    println!("\n--- 검색된 청크 {}개 ---", result.num_results);
    for (i, chunk) in result.retrieved_chunks.iter().enumerate() {
        println!(
            "{}. [{}] {} (p.{}, score={:.4})",
            i + 1,
            chunk.chunk_id,
            chunk.source,
            chunk.page,
            chunk.score
        );
    }

    Ok(())
}

async fn cmd_list() -> Result<()> {
    let pipeline = build_pipeline(ChunkConfig::default()).await?;
    let sources = pipeline.sources().await.context("Failed to list sources")?;

    if sources.is_empty() {
        println!("인덱싱된 문서가 없습니다");
        return Ok(());
    }

    println!("인덱싱된 source {}개:", sources.len());
    for source in sources {
        println!("  - {}", source);
    }

    Ok(())
}

async fn cmd_delete(source: &str) -> Result<()> {
    let pipeline = build_pipeline(ChunkConfig::default()).await?;
    let deleted = pipeline
        .delete_source(source)
        .await
        .context("Failed to delete source")?;

    if deleted == 0 {
        println!("해당 source를 찾지 못했습니다: {}", source);
    } else {
        println!("✅ 삭제 완료: {} (청크 {}개)", source, deleted);
    }

    Ok(())
}

async fn cmd_status(json: bool) -> Result<()> {
    let pipeline = build_pipeline(ChunkConfig::default()).await?;
    let stats = pipeline.stats().await.context("Failed to read stats")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("데이터 디렉토리: {}", get_data_dir().display());
    println!("임베딩 모델: {}", pipeline.embedder_name());
    println!("청크 수: {}", stats.chunk_count);
    println!("source 수: {}", stats.source_count);
    println!("텍스트 크기: {} bytes", stats.size_bytes);

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// form feed(\u{0C})로 페이지를 구분해 PageText 목록 생성
///
/// 페이지 구분자가 없으면 전체를 1페이지로 취급합니다.
fn pages_from_text(text: &str) -> Vec<PageText> {
    text.split('\u{0C}')
        .enumerate()
        .filter(|(_, page_text)| !page_text.trim().is_empty())
        .map(|(i, page_text)| PageText {
            page: (i + 1) as u32,
            text: page_text.to_string(),
        })
        .collect()
}

/// 인덱싱 대상 텍스트 파일인지 확인
fn is_text_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("md")
        )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_from_text_single_page() {
        let pages = pages_from_text("no page breaks here");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, 1);
    }

    #[test]
    fn test_pages_from_text_multiple_pages() {
        let pages = pages_from_text("first page\u{0C}second page\u{0C}third page");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].text, "first page");
        assert_eq!(pages[2].page, 3);
    }

    #[test]
    fn test_pages_from_text_skips_blank_pages() {
        let pages = pages_from_text("content\u{0C}   \u{0C}more content");
        assert_eq!(pages.len(), 2);
        // 페이지 번호는 원래 위치를 유지
        assert_eq!(pages[1].page, 3);
    }

    #[test]
    fn test_is_text_file_extension_filter() {
        assert!(!is_text_file(Path::new("/nonexistent/file.txt")));
        assert!(!is_text_file(Path::new("document.pdf")));
    }
}
