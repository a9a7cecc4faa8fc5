//! Context retrieval for chat grounding.
//!
//! Looks up the document indexed for a URL and returns the chunks that best
//! match a question, using the FTS5 index built by the local indexer. When
//! the question matches nothing, the opening chunks of the page are used so
//! that broad questions ("what is this page about?") still get context.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{CanonicalUrl, ContextChunk};

/// Return up to `limit` chunks of the page indexed for `url`, in page order.
///
/// An empty result means the URL has no indexed document.
pub async fn retrieve_context(
    pool: &SqlitePool,
    url: &CanonicalUrl,
    question: &str,
    limit: i64,
) -> Result<Vec<ContextChunk>> {
    let doc_id: Option<String> = sqlx::query_scalar("SELECT id FROM documents WHERE source_url = ?")
        .bind(url.as_str())
        .fetch_optional(pool)
        .await?;

    let Some(doc_id) = doc_id else {
        return Ok(Vec::new());
    };

    let mut chunks = match fts_query(question) {
        Some(query) => keyword_chunks(pool, &doc_id, &query, limit).await?,
        None => Vec::new(),
    };

    if chunks.is_empty() {
        chunks = leading_chunks(pool, &doc_id, limit).await?;
    }

    chunks.sort_by_key(|c| c.chunk_index);
    Ok(chunks)
}

async fn keyword_chunks(
    pool: &SqlitePool,
    document_id: &str,
    query: &str,
    limit: i64,
) -> Result<Vec<ContextChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT c.chunk_index, c.text
        FROM chunks_fts
        JOIN chunks c ON c.id = chunks_fts.chunk_id
        WHERE chunks_fts MATCH ? AND chunks_fts.document_id = ?
        ORDER BY chunks_fts.rank
        LIMIT ?
        "#,
    )
    .bind(query)
    .bind(document_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_chunk).collect())
}

async fn leading_chunks(pool: &SqlitePool, document_id: &str, limit: i64) -> Result<Vec<ContextChunk>> {
    let rows = sqlx::query(
        "SELECT chunk_index, text FROM chunks WHERE document_id = ? ORDER BY chunk_index LIMIT ?",
    )
    .bind(document_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_chunk).collect())
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> ContextChunk {
    ContextChunk {
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
    }
}

/// Turn free text into an FTS5 query: each word becomes a quoted term and
/// terms are OR-ed, so user punctuation can never be parsed as FTS syntax.
fn fts_query(question: &str) -> Option<String> {
    let terms: Vec<String> = question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(|w| format!("\"{}\"", w.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
