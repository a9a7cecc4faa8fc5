//! Context indexing: fetch a resource, extract text, chunk, store.
//!
//! The [`ContextIndexer`] trait is the narrow contract the indexing
//! workflow depends on. [`LocalContextIndexer`] is the built-in
//! implementation:
//!
//! ```text
//! source URL ──▶ HTTP GET ──▶ html::extract_page ──▶ chunk_text ──▶ SQLite
//!                (timeout,      (title + blocks)      (size/overlap)   documents
//!                 size cap)                                             chunks
//!                                                                       chunks_fts
//! ```
//!
//! Re-indexing the same source replaces its document body and all of its
//! chunks in one transaction.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::FetchConfig;
use crate::html::extract_page;
use crate::models::{Chunk, ChunkingParams, Document, IndexReport, IndexingRequest, ResourceKind};

/// Ingests a resource into the retrieval index.
#[async_trait]
pub trait ContextIndexer: Send + Sync {
    /// Fetch, parse and store `request.source`. Any error means nothing
    /// usable was stored for this request.
    async fn add(&self, request: &IndexingRequest) -> Result<IndexReport>;
}

/// Fetches pages over HTTP and stores chunks in the local SQLite index.
pub struct LocalContextIndexer {
    pool: SqlitePool,
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl LocalContextIndexer {
    pub fn new(pool: SqlitePool, fetch: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .user_agent(fetch.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            pool,
            client,
            max_body_bytes: fetch.max_body_bytes,
        })
    }

    async fn fetch(&self, url: &str) -> Result<(String, String)> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("fetching {} returned {}", url, status);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                bail!("{} is too large to index ({} bytes)", url, len);
            }
        }

        let mut body = Vec::new();
        while let Some(piece) = response.chunk().await? {
            body.extend_from_slice(&piece);
            if body.len() > self.max_body_bytes {
                bail!(
                    "{} is too large to index (over {} bytes)",
                    url,
                    self.max_body_bytes
                );
            }
        }

        Ok((content_type, String::from_utf8_lossy(&body).into_owned()))
    }
}

#[async_trait]
impl ContextIndexer for LocalContextIndexer {
    async fn add(&self, request: &IndexingRequest) -> Result<IndexReport> {
        let source = request.source.as_str();
        let (content_type, raw) = self.fetch(source).await?;

        let (title, text) = match request.kind {
            ResourceKind::Html => {
                let page = extract_page(&raw);
                (page.title, page.text)
            }
        };

        if text.trim().is_empty() {
            bail!("{} has no indexable text", source);
        }

        let doc = new_document(source, title, &content_type, text);
        let report = index_document(&self.pool, &doc, request.config).await?;

        tracing::info!(
            url = source,
            document_id = %report.document_id,
            chunks = report.chunks,
            "indexed page"
        );

        Ok(report)
    }
}

fn new_document(source_url: &str, title: Option<String>, content_type: &str, body: String) -> Document {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hasher.update(body.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    Document {
        id: Uuid::new_v4().to_string(),
        source_url: source_url.to_string(),
        title,
        content_type: content_type.to_string(),
        body,
        fetched_at: chrono::Utc::now().timestamp(),
        dedup_hash,
    }
}

/// Store `doc` and its chunks in one transaction.
///
/// The document row is keyed by `source_url`, so indexing the same source
/// twice (including two concurrent runs) leaves a single document whose
/// chunks come from whichever run committed last.
pub async fn index_document(
    pool: &SqlitePool,
    doc: &Document,
    params: ChunkingParams,
) -> Result<IndexReport> {
    let mut tx = pool.begin().await?;

    let doc_id = upsert_document(&mut tx, doc).await?;
    let chunks = chunk_text(&doc_id, &doc.body, params.chunk_size, params.chunk_overlap);
    replace_chunks(&mut tx, &doc_id, &chunks).await?;

    tx.commit().await?;
    Ok(IndexReport {
        document_id: doc_id,
        chunks: chunks.len(),
    })
}

/// Insert or update the document for `doc.source_url`; returns the id of
/// the stored row, which is the existing one on conflict.
pub async fn upsert_document(conn: &mut SqliteConnection, doc: &Document) -> Result<String> {
    let doc_id: String = sqlx::query_scalar(
        r#"
        INSERT INTO documents (id, source_url, title, content_type, body, fetched_at, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_url) DO UPDATE SET
            title = excluded.title,
            content_type = excluded.content_type,
            body = excluded.body,
            fetched_at = excluded.fetched_at,
            dedup_hash = excluded.dedup_hash
        RETURNING id
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.source_url)
    .bind(&doc.title)
    .bind(&doc.content_type)
    .bind(&doc.body)
    .bind(doc.fetched_at)
    .bind(&doc.dedup_hash)
    .fetch_one(&mut *conn)
    .await?;

    Ok(doc_id)
}

/// Replace every chunk (and FTS row) of a document.
pub async fn replace_chunks(
    conn: &mut SqliteConnection,
    document_id: &str,
    chunks: &[Chunk],
) -> Result<()> {
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *conn)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}
