//! URL indexing workflow.
//!
//! Ensures each distinct [`CanonicalUrl`] is submitted to the
//! [`ContextIndexer`] at most once, while repeat views cost a single
//! membership lookup:
//!
//! ```text
//! segments ──▶ reconstruct_url ──▶ store.exists ──┬─ true ──▶ AlreadyIndexed
//!                                                 └─ false ─▶ indexer.add ──▶ store.insert ──▶ Indexed
//! ```
//!
//! # Failure policy
//!
//! | Error | Effect |
//! |-------|--------|
//! | `InvalidUrlPath` | returned before any store or indexer call |
//! | `StoreUnavailable` | returned before the indexer runs |
//! | `IndexingFailed` | membership not written, so the next view retries |
//!
//! # Concurrency
//!
//! `exists` and `insert` are two separate calls. Two simultaneous first
//! views of the same URL can both see `exists == false` and both call the
//! indexer. That race is accepted: dedup is best-effort, and the indexer
//! replaces a document's chunks on re-index, so a duplicate ingestion
//! leaves one copy behind.

use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::IndexError;
use crate::indexer::{ContextIndexer, LocalContextIndexer};
use crate::membership::{MembershipStore, SqliteMembershipStore};
use crate::models::{CanonicalUrl, IndexingRequest};
use crate::reconstruct::reconstruct_url;

/// What happened for one page view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexStatus {
    /// This view ingested the URL.
    Indexed { chunks: usize },
    /// The URL was already in the membership store; nothing was fetched.
    AlreadyIndexed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub url: CanonicalUrl,
    #[serde(flatten)]
    pub status: IndexStatus,
}

#[derive(Clone)]
pub struct IndexingWorkflow {
    store: Arc<dyn MembershipStore>,
    indexer: Arc<dyn ContextIndexer>,
}

impl IndexingWorkflow {
    pub fn new(store: Arc<dyn MembershipStore>, indexer: Arc<dyn ContextIndexer>) -> Self {
        Self { store, indexer }
    }

    /// Workflow backed by the SQLite membership set and the local indexer.
    pub fn local(pool: SqlitePool, config: &Config) -> anyhow::Result<Self> {
        let store = SqliteMembershipStore::new(pool.clone(), config.db.set_name.clone());
        let indexer = LocalContextIndexer::new(pool, &config.fetch)?;
        Ok(Self::new(Arc::new(store), Arc::new(indexer)))
    }

    pub fn store(&self) -> &Arc<dyn MembershipStore> {
        &self.store
    }

    /// Reconstruct the URL from route segments and index it if unseen.
    pub async fn ensure_indexed<S: AsRef<str>>(
        &self,
        segments: Option<&[S]>,
    ) -> Result<IndexOutcome, IndexError> {
        let url = reconstruct_url(segments)?;
        self.ensure_url_indexed(url).await
    }

    /// Index an already reconstructed URL if it is not yet a member.
    pub async fn ensure_url_indexed(&self, url: CanonicalUrl) -> Result<IndexOutcome, IndexError> {
        if self.store.exists(&url).await? {
            tracing::debug!(url = %url, "already indexed");
            return Ok(IndexOutcome {
                url,
                status: IndexStatus::AlreadyIndexed,
            });
        }

        let request = IndexingRequest::html(url.clone());
        let report = match self.indexer.add(&request).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(url = %url, error = %format!("{:#}", err), "indexing failed");
                return Err(IndexError::IndexingFailed {
                    message: format!("{:#}", err),
                    url,
                });
            }
        };

        self.store.insert(&url).await?;

        Ok(IndexOutcome {
            url,
            status: IndexStatus::Indexed {
                chunks: report.chunks,
            },
        })
    }
}
