//! Error taxonomy for the URL indexing workflow.
//!
//! Plumbing (config loading, database setup, CLI) reports failures with
//! `anyhow`; the workflow surfaces these three kinds so that the HTTP layer
//! can decide between an error page and a degraded chat page.

use thiserror::Error;

use crate::models::CanonicalUrl;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Route segments were absent or not valid percent-encoding.
    #[error("invalid url path: {0}")]
    InvalidUrlPath(String),

    /// The membership store could not be reached.
    #[error("membership store unavailable: {0}")]
    StoreUnavailable(String),

    /// The context indexer rejected or failed to ingest the resource.
    ///
    /// Carries the reconstructed URL so the caller can still render a chat
    /// page for it.
    #[error("indexing failed for {url}: {message}")]
    IndexingFailed { url: CanonicalUrl, message: String },
}

impl IndexError {
    /// Machine-readable code used in HTTP error bodies and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::InvalidUrlPath(_) => "bad_request",
            IndexError::StoreUnavailable(_) => "store_unavailable",
            IndexError::IndexingFailed { .. } => "indexing_failed",
        }
    }
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        IndexError::StoreUnavailable(err.to_string())
    }
}
