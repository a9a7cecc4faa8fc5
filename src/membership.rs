//! Indexed-URL membership store.
//!
//! The [`MembershipStore`] trait is the durable set the indexing workflow
//! uses to remember which URLs were already ingested. It is injected into
//! the workflow so tests can swap in [`InMemoryMembershipStore`].
//!
//! Implementations must be `Send + Sync`; `exists` may be called
//! concurrently for the same or different URLs. Every failure of the backing
//! store is reported as [`IndexError::StoreUnavailable`], never as "absent".

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::IndexError;
use crate::models::{CanonicalUrl, IndexedUrl};

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// True iff `url` was previously inserted.
    async fn exists(&self, url: &CanonicalUrl) -> Result<bool, IndexError>;

    /// Add `url` to the set. Inserting a present URL is a no-op.
    async fn insert(&self, url: &CanonicalUrl) -> Result<(), IndexError>;

    /// All members, newest first.
    async fn list(&self) -> Result<Vec<IndexedUrl>, IndexError>;
}

/// SQLite-backed set. Rows are keyed by `(set_name, url)`.
pub struct SqliteMembershipStore {
    pool: SqlitePool,
    set_name: String,
}

impl SqliteMembershipStore {
    pub fn new(pool: SqlitePool, set_name: impl Into<String>) -> Self {
        Self {
            pool,
            set_name: set_name.into(),
        }
    }
}

#[async_trait]
impl MembershipStore for SqliteMembershipStore {
    async fn exists(&self, url: &CanonicalUrl) -> Result<bool, IndexError> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM indexed_urls WHERE set_name = ? AND url = ?)",
        )
        .bind(&self.set_name)
        .bind(url.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn insert(&self, url: &CanonicalUrl) -> Result<(), IndexError> {
        sqlx::query("INSERT OR IGNORE INTO indexed_urls (set_name, url, indexed_at) VALUES (?, ?, ?)")
            .bind(&self.set_name)
            .bind(url.as_str())
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<IndexedUrl>, IndexError> {
        let rows = sqlx::query(
            "SELECT url, indexed_at FROM indexed_urls WHERE set_name = ? ORDER BY indexed_at DESC, url ASC",
        )
        .bind(&self.set_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let millis: i64 = row.get("indexed_at");
                IndexedUrl {
                    url: CanonicalUrl::new(row.get::<String, _>("url")),
                    indexed_at: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
                }
            })
            .collect())
    }
}

/// In-process set for tests and throwaway deployments.
#[derive(Default)]
pub struct InMemoryMembershipStore {
    urls: RwLock<HashMap<CanonicalUrl, DateTime<Utc>>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.urls.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> IndexError {
    IndexError::StoreUnavailable("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn exists(&self, url: &CanonicalUrl) -> Result<bool, IndexError> {
        Ok(self.urls.read().map_err(poisoned)?.contains_key(url))
    }

    async fn insert(&self, url: &CanonicalUrl) -> Result<(), IndexError> {
        self.urls
            .write()
            .map_err(poisoned)?
            .entry(url.clone())
            .or_insert_with(Utc::now);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<IndexedUrl>, IndexError> {
        let mut out: Vec<IndexedUrl> = self
            .urls
            .read()
            .map_err(poisoned)?
            .iter()
            .map(|(url, at)| IndexedUrl {
                url: url.clone(),
                indexed_at: *at,
            })
            .collect();
        out.sort_by(|a, b| b.indexed_at.cmp(&a.indexed_at).then(a.url.cmp(&b.url)));
        Ok(out)
    }
}
