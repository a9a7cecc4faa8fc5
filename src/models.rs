//! Core data models used throughout pagechat.
//!
//! These types describe the URLs, indexing requests, documents, chunks and
//! chat messages that flow between the route handlers, the indexing
//! workflow and the chat session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chunk window size, in characters, used for every page ingestion.
pub const CHUNK_SIZE: usize = 200;
/// Characters shared between consecutive chunk windows.
pub const CHUNK_OVERLAP: usize = 50;

/// A resource locator rebuilt from catch-all route segments.
///
/// Produced only by [`crate::reconstruct::reconstruct_url`] (or tests). No
/// check is made that the value is a well-formed absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of resource handed to the context indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// An HTML page; text is extracted from its markup before chunking.
    Html,
}

/// Chunking parameters sent with an [`IndexingRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// One ingestion call. Built fresh per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingRequest {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub source: CanonicalUrl,
    pub config: ChunkingParams,
}

impl IndexingRequest {
    /// The request used for every page view: HTML, 200-char windows, 50 overlap.
    pub fn html(source: CanonicalUrl) -> Self {
        Self {
            kind: ResourceKind::Html,
            source,
            config: ChunkingParams {
                chunk_size: CHUNK_SIZE,
                chunk_overlap: CHUNK_OVERLAP,
            },
        }
    }
}

/// What the indexer stored for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub document_id: String,
    pub chunks: usize,
}

/// A member of the indexed-URL set together with its insertion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedUrl {
    pub url: CanonicalUrl,
    pub indexed_at: DateTime<Utc>,
}

/// Normalized page stored by the local indexer.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub content_type: String,
    pub body: String,
    pub fetched_at: i64,
    pub dedup_hash: String,
}

/// A window of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk selected to ground a chat reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextChunk {
    pub chunk_index: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_request_wire_shape() {
        let req = IndexingRequest::html(CanonicalUrl::new("https://example.com/a"));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "html",
                "source": "https://example.com/a",
                "config": { "chunkSize": 200, "chunkOverlap": 50 }
            })
        );
    }

    #[test]
    fn test_chat_message_roles_lowercase() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
    }
}
