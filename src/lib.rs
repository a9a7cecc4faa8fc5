//! # pagechat
//!
//! Chat with any web page. Put a page URL after the server's address and
//! the page is fetched, chunked and indexed on its first view; every later
//! view skips straight to a chat session whose answers are grounded in the
//! indexed content.
//!
//! ## Architecture
//!
//! ```text
//! GET /https%3A%2F%2Fexample.com%2Fa
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ reconstruct  │──▶│   workflow   │──▶│  membership  │  indexed-urls set
//! │ segments→URL │   │ index once   │   │    store     │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │   indexer    │──▶│    SQLite    │
//!                    │ fetch+chunk  │   │ chunks+FTS5  │
//!                    └──────────────┘   └──────┬───────┘
//!                                              ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │  chat page   │──▶│ chat stream  │  SSE deltas
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Workflow error taxonomy |
//! | [`reconstruct`] | Route segments to canonical URL |
//! | [`membership`] | Indexed-URL set (SQLite and in-memory) |
//! | [`indexer`] | Fetch, extract, chunk and store a page |
//! | [`html`] | Readable text extraction from HTML |
//! | [`chunk`] | Text chunking |
//! | [`workflow`] | Index-once controller |
//! | [`retrieval`] | Keyword context retrieval |
//! | [`chat`] | Chat providers and grounded replies |
//! | [`page`] | Server-rendered pages |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod html;
pub mod indexer;
pub mod membership;
pub mod migrate;
pub mod models;
pub mod page;
pub mod reconstruct;
pub mod retrieval;
pub mod server;
pub mod workflow;
