use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tower::ServiceExt;

use pagechat::config::load_config;
use pagechat::models::CanonicalUrl;
use pagechat::retrieval::retrieve_context;
use pagechat::server::{build_router, AppState};
use pagechat::{db, migrate};

const ARTICLE: &str = r#"<!DOCTYPE html>
<html><head><title>Tom Harley</title><script>var tracking = "zzsecret";</script></head>
<body>
<nav><a href="/">Home</a> <a href="/about">About</a></nav>
<article>
<h1>Tom Harley</h1>
<p>Tom Harley is a politician from Yorkshire who served two terms on the county council.</p>
<p>He studied chemistry at a northern university before moving into local government.</p>
<p>In his spare time he keeps bees and grows prize-winning leeks on his allotment.</p>
</article>
<footer>Copyright</footer>
</body></html>"#;

/// Serves a tiny site on an ephemeral port for the indexer to fetch.
async fn spawn_site() -> SocketAddr {
    let site = Router::new()
        .route("/article", get(|| async { Html(ARTICLE) }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/empty", get(|| async { Html("<html><body></body></html>") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, site).await.unwrap();
    });
    addr
}

/// Page-route path for `http://{addr}{page}`, fully encoded into one segment.
fn encoded_path(addr: SocketAddr, page: &str) -> String {
    let url = format!("http://{}{}", addr, page);
    format!(
        "/{}",
        url.replace('%', "%25")
            .replace(':', "%3A")
            .replace('/', "%2F")
    )
}

fn pagechat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pagechat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/pagechat.sqlite"

[server]
bind = "127.0.0.1:0"

[fetch]
timeout_secs = 5

[retrieval]
final_limit = 4
"#,
        root.display()
    );

    let config_path = config_dir.join("pagechat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pagechat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pagechat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pagechat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

async fn get_page(app: &Router, uri: &str) -> (StatusCode, String) {
    let resp = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pagechat(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/pagechat.sqlite").exists());

    let (_, _, success) = run_pagechat(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_indexed_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_pagechat(&config_path, &["init"]);

    let (stdout, stderr, success) = run_pagechat(&config_path, &["indexed"]);
    assert!(success, "indexed failed: {}", stderr);
    assert!(stdout.contains("No URLs indexed yet."));
}

#[test]
fn test_index_rejects_malformed_path() {
    let (_tmp, config_path) = setup_test_env();
    run_pagechat(&config_path, &["init"]);

    let (_, stderr, success) = run_pagechat(&config_path, &["index", "https%3A%2F%2Fa.test%G1"]);
    assert!(!success);
    assert!(stderr.contains("invalid url path"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_pagechat(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_index_then_list() {
    let addr = spawn_site().await;
    let (_tmp, config_path) = setup_test_env();
    let path = encoded_path(addr, "/article");

    let (stdout, stderr, success) = tokio::task::spawn_blocking({
        let config_path = config_path.clone();
        let path = path.clone();
        move || {
            run_pagechat(&config_path, &["init"]);
            run_pagechat(&config_path, &["index", &path])
        }
    })
    .await
    .unwrap();
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains(&format!("Indexed http://{}/article", addr)));

    let (stdout, _, success) = tokio::task::spawn_blocking({
        let config_path = config_path.clone();
        move || {
            run_pagechat(&config_path, &["index", &path]);
            run_pagechat(&config_path, &["indexed"])
        }
    })
    .await
    .unwrap();
    assert!(success);
    assert!(stdout.contains(&format!("http://{}/article", addr)));
    assert!(stdout.contains("1 URL(s)"));
}

#[tokio::test]
async fn test_first_view_fetches_and_indexes_page() {
    let addr = spawn_site().await;
    let (_tmp, config_path) = setup_test_env();
    let cfg = load_config(&config_path).unwrap();
    let app = build_router(AppState::from_config(&cfg).await.unwrap());

    let (status, body) = get_page(&app, &encoded_path(addr, "/article")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("could not be indexed"));

    let pool = db::connect(&cfg).await.unwrap();
    let url = CanonicalUrl::new(format!("http://{}/article", addr));
    let context = retrieve_context(&pool, &url, "Does he keep bees?", 4)
        .await
        .unwrap();
    assert!(context.iter().any(|c| c.text.contains("bees")));

    // Script and navigation text never reach the index.
    let leaked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunks_fts WHERE chunks_fts MATCH 'zzsecret OR about'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(leaked, 0);

    let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM indexed_urls WHERE url = ?")
        .bind(url.as_str())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(members, 1);
}

#[tokio::test]
async fn test_upstream_failure_is_not_remembered() {
    let addr = spawn_site().await;
    let (_tmp, config_path) = setup_test_env();
    let cfg = load_config(&config_path).unwrap();
    let app = build_router(AppState::from_config(&cfg).await.unwrap());

    for page in ["/broken", "/empty"] {
        let (status, body) = get_page(&app, &encoded_path(addr, page)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("could not be indexed"), "page {}", page);
    }

    let pool = db::connect(&cfg).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM indexed_urls")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(members, 0);
}

#[tokio::test]
async fn test_disabled_chat_provider_reports_unavailable() {
    let (_tmp, config_path) = setup_test_env();
    let cfg = load_config(&config_path).unwrap();
    let app = build_router(AppState::from_config(&cfg).await.unwrap());

    let resp = app
        .oneshot(
            Request::post("/api/chat-stream")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "sessionId": "abc",
                        "url": "https://example.com",
                        "messages": [{ "role": "user", "content": "hello" }],
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"]["code"], "chat_unavailable");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("disabled"));
}
