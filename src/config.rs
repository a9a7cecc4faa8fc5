use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Name of the indexed-URL set inside the membership table.
    #[serde(default = "default_set_name")]
    pub set_name: String,
}

fn default_set_name() -> String {
    "indexed-urls".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Pages larger than this are rejected instead of being indexed.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_user_agent() -> String {
    format!("pagechat/{}", env!("CARGO_PKG_VERSION"))
}
fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
        }
    }
}

fn default_final_limit() -> i64 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API (e.g. a local server).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            timeout_secs: default_chat_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_chat_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    512
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Config with defaults everywhere and the database at `db_path`.
    ///
    /// Used by tests and by callers that build the server in-process.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                set_name: default_set_name(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:3000".to_string(),
            },
            fetch: FetchConfig::default(),
            retrieval: RetrievalConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.set_name.trim().is_empty() {
        anyhow::bail!("db.set_name must not be empty");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if config.fetch.max_body_bytes == 0 {
        anyhow::bail!("fetch.max_body_bytes must be > 0");
    }

    if !(0.0..=2.0).contains(&config.chat.temperature) {
        anyhow::bail!("chat.temperature must be in [0.0, 2.0]");
    }

    match config.chat.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.chat.model.is_none() {
                anyhow::bail!(
                    "chat.model must be specified when provider is '{}'",
                    config.chat.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[db]
path = "./data/pagechat.sqlite"

[server]
bind = "127.0.0.1:3000"
"#;

    #[test]
    fn test_defaults_applied() {
        let cfg = parse_config(BASE).unwrap();
        assert_eq!(cfg.db.set_name, "indexed-urls");
        assert_eq!(cfg.retrieval.final_limit, 8);
        assert_eq!(cfg.fetch.timeout_secs, 20);
        assert!(!cfg.chat.is_enabled());
    }

    #[test]
    fn test_openai_requires_model() {
        let content = format!("{}\n[chat]\nprovider = \"openai\"\n", BASE);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("chat.model"));
    }

    #[test]
    fn test_openai_with_model() {
        let content = format!(
            "{}\n[chat]\nprovider = \"openai\"\nmodel = \"gpt-4o-mini\"\nurl = \"http://localhost:11434/v1\"\n",
            BASE
        );
        let cfg = parse_config(&content).unwrap();
        assert!(cfg.chat.is_enabled());
        assert_eq!(cfg.chat.url.as_deref(), Some("http://localhost:11434/v1"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let content = format!("{}\n[chat]\nprovider = \"magic\"\n", BASE);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_invalid_final_limit() {
        let content = format!("{}\n[retrieval]\nfinal_limit = 0\n", BASE);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_missing_db_section() {
        assert!(parse_config("[server]\nbind = \"0.0.0.0:1\"\n").is_err());
    }
}
