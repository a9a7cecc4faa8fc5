//! # pagechat CLI
//!
//! ## Usage
//!
//! ```bash
//! pagechat --config ./config/pagechat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pagechat init` | Create the SQLite database and run schema migrations |
//! | `pagechat serve` | Start the HTTP server |
//! | `pagechat index <path>` | Index an encoded page path once, as a first view would |
//! | `pagechat indexed` | List URLs in the membership set |
//!
//! ## Examples
//!
//! ```bash
//! pagechat init
//! pagechat index 'https%3A%2F%2Fen.wikipedia.org%2Fwiki%2FTom_Harley'
//! RUST_LOG=pagechat=debug pagechat serve
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pagechat::error::IndexError;
use pagechat::reconstruct::split_route_path;
use pagechat::workflow::{IndexStatus, IndexingWorkflow};
use pagechat::{config, db, migrate, server};

/// Chat with any web page.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pagechat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pagechat",
    about = "Chat with any web page, indexed on first view",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pagechat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Run the indexing workflow for a page path.
    ///
    /// The path uses the same encoding as the page route, with or
    /// without the leading `/`.
    Index {
        /// Encoded page path, e.g. `https%3A%2F%2Fexample.com%2Fa`.
        path: String,
    },

    /// List indexed URLs, newest first.
    Indexed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Index { path } => {
            let pool = db::connect(&cfg).await?;
            let workflow = IndexingWorkflow::local(pool.clone(), &cfg)?;
            let segments = split_route_path(&path);

            let result = workflow.ensure_indexed(Some(segments.as_slice())).await;
            pool.close().await;

            match result {
                Ok(outcome) => match outcome.status {
                    IndexStatus::Indexed { chunks } => {
                        println!("Indexed {} ({} chunks)", outcome.url, chunks)
                    }
                    IndexStatus::AlreadyIndexed => println!("Already indexed: {}", outcome.url),
                },
                Err(err @ IndexError::IndexingFailed { .. }) => {
                    return Err(err).context("page was not indexed; it will be retried next time");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Indexed => {
            let pool = db::connect(&cfg).await?;
            let workflow = IndexingWorkflow::local(pool.clone(), &cfg)?;
            let urls = workflow.store().list().await?;
            pool.close().await;

            if urls.is_empty() {
                println!("No URLs indexed yet.");
            } else {
                println!("{:<25} URL", "INDEXED AT");
                for entry in &urls {
                    println!(
                        "{:<25} {}",
                        entry.indexed_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        entry.url
                    );
                }
                println!();
                println!("{} URL(s)", urls.len());
            }
        }
    }

    Ok(())
}
