//! # Agrogate CLI (`agro`)
//!
//! The `agro` binary operates the farming-advisory gateway. It provides
//! commands for running the HTTP server, indexing knowledge documents into
//! the vendor file-search store, one-shot questions, and store inspection.
//!
//! ## Usage
//!
//! ```bash
//! agro --config ./config/agro.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `agro serve` | Start the HTTP gateway |
//! | `agro scrape` | Collect public knowledge documents for ingestion |
//! | `agro ingest <path>` | Index a document into the file-search store |
//! | `agro ask "<question>"` | One-shot grounded question, printed to stdout |
//! | `agro store` | Show the store name and upload-ledger counts |
//!
//! All commands that reach the vendor require `GEMINI_API_KEY` in the
//! environment.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use agrogate::config::{load_config, Config};
use agrogate::gemini::{GeminiClient, ModelClient};
use agrogate::server;
use agrogate::store::StoreSync;
use agrogate::{advisor, infographic};

/// Agrogate — a farming-advisory gateway backed by the Gemini API.
#[derive(Parser)]
#[command(
    name = "agro",
    about = "Agrogate — a farming-advisory gateway backed by the Gemini API",
    version,
    long_about = "Agrogate forwards farmer questions, field photos, and knowledge documents \
    to the Gemini API (file-search RAG, vision, and image generation) and serves the results \
    as a small JSON API with graceful degradation on vendor failures."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Missing file is tolerated for `serve` convenience in dev: built-in
    /// defaults apply.
    #[arg(long, global = true, default_value = "./config/agro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    Serve,

    /// Collect public knowledge documents from curated agricultural sources.
    ///
    /// Scraped pages are written as `.txt` files under the configured
    /// knowledge directory, ready for `agro ingest`. Needs no API key.
    Scrape {
        /// Restrict to one source category (government, research, advisory,
        /// university).
        #[arg(long)]
        category: Option<String>,
    },

    /// Index a local document into the file-search store.
    ///
    /// Content is hashed first; identical content already in the upload
    /// ledger is skipped without any vendor call.
    Ingest {
        /// Path to the document (pdf, txt, md, csv, or an image).
        path: PathBuf,
    },

    /// Ask a one-shot question, grounded in the indexed documents.
    Ask {
        /// The question text.
        question: String,

        /// Answer language (english, hindi, marathi, tamil, telugu, kannada, punjabi).
        #[arg(long, default_value = "english")]
        language: String,
    },

    /// Show the store name and upload-ledger counts.
    Store,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };

    match cli.command {
        Commands::Serve => server::run_server(config).await,
        Commands::Scrape { category } => scrape(config, category.as_deref()).await,
        Commands::Ingest { path } => ingest(config, &path).await,
        Commands::Ask { question, language } => ask(config, &question, &language).await,
        Commands::Store => store_status(config).await,
    }
}

fn store_sync(config: &Config) -> Result<(Arc<Config>, Arc<dyn ModelClient>, StoreSync)> {
    let config = Arc::new(config.clone());
    let model: Arc<dyn ModelClient> = Arc::new(GeminiClient::new(&config.gemini)?);
    let sync = StoreSync::load(config.clone(), model.clone());
    Ok((config, model, sync))
}

async fn scrape(config: Config, category: Option<&str>) -> Result<()> {
    let mut scraper = agrogate::scrape::Scraper::new(&config.scrape)?;
    let report = scraper.run(category).await?;

    println!("pages fetched: {}", report.pages_fetched);
    println!("articles saved: {}", report.articles_saved);
    println!("output: {}", report.output_dir.display());
    if report.articles_saved > 0 {
        println!(
            "next: review the documents, then index them with `agro ingest`"
        );
    }
    Ok(())
}

async fn ingest(config: Config, path: &std::path::Path) -> Result<()> {
    let (_, _, sync) = store_sync(&config)?;
    let outcome = sync.ensure_uploaded(path).await?;

    println!("ingest {}", path.display());
    println!("  hash: {}", outcome.hash);
    if outcome.deduplicated {
        println!("  already indexed, upload skipped");
    } else {
        println!("  indexed into store");
    }
    println!("ok");
    Ok(())
}

async fn ask(config: Config, question: &str, language: &str) -> Result<()> {
    let (config, model, sync) = store_sync(&config)?;
    let outcome = advisor::ask(&config, model.as_ref(), &sync, question, language).await?;

    println!("{}", outcome.response);
    if let Some((url, reason)) = outcome.infographic {
        println!();
        println!("infographic: {} ({})", url, reason);
    }
    Ok(())
}

async fn store_status(config: Config) -> Result<()> {
    let (name, count) = agrogate::store::status_from_disk(&config);

    match name {
        Some(name) => println!("store: {}", name),
        None => println!("store: not created yet"),
    }
    println!("indexed documents: {}", count);
    println!("ledger: {}", config.store.ledger_path.display());
    println!(
        "showcase triggers: {}",
        infographic::SHOWCASE_TRIGGERS.join(", ")
    );
    Ok(())
}
