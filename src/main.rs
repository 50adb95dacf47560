//! rustbookpages - page counts and publisher notes for a list of books
//!
//! ## Usage
//!
//! ```bash
//! PERPLEXITY_API_KEY=... rustbookpages enrich --input books.csv --output books_with_pages.csv
//! rustbookpages prompt --input books.csv --batch 1
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rustbookpages::books::{load_books, plan_batches};
use rustbookpages::config::{
    resolve_api_key, GenerationParams, PipelineConfig, DEFAULT_BASE_URL, DEFAULT_BATCH_SIZE,
    DEFAULT_DELAY_SECS, DEFAULT_INPUT, DEFAULT_MODEL, DEFAULT_OUTPUT,
};
use rustbookpages::pipeline::{self, RunSummary};
use rustbookpages::prompts::build_messages;
use rustbookpages::search::SearchConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Enrich a book list with page counts, publisher notes and sources
#[derive(Parser)]
#[command(name = "rustbookpages")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the search endpoint and write the enriched table
    Enrich {
        /// Input CSV with `title` and `year` columns
        #[arg(short, long, default_value = DEFAULT_INPUT)]
        input: PathBuf,

        /// Output CSV (overwritten)
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Books per request
        #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Seconds to wait after each batch
        #[arg(long, default_value_t = DEFAULT_DELAY_SECS)]
        delay_secs: u64,

        /// API key (defaults to PERPLEXITY_API_KEY, .env is read)
        #[arg(long)]
        api_key: Option<String>,

        /// Endpoint base URL
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,

        /// Model name
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,

        /// Maximum tokens per answer
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Request timeout in seconds (transport default when unset)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Append a token usage line to this file
        #[arg(long)]
        usage_log: Option<PathBuf>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Print the messages each batch would send, without calling the endpoint
    Prompt {
        /// Input CSV with `title` and `year` columns
        #[arg(short, long, default_value = DEFAULT_INPUT)]
        input: PathBuf,

        /// Books per request
        #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Only show this batch (1-based)
        #[arg(long)]
        batch: Option<usize>,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    match cli.command {
        Commands::Enrich {
            input,
            output,
            batch_size,
            delay_secs,
            api_key,
            base_url,
            model,
            temperature,
            max_tokens,
            timeout_secs,
            usage_log,
            no_progress,
        } => {
            let defaults = GenerationParams::default();
            let params = GenerationParams {
                temperature: temperature.unwrap_or(defaults.temperature),
                max_tokens: max_tokens.unwrap_or(defaults.max_tokens),
                ..defaults
            };

            let config = PipelineConfig {
                input,
                output,
                batch_size,
                delay: Duration::from_secs(delay_secs),
                search: SearchConfig {
                    base_url,
                    api_key: resolve_api_key(api_key),
                    model,
                    params,
                    timeout: timeout_secs.map(Duration::from_secs),
                },
                show_progress: !no_progress,
            };

            run_enrich(config, usage_log).await
        }
        Commands::Prompt {
            input,
            batch_size,
            batch,
        } => show_prompts(&input, batch_size, batch),
    }
}

// ============================================================================
// Enrichment
// ============================================================================

async fn run_enrich(config: PipelineConfig, usage_log: Option<PathBuf>) -> Result<()> {
    config.validate()?;

    println!("Starting to process {}", config.input.display());
    info!(
        input = %config.input.display(),
        output = %config.output.display(),
        batch_size = config.batch_size,
        model = %config.search.model,
        "Starting enrichment"
    );

    let summary = pipeline::run(&config)
        .await
        .context("Error processing file")?;

    print_summary(&summary);

    if let Some(path) = usage_log {
        append_usage_log(&path, &summary).context("Failed to write token usage log")?;
    }

    println!(
        "Processing complete! Results saved to {}",
        config.output.display()
    );
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Batches: {} succeeded, {} skipped, {} total",
        summary.succeeded, summary.failed, summary.batches
    );
    println!(
        "Rows written: {} (of {} books)",
        summary.rows_written, summary.total_books
    );
    println!(
        "Token usage: {} prompt + {} completion = {} total",
        summary.usage.prompt_tokens, summary.usage.completion_tokens, summary.usage.total_tokens
    );
}

fn append_usage_log(path: &Path, summary: &RunSummary) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(
        file,
        "{},{},{},{}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        summary.usage.prompt_tokens,
        summary.usage.completion_tokens,
        summary.usage.total_tokens
    )?;
    Ok(())
}

// ============================================================================
// Prompt Preview
// ============================================================================

fn show_prompts(input: &Path, batch_size: usize, only: Option<usize>) -> Result<()> {
    if batch_size == 0 {
        anyhow::bail!("Batch size must be at least 1");
    }
    let books = load_books(input)
        .with_context(|| format!("Failed to read input file '{}'", input.display()))?;

    for batch in plan_batches(&books, batch_size) {
        if only.is_some_and(|n| n != batch.number) {
            continue;
        }
        println!("=== Batch {} (books {}..{}) ===", batch.number, batch.offset + 1, batch.offset + batch.len());
        for message in build_messages(batch.books) {
            println!("--- {:?} ---", message.role);
            println!("{}", message.content);
        }
        println!();
    }

    Ok(())
}
