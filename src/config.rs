//! Run configuration.
//!
//! The credential is read from the environment (a `.env` file is honoured);
//! everything else comes from CLI flags with the defaults below.

use crate::error::{BookpagesError, Result};
use crate::search::SearchConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the endpoint credential
pub const API_KEY_ENV: &str = "PERPLEXITY_API_KEY";

/// Search endpoint base URL
pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

/// Online model used for lookups
pub const DEFAULT_MODEL: &str = "llama-3.1-sonar-large-128k-online";

/// Books per request
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Pause after every batch, in seconds
pub const DEFAULT_DELAY_SECS: u64 = 3;

pub const DEFAULT_INPUT: &str = "books.csv";
pub const DEFAULT_OUTPUT: &str = "books_with_pages.csv";

/// Generation parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub return_citations: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2048,
            top_p: 0.9,
            return_citations: true,
        }
    }
}

/// Everything one enrichment run needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub batch_size: usize,
    /// Fixed, unconditional pause after each batch
    pub delay: Duration,
    pub search: SearchConfig,
    pub show_progress: bool,
}

impl PipelineConfig {
    /// The two fatal checks, in order: input file first, then credential.
    pub fn validate(&self) -> Result<()> {
        if !self.input.exists() {
            return Err(BookpagesError::Config(format!(
                "Input file '{}' not found!",
                self.input.display()
            )));
        }
        if self.search.api_key.trim().is_empty() {
            return Err(BookpagesError::Config(format!(
                "API key not found in environment variables ({})!",
                API_KEY_ENV
            )));
        }
        if self.batch_size == 0 {
            return Err(BookpagesError::Config(
                "Batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve the credential: explicit value wins, then `.env`, then the process env.
///
/// Returns an empty string when nothing is set; [`PipelineConfig::validate`]
/// turns that into the user-facing error.
pub fn resolve_api_key(explicit: Option<String>) -> String {
    if let Some(key) = explicit.filter(|k| !k.trim().is_empty()) {
        return key;
    }
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) => debug!(error = %e, "No .env loaded"),
    }
    std::env::var(API_KEY_ENV).unwrap_or_default()
}
