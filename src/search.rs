//! Client for the online search/completion endpoint.
//!
//! One POST to `{base_url}/chat/completions` per batch, OpenAI-compatible
//! envelope plus a top-level `citations` list. No retries: a failed call is
//! returned as an error and the pipeline moves on to the next batch.

use crate::citations::RawCitation;
use crate::config::GenerationParams;
use crate::error::{BookpagesError, OptionExt, Result};
use crate::prompts::ChatMessage;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::ops::AddAssign;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the search endpoint
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub params: GenerationParams,
    /// `None` leaves the transport default in place
    pub timeout: Option<Duration>,
}

/// Token usage tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Answer text and citations of one call, not yet interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub text: String,
    pub citations: Option<Vec<RawCitation>>,
    pub usage: TokenUsage,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    return_citations: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default, deserialize_with = "citation_list")]
    citations: Option<Vec<RawCitation>>,
    usage: Option<TokenUsage>,
}

/// Only an array is a citation list; any other shape counts as absent.
fn citation_list<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Vec<RawCitation>>, D::Error> {
    match Value::deserialize(d)? {
        Value::Array(items) => Ok(Some(
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        )),
        other => {
            if !other.is_null() {
                debug!(citations = %other, "Ignoring citations that are not a list");
            }
            Ok(None)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Search endpoint client
pub struct SearchClient {
    client: reqwest::Client,
    config: SearchConfig,
}

impl SearchClient {
    /// Create a new SearchClient with an explicit credential
    pub fn new(config: SearchConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BookpagesError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Send one request; exactly one network call, no retry.
    pub async fn call(&self, messages: &[ChatMessage], batch_number: usize) -> Result<RawResponse> {
        let params = &self.config.params;
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            return_citations: params.return_citations,
        };

        debug!(batch = batch_number, model = %self.config.model, "Sending search request");

        let response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BookpagesError::Api {
                code: status.as_u16(),
                message: format!("Search API error: {} - {}", status, text),
            });
        }

        parse_envelope(&text)
    }
}

/// Pull answer text, citations and usage out of a response body
fn parse_envelope(body: &str) -> Result<RawResponse> {
    let envelope: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        BookpagesError::Parse(format!("Failed to parse search response: {}; body: {}", e, body))
    })?;

    let text = envelope
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_parse("Search response has no choices")?;

    Ok(RawResponse {
        text,
        citations: envelope.citations,
        usage: envelope.usage.unwrap_or_default(),
    })
}
