//! Recovery of book records from free-form model answers.
//!
//! The answer is supposed to be a bare JSON array, but in practice it comes
//! wrapped in markdown fences, surrounded by prose, or with unquoted `NA` /
//! `null` where the prompt asked for `"N/A"`. [`recover_records`] repairs what
//! it can in a single pass and otherwise reports why it gave up. It never
//! retries with a different strategy.

use crate::citations::NOT_AVAILABLE;
use crate::error::RecoveryError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static BARE_NA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s*NA\s*([,}])").expect("valid NA pattern"));

static BARE_NULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s*null\s*([,}])").expect("valid null pattern"));

static OBJECT_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[\s*\{.*?\}\s*\]").expect("valid array pattern"));

/// Quoted sentinel as it appears in repaired JSON text
const QUOTED_NOT_AVAILABLE: &str = "\"N/A\"";

/// Page count as reported by the model
///
/// A bare JSON integer stays a `Count`; strings are kept verbatim until
/// reconciliation decides whether they are numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pages {
    Count(u64),
    Text(String),
    Other(Value),
}

impl Default for Pages {
    fn default() -> Self {
        Pages::Text(NOT_AVAILABLE.to_string())
    }
}

impl fmt::Display for Pages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pages::Count(n) => write!(f, "{}", n),
            Pages::Text(s) => f.write_str(s),
            Pages::Other(v) => write!(f, "{}", v),
        }
    }
}

/// One book as recovered from the model answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Checked by the reconciler, not here
    #[serde(default, deserialize_with = "optional_text")]
    pub title: Option<String>,
    #[serde(default)]
    pub pages: Pages,
    #[serde(default, deserialize_with = "note_text")]
    pub note: String,
    #[serde(default = "not_available", deserialize_with = "url_text")]
    pub url: String,
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn optional_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(scalar_text(Value::deserialize(d)?))
}

fn note_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(scalar_text(Value::deserialize(d)?).unwrap_or_default())
}

fn url_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(scalar_text(Value::deserialize(d)?).unwrap_or_else(not_available))
}

/// Remove markdown code fences (```json and ```) and surrounding whitespace.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// Rewrite unquoted `NA` / `null` values that directly precede `,` or `}`.
///
/// Already-quoted sentinels are left alone, so applying this twice is the
/// same as applying it once.
pub fn repair_values(text: &str) -> String {
    let replacement = format!(": {}${{1}}", QUOTED_NOT_AVAILABLE);
    let pass = BARE_NA.replace_all(text, replacement.as_str());
    BARE_NULL
        .replace_all(&pass, replacement.as_str())
        .into_owned()
}

/// First `[ { ... } ]` span in the text, shortest match.
pub fn extract_array(text: &str) -> Option<&str> {
    OBJECT_ARRAY.find(text).map(|m| m.as_str())
}

/// Quote every `NA` token that sits outside a string literal.
///
/// Only standalone tokens count: `NASA` or `"NA"` are untouched.
pub fn quote_bare_na(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
            out.push(ch);
        } else if text[idx..].starts_with("NA")
            && !prev.is_some_and(is_word_char)
            && !text[idx + 2..].chars().next().is_some_and(is_word_char)
        {
            out.push_str(QUOTED_NOT_AVAILABLE);
            chars.next();
            prev = Some('A');
            continue;
        } else {
            out.push(ch);
        }
        prev = Some(ch);
    }

    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Turn a model answer into book records.
///
/// Steps: strip fences, repair bare values, take the first object array,
/// quote leftover `NA` tokens, parse once.
pub fn recover_records(content: &str) -> Result<Vec<BookRecord>, RecoveryError> {
    let cleaned = repair_values(&strip_code_fences(content));
    let array = extract_array(&cleaned).ok_or(RecoveryError::NoArray)?;
    let attempted = quote_bare_na(array);

    serde_json::from_str::<Vec<BookRecord>>(&attempted).map_err(|e| RecoveryError::InvalidJson {
        error: e.to_string(),
        attempted,
    })
}
