//! Citation normalization.
//!
//! The endpoint returns citations either as bare URL strings or as objects
//! with `text`/`url` keys. Both collapse to [`Citation`] here; anything else
//! is dropped without error.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::io;

/// Sentinel for an unknown value
pub const NOT_AVAILABLE: &str = "N/A";

/// Text given to a citation that arrived as a bare URL
pub const REFERENCE_URL_TEXT: &str = "Reference URL";

/// Text given to a structured citation without any text
pub const NO_TEXT_AVAILABLE: &str = "No text available";

/// Citation entry as it arrives in the response envelope
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawCitation {
    Url(String),
    Detailed(Map<String, Value>),
    Other(Value),
}

/// Normalized citation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub text: String,
    pub url: String,
}

impl Citation {
    /// Whether this citation's text mentions `title`, ignoring case
    pub fn mentions(&self, title: &str) -> bool {
        self.text.to_lowercase().contains(&title.to_lowercase())
    }
}

impl RawCitation {
    fn normalize(self) -> Option<Citation> {
        match self {
            RawCitation::Url(url) => Some(Citation {
                text: REFERENCE_URL_TEXT.to_string(),
                url,
            }),
            RawCitation::Detailed(map) => Some(Citation {
                text: field_or(&map, "text", NO_TEXT_AVAILABLE),
                url: field_or(&map, "url", NOT_AVAILABLE),
            }),
            RawCitation::Other(_) => None,
        }
    }
}

fn field_or(map: &Map<String, Value>, key: &str, fallback: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Map raw citation entries onto the uniform shape, keeping their order.
pub fn normalize_citations(raw: Option<Vec<RawCitation>>) -> Vec<Citation> {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(RawCitation::normalize)
        .collect()
}

/// Citations whose text contains `title`, case-insensitively
pub fn matching<'a>(citations: &'a [Citation], title: &str) -> Vec<&'a Citation> {
    citations.iter().filter(|c| c.mentions(title)).collect()
}

/// Serialize citations the way the `citations` column stores them.
///
/// Separators are `", "` and `": "`, and non-ASCII characters are written as
/// `\uXXXX` escapes. An empty slice gives `[]`.
pub fn to_cell_json(citations: &[&Citation]) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedAsciiFormatter);
    citations.serialize(&mut ser)?;
    // Formatter only ever writes ASCII
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}
