//! # rustbookpages
//!
//! Book metadata enrichment through an online search model.
//!
//! Titles are sent in small batches; the free-form answers are recovered into
//! records, reconciled with the input and appended to a CSV table.
//!
//! ## Modules
//!
//! - [`books`] - Input loading and batch planning
//! - [`prompts`] - Request messages
//! - [`search`] - Search endpoint client
//! - [`recovery`] - Record recovery from unreliable model text
//! - [`citations`] - Citation normalization
//! - [`reconcile`] - Row building and the output writer
//! - [`pipeline`] - Sequential batch driver
//! - [`config`] - Run configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust
//! use rustbookpages::recovery::recover_records;
//!
//! let records = recover_records("```json\n[{\"title\": \"Hobbiten\", \"pages\": NA}]\n```").unwrap();
//! assert_eq!(records[0].pages.to_string(), "N/A");
//! ```

pub mod books;
pub mod citations;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod reconcile;
pub mod recovery;
pub mod search;

pub use error::{BookpagesError, RecoveryError, Result};
