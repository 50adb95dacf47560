//! Prompt module for LLM-based operations.
//!
//! This module provides the prompt templates sent to the search endpoint.

pub mod page_lookup;

pub use page_lookup::*;
