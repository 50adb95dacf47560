//! Input table loading and batch planning.
//!
//! The input CSV needs at least `title` and `year` columns; any other columns
//! are ignored. Rows keep their file order, which is also the order batches
//! are sent and output rows are written.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// One book to look up, taken from one input row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookQuery {
    pub title: String,
    /// Publication year exactly as written in the input
    pub year: String,
}

impl BookQuery {
    pub fn new(title: impl Into<String>, year: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            year: year.into(),
        }
    }
}

/// A contiguous slice of the input sent as one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a> {
    /// Offset of the first book within the whole input
    pub offset: usize,
    /// 1-based batch number, used in logs
    pub number: usize,
    pub books: &'a [BookQuery],
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

/// Read every row of the input table before processing begins.
pub fn load_books(path: &Path) -> Result<Vec<BookQuery>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Fields)
        .from_path(path)?;
    read_books(&mut reader)
}

fn read_books<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<Vec<BookQuery>> {
    let books = reader
        .deserialize::<BookQuery>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    info!(count = books.len(), "Loaded input books");
    Ok(books)
}

/// Split `books` into batches of `batch_size`, in input order.
///
/// Only the last batch may be shorter. Empty input yields no batches.
/// A zero batch size is treated as 1; configuration validation rejects it
/// before the pipeline ever gets here.
pub fn plan_batches(books: &[BookQuery], batch_size: usize) -> impl Iterator<Item = Batch<'_>> {
    let size = batch_size.max(1);
    books.chunks(size).enumerate().map(move |(idx, chunk)| Batch {
        offset: idx * size,
        number: idx + 1,
        books: chunk,
    })
}

/// Number of batches `plan_batches` yields for `total` books.
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    total.div_ceil(batch_size.max(1))
}
