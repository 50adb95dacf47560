//! Reconciliation of recovered records with the batch they answer, and the
//! output table writer.

use crate::books::Batch;
use crate::citations::{matching, to_cell_json, Citation};
use crate::error::{BookpagesError, Result};
use crate::recovery::{BookRecord, Pages};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Output header, in column order
pub const OUTPUT_COLUMNS: &[&str] = &["title", "year", "pages", "note", "url", "citations"];

/// One line of the output table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRow {
    pub title: String,
    /// Always the input's year, never the model's
    pub year: String,
    pub pages: Pages,
    pub note: String,
    pub url: String,
    /// JSON array of the citations that mention the title
    pub citations: String,
}

impl OutputRow {
    fn to_record(&self) -> [String; 6] {
        [
            self.title.clone(),
            self.year.clone(),
            self.pages.to_string(),
            self.note.clone(),
            self.url.clone(),
            self.citations.clone(),
        ]
    }
}

/// Digit-only strings become counts; anything else is kept as given.
pub fn coerce_pages(pages: Pages) -> Pages {
    match pages {
        Pages::Text(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
            s.parse().map(Pages::Count).unwrap_or(Pages::Text(s))
        }
        other => other,
    }
}

/// Build the output rows for one batch.
///
/// Records are matched to books by position. Records past the end of the
/// batch are dropped. Every row is built before any is returned, so a record
/// without a title fails the whole batch.
pub fn reconcile(
    batch: &Batch<'_>,
    records: Vec<BookRecord>,
    citations: &[Citation],
) -> Result<Vec<OutputRow>> {
    if records.len() != batch.len() {
        debug!(
            batch = batch.number,
            expected = batch.len(),
            recovered = records.len(),
            "Record count differs from batch size"
        );
    }

    records
        .into_iter()
        .zip(batch.books.iter())
        .enumerate()
        .map(|(index, (record, book))| -> Result<OutputRow> {
            let title = record.title.ok_or(BookpagesError::MissingTitle { index })?;
            let attached = matching(citations, &title);
            Ok(OutputRow {
                citations: to_cell_json(&attached)?,
                year: book.year.clone(),
                pages: coerce_pages(record.pages),
                note: record.note,
                url: record.url,
                title,
            })
        })
        .collect()
}

/// Append-only writer for the output table
pub struct OutputWriter<W: Write> {
    writer: csv::Writer<W>,
    rows_written: usize,
}

impl OutputWriter<File> {
    /// Create (or truncate) the output file and write the header row
    pub fn create(path: &Path) -> Result<Self> {
        let writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
        Self::with_header(writer)
    }
}

impl<W: Write> OutputWriter<W> {
    /// Wrap any writer; the header row is written immediately
    pub fn from_writer(inner: W) -> Result<Self> {
        let writer = csv::WriterBuilder::new().has_headers(false).from_writer(inner);
        Self::with_header(writer)
    }

    fn with_header(mut writer: csv::Writer<W>) -> Result<Self> {
        writer.write_record(OUTPUT_COLUMNS)?;
        writer.flush()?;
        Ok(Self {
            writer,
            rows_written: 0,
        })
    }

    /// Append rows and flush so finished batches survive a crash
    pub fn append(&mut self, rows: &[OutputRow]) -> Result<()> {
        for row in rows {
            self.writer.write_record(row.to_record())?;
        }
        self.writer.flush()?;
        self.rows_written += rows.len();
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Flush and hand back the inner writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| BookpagesError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::{plan_batches, BookQuery};

    fn record(title: Option<&str>, pages: Pages) -> BookRecord {
        BookRecord {
            title: title.map(str::to_string),
            pages,
            note: "Norstedts".to_string(),
            url: "N/A".to_string(),
        }
    }

    fn read_back(bytes: Vec<u8>) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(bytes.as_slice());
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_coerce_pages() {
        assert_eq!(coerce_pages(Pages::Text("423".to_string())), Pages::Count(423));
        assert_eq!(coerce_pages(Pages::Count(7)), Pages::Count(7));
        assert_eq!(
            coerce_pages(Pages::Text("N/A".to_string())),
            Pages::Text("N/A".to_string())
        );
        assert_eq!(
            coerce_pages(Pages::Text("ca 400".to_string())),
            Pages::Text("ca 400".to_string())
        );
        assert_eq!(coerce_pages(Pages::Text(String::new())), Pages::Text(String::new()));
    }

    #[test]
    fn test_single_book_row() {
        let books = vec![BookQuery::new("Sagan om ringen", "1954")];
        let batch = plan_batches(&books, 3).next().unwrap();
        let citations = vec![Citation {
            text: "Sagan om ringen review".to_string(),
            url: "http://z".to_string(),
        }];

        let rows = reconcile(
            &batch,
            vec![record(Some("Sagan om ringen"), Pages::Text("423".to_string()))],
            &citations,
        )
        .unwrap();

        let mut writer = OutputWriter::from_writer(Vec::new()).unwrap();
        writer.append(&rows).unwrap();
        assert_eq!(writer.rows_written(), 1);

        let table = read_back(writer.into_inner().unwrap());
        assert_eq!(table[0], OUTPUT_COLUMNS);
        assert_eq!(
            table[1],
            vec![
                "Sagan om ringen",
                "1954",
                "423",
                "Norstedts",
                "N/A",
                r#"[{"text": "Sagan om ringen review", "url": "http://z"}]"#,
            ]
        );
    }

    #[test]
    fn test_year_comes_from_input_and_extra_records_dropped() {
        let books = vec![
            BookQuery::new("Hobbiten", "1937"),
            BookQuery::new("Röda rummet", "1879"),
        ];
        let batch = plan_batches(&books, 2).next().unwrap();
        let records = vec![
            record(Some("Hobbiten"), Pages::Count(310)),
            record(Some("Röda rummet"), Pages::Text("N/A".to_string())),
            record(Some("Doktor Glas"), Pages::Count(200)),
        ];

        let rows = reconcile(&batch, records, &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].year, "1937");
        assert_eq!(rows[1].year, "1879");
        assert_eq!(rows[1].pages, Pages::Text("N/A".to_string()));
        assert_eq!(rows[0].citations, "[]");
    }

    #[test]
    fn test_fewer_records_than_books() {
        let books = vec![
            BookQuery::new("Hobbiten", "1937"),
            BookQuery::new("Röda rummet", "1879"),
        ];
        let batch = plan_batches(&books, 2).next().unwrap();
        let rows = reconcile(&batch, vec![record(Some("Hobbiten"), Pages::Count(1))], &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_missing_title_fails_whole_batch() {
        let books = vec![
            BookQuery::new("Hobbiten", "1937"),
            BookQuery::new("Röda rummet", "1879"),
        ];
        let batch = plan_batches(&books, 2).next().unwrap();
        let records = vec![
            record(Some("Hobbiten"), Pages::Count(310)),
            record(None, Pages::Count(1)),
        ];

        match reconcile(&batch, records, &[]) {
            Err(BookpagesError::MissingTitle { index }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_title_beyond_batch_is_not_checked() {
        let books = vec![BookQuery::new("Hobbiten", "1937")];
        let batch = plan_batches(&books, 1).next().unwrap();
        let records = vec![
            record(Some("Hobbiten"), Pages::Count(310)),
            record(None, Pages::Count(1)),
        ];
        assert_eq!(reconcile(&batch, records, &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_citations_attach_by_recovered_title() {
        let books = vec![BookQuery::new("Hobbiten eller Bort och hem igen", "1937")];
        let batch = plan_batches(&books, 1).next().unwrap();
        let citations = vec![
            Citation {
                text: "hobbiten – Libris".to_string(),
                url: "http://l".to_string(),
            },
            Citation {
                text: "Reference URL".to_string(),
                url: "http://r".to_string(),
            },
        ];
        let rows = reconcile(&batch, vec![record(Some("Hobbiten"), Pages::Count(1))], &citations).unwrap();
        assert_eq!(
            rows[0].citations,
            r#"[{"text": "hobbiten \u2013 Libris", "url": "http://l"}]"#
        );
    }
}
