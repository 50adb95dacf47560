//! Sequential enrichment driver.
//!
//! Batches run one at a time in input order. Whatever goes wrong inside a
//! batch is logged and the batch is skipped; only loading the input and
//! opening the output can fail the run.

use crate::books::{batch_count, load_books, plan_batches, Batch, BookQuery};
use crate::citations::{matching, normalize_citations, Citation};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::prompts::build_messages;
use crate::reconcile::{reconcile, OutputWriter};
use crate::recovery::{recover_records, BookRecord};
use crate::search::{SearchClient, TokenUsage};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_books: usize,
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_written: usize,
    pub usage: TokenUsage,
}

/// Result of one successful batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub rows: usize,
    pub usage: TokenUsage,
}

/// Load the input, create the output table and process every batch.
pub async fn run(config: &PipelineConfig) -> Result<RunSummary> {
    let books = load_books(&config.input)?;
    info!(total = books.len(), "Total books to process");

    let client = SearchClient::new(config.search.clone())?;
    let mut writer = OutputWriter::create(&config.output)?;

    let progress = if config.show_progress {
        progress_bar(batch_count(books.len(), config.batch_size))
    } else {
        ProgressBar::hidden()
    };

    let summary = run_batches(
        &books,
        &client,
        &mut writer,
        config.batch_size,
        config.delay,
        &progress,
    )
    .await;
    progress.finish_and_clear();

    Ok(summary)
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Process batches in order with a fixed pause after each one.
///
/// Never fails: a failing batch is counted and skipped.
pub async fn run_batches<W: Write>(
    books: &[BookQuery],
    client: &SearchClient,
    writer: &mut OutputWriter<W>,
    batch_size: usize,
    delay: Duration,
    progress: &ProgressBar,
) -> RunSummary {
    let mut summary = RunSummary {
        total_books: books.len(),
        ..Default::default()
    };

    for batch in plan_batches(books, batch_size) {
        summary.batches += 1;
        progress.set_message(format!("batch {}", batch.number));

        match process_batch(client, &batch, writer).await {
            Ok(report) => {
                summary.succeeded += 1;
                summary.rows_written += report.rows;
                summary.usage += report.usage;
            }
            Err(e) => {
                summary.failed += 1;
                warn!(
                    batch = batch.number,
                    offset = batch.offset,
                    error = %e,
                    "Error processing batch, skipping"
                );
            }
        }

        progress.inc(1);
        tokio::time::sleep(delay).await;
    }

    info!(
        batches = summary.batches,
        succeeded = summary.succeeded,
        failed = summary.failed,
        rows = summary.rows_written,
        "Run complete"
    );

    summary
}

/// Query, recover, reconcile and write one batch.
///
/// Rows are written only once the whole batch has reconciled.
pub async fn process_batch<W: Write>(
    client: &SearchClient,
    batch: &Batch<'_>,
    writer: &mut OutputWriter<W>,
) -> Result<BatchReport> {
    info!(batch = batch.number, books = batch.len(), "Sending request");

    let messages = build_messages(batch.books);
    let raw = client.call(&messages, batch.number).await?;
    let citations = normalize_citations(raw.citations);

    debug!(batch = batch.number, content = %raw.text, "Response content");
    debug!(batch = batch.number, citations = ?citations, "Citations");

    let records = recover_records(&raw.text)?;
    report_records(batch.number, &records, &citations);

    let rows = reconcile(batch, records, &citations)?;
    writer.append(&rows)?;

    Ok(BatchReport {
        rows: rows.len(),
        usage: raw.usage,
    })
}

fn report_records(batch_number: usize, records: &[BookRecord], citations: &[Citation]) {
    info!(
        batch = batch_number,
        count = records.len(),
        "Processed books in batch"
    );
    for record in records {
        let title = record.title.as_deref().unwrap_or_default();
        info!(
            title = %title,
            pages = %record.pages,
            note = %record.note,
            url = %record.url,
            "Book"
        );
        for cite in matching(citations, title) {
            info!(title = %title, text = %cite.text, url = %cite.url, "Citation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationParams;
    use crate::search::SearchConfig;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use std::path::PathBuf;

    fn search_config(base_url: String) -> SearchConfig {
        SearchConfig {
            base_url,
            api_key: "test-key".to_string(),
            model: "sonar".to_string(),
            params: GenerationParams::default(),
            timeout: None,
        }
    }

    fn pipeline_config(server: &ServerGuard, input: PathBuf, output: PathBuf) -> PipelineConfig {
        PipelineConfig {
            input,
            output,
            batch_size: 2,
            delay: Duration::ZERO,
            search: SearchConfig {
                timeout: Some(Duration::from_secs(5)),
                ..search_config(server.url())
            },
            show_progress: false,
        }
    }

    fn completion(content: &str, citations: serde_json::Value) -> String {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "citations": citations,
            "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
        })
        .to_string()
    }

    fn read_rows(path: &std::path::Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_single_batch_end_to_end() {
        let mut server = Server::new_async().await;
        let content = "```json\n[{\"title\": \"Sagan om ringen\", \"pages\": \"423\", \"note\": \"Norstedts\", \"url\": \"N/A\"}]\n```";
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(
                content,
                json!([{"text": "Sagan om ringen review", "url": "http://z"}, "http://other"]),
            ))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("books.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, "title,year\nSagan om ringen,1954\n").unwrap();

        let summary = run(&pipeline_config(&server, input, output.clone())).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.rows_written, 1);
        assert_eq!(summary.usage.total_tokens, 150);
        assert_eq!(
            read_rows(&output),
            vec![vec![
                "Sagan om ringen",
                "1954",
                "423",
                "Norstedts",
                "N/A",
                r#"[{"text": "Sagan om ringen review", "url": "http://z"}]"#,
            ]]
        );

        let header = std::fs::read_to_string(&output).unwrap();
        assert!(header.starts_with("title,year,pages,note,url,citations"));
    }

    #[tokio::test]
    async fn test_failed_batches_are_skipped() {
        let mut server = Server::new_async().await;

        // batch 1: endpoint failure
        let failing = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Hobbiten".to_string()))
            .with_status(500)
            .with_body("internal error")
            .expect(1)
            .create_async()
            .await;

        // batch 2: answer with no array in it
        let unparseable = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Doktor Glas".to_string()))
            .with_status(200)
            .with_body(completion("Inga resultat hittades.", json!([])))
            .expect(1)
            .create_async()
            .await;

        // batch 3: fine, but the model returned one record too many
        let working = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Gösta Berlings saga".to_string()))
            .with_status(200)
            .with_body(completion(
                r#"[{"title": "Gösta Berlings saga", "pages": NA, "note": "Bonniers", "url": null},
                    {"title": "Extra", "pages": 1, "note": "", "url": "N/A"}]"#,
                json!(null),
            ))
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("books.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(
            &input,
            "title,year\nHobbiten,1937\nRöda rummet,1879\nDoktor Glas,1905\nKejsarn av Portugallien,1914\nGösta Berlings saga,1891\n",
        )
        .unwrap();

        let summary = run(&pipeline_config(&server, input, output.clone())).await.unwrap();

        failing.assert_async().await;
        unparseable.assert_async().await;
        working.assert_async().await;

        assert_eq!(summary.total_books, 5);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.usage.total_tokens, 150);
        assert_eq!(
            read_rows(&output),
            vec![vec!["Gösta Berlings saga", "1891", "N/A", "Bonniers", "N/A", "[]"]]
        );
    }

    #[tokio::test]
    async fn test_empty_input_writes_only_header() {
        let server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("books.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, "title,year\n").unwrap();

        let summary = run(&pipeline_config(&server, input, output.clone())).await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(
            std::fs::read_to_string(&output).unwrap().trim_end(),
            "title,year,pages,note,url,citations"
        );
    }

    // Requests to a closed local port fail without arming any timer, so the
    // paused clock only moves through the pauses themselves.
    #[tokio::test(start_paused = true)]
    async fn test_pause_follows_every_batch() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", closed.local_addr().unwrap());
        drop(closed);

        let client = SearchClient::new(search_config(base_url)).unwrap();
        let mut writer = OutputWriter::from_writer(Vec::new()).unwrap();
        let books = vec![
            BookQuery::new("Hobbiten", "1937"),
            BookQuery::new("Röda rummet", "1879"),
            BookQuery::new("Doktor Glas", "1905"),
        ];
        let delay = Duration::from_secs(3);

        let start = tokio::time::Instant::now();
        let summary = run_batches(&books, &client, &mut writer, 1, delay, &ProgressBar::hidden()).await;

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.failed, 3);
        assert_eq!(start.elapsed(), delay * 3);
    }

    #[tokio::test]
    async fn test_pause_after_failed_and_last_batches() {
        let mut server = Server::new_async().await;
        let _failing = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Hobbiten".to_string()))
            .with_status(500)
            .create_async()
            .await;
        let _unparseable = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Doktor Glas".to_string()))
            .with_status(200)
            .with_body(completion("Inga resultat hittades.", json!([])))
            .create_async()
            .await;
        let _working = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("Gösta Berlings saga".to_string()))
            .with_status(200)
            .with_body(completion(
                r#"[{"title": "Gösta Berlings saga", "pages": 412, "note": "Bonniers", "url": "N/A"}]"#,
                json!([]),
            ))
            .create_async()
            .await;

        let client = SearchClient::new(search_config(server.url())).unwrap();
        let mut writer = OutputWriter::from_writer(Vec::new()).unwrap();
        let books = vec![
            BookQuery::new("Hobbiten", "1937"),
            BookQuery::new("Doktor Glas", "1905"),
            BookQuery::new("Gösta Berlings saga", "1891"),
        ];
        let delay = Duration::from_millis(50);

        let start = std::time::Instant::now();
        let summary = run_batches(&books, &client, &mut writer, 1, delay, &ProgressBar::hidden()).await;

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(writer.rows_written(), 1);
        assert!(start.elapsed() >= delay * 3);
    }
}
