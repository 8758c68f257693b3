use std::collections::VecDeque;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::Dataset;
use crate::erddap::ErddapClient;
use crate::error::IngestError;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub max_attempts: u32,
    pub timeout: Duration,
    /// Hard stop for the whole download, used by time-boxed refresh jobs.
    pub deadline: Option<Instant>,
}

impl DownloadOptions {
    pub fn new(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts,
            timeout,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    /// One slot per input URL, in URL order.
    pub files: Vec<Option<Utf8PathBuf>>,
    pub attempts: Vec<u32>,
    /// Chunk indices in the order their files were written.
    pub write_order: Vec<usize>,
    pub aborted: bool,
    pub timed_out: bool,
    /// Local write failure that stopped the download. Chunks written before it stay
    /// in `files`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_error: Option<String>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(Option::is_some)
    }

    pub fn completed_files(&self) -> Vec<Utf8PathBuf> {
        self.files.iter().flatten().cloned().collect()
    }

    pub fn failed_chunks(&self) -> Vec<usize> {
        self.files
            .iter()
            .enumerate()
            .filter(|(_, file)| file.is_none())
            .map(|(index, _)| index)
            .collect()
    }
}

struct QueuedChunk {
    index: usize,
    attempt: u32,
}

/// Downloads `urls` one at a time through a retry queue. A failed chunk goes to the
/// back of the queue so other chunks proceed before it is tried again.
///
/// Network problems end up in the report as missing files. A local write failure
/// stops the download and is kept in [`DownloadReport::write_error`].
pub fn download_chunks<C: ErddapClient + ?Sized>(
    client: &C,
    store: &Store,
    dataset: &Dataset,
    urls: &[String],
    options: &DownloadOptions,
) -> DownloadReport {
    let total = urls.len();
    let max_attempts = options.max_attempts.max(1);
    let mut report = DownloadReport {
        files: vec![None; total],
        attempts: vec![0; total],
        ..DownloadReport::default()
    };
    let mut failures = vec![0u32; total];
    let mut any_success = false;

    let mut queue: VecDeque<QueuedChunk> = (0..total)
        .map(|index| QueuedChunk { index, attempt: 1 })
        .collect();

    while let Some(chunk) = queue.pop_front() {
        let timeout = match request_timeout(options) {
            Some(timeout) => timeout,
            None => {
                warn!(dataset = %dataset.id, "download deadline reached");
                report.timed_out = true;
                break;
            }
        };

        let url = &urls[chunk.index];
        report.attempts[chunk.index] = chunk.attempt;
        debug!(dataset = %dataset.id, chunk = chunk.index, attempt = chunk.attempt, url = %url, "requesting chunk");

        match fetch_chunk(client, dataset, url, timeout) {
            Ok(body) => {
                let path = store.chunk_path(&dataset.id, dataset.protocol, chunk.index, total);
                if let Err(err) = Store::write_bytes_atomic(&path, &body) {
                    error!(dataset = %dataset.id, chunk = chunk.index, path = %path, error = %err, "writing chunk failed");
                    report.write_error = Some(err.to_string());
                    break;
                }
                info!(dataset = %dataset.id, chunk = chunk.index, path = %path, "chunk written");
                report.files[chunk.index] = Some(path);
                report.write_order.push(chunk.index);
                any_success = true;
            }
            Err(err) => {
                failures[chunk.index] += 1;
                if chunk.attempt < max_attempts {
                    warn!(dataset = %dataset.id, chunk = chunk.index, attempt = chunk.attempt, error = %err, "chunk failed; requeued");
                    queue.push_back(QueuedChunk {
                        index: chunk.index,
                        attempt: chunk.attempt + 1,
                    });
                } else {
                    warn!(dataset = %dataset.id, chunk = chunk.index, error = %err, "chunk failed permanently");
                }

                if total > 1 && !any_success && failures[0] > 0 && failures[total - 1] > 0 {
                    warn!(dataset = %dataset.id, "first and last chunks failed; dataset looks unreachable");
                    report.aborted = true;
                    break;
                }
            }
        }
    }

    report
}

fn request_timeout(options: &DownloadOptions) -> Option<Duration> {
    match options.deadline {
        None => Some(options.timeout),
        Some(deadline) => {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() {
                None
            } else {
                Some(remaining.min(options.timeout))
            }
        }
    }
}

fn fetch_chunk<C: ErddapClient + ?Sized>(
    client: &C,
    dataset: &Dataset,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, IngestError> {
    let body = client.fetch_data(url, timeout)?;
    if dataset.protocol.is_row_oriented() {
        let rows = validate_table(&body)?;
        debug!(dataset = %dataset.id, rows, "parsed tabular response");
    } else if body.is_empty() {
        return Err(IngestError::MalformedResponse(
            "empty array payload".to_string(),
        ));
    }
    Ok(body)
}

/// Checks that a row-oriented response is well-formed CSV with a header row and
/// returns the number of data rows.
pub fn validate_table(body: &[u8]) -> Result<usize, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body);
    let headers = reader
        .headers()
        .map_err(|err| IngestError::MalformedResponse(err.to_string()))?;
    if headers.iter().all(|field| field.trim().is_empty()) {
        return Err(IngestError::MalformedResponse(
            "response has no header row".to_string(),
        ));
    }
    let mut rows = 0;
    for record in reader.records() {
        record.map_err(|err| IngestError::MalformedResponse(err.to_string()))?;
        rows += 1;
    }
    Ok(rows)
}
