use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("invalid dataset id: {0}")]
    InvalidDatasetId(String),

    #[error("invalid ERDDAP server url: {0}")]
    InvalidServerUrl(String),

    #[error("invalid ERDDAP dataset url: {0}")]
    InvalidDatasetUrl(String),

    #[error("no datasets given on the command line or in erddap-ingest.json")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("ERDDAP request failed: {0}")]
    ErddapHttp(String),

    #[error("ERDDAP returned status {status}: {message}")]
    ErddapStatus { status: u16, message: String },

    #[error("ERDDAP request timed out: {0}")]
    Timeout(String),

    #[error("refresh job for {0} exceeded its time budget")]
    JobTimeout(String),

    #[error("dataset {0} has neither latitude nor longitude")]
    GeometryMissing(String),

    #[error("dataset {0} has no time attribute")]
    MissingTimeAttribute(String),

    #[error("chunk planning failed: {0}")]
    ChunkPlan(String),

    #[error("download failed for {dataset}: {failed} of {total} chunks did not complete")]
    DownloadFailed {
        dataset: String,
        failed: usize,
        total: usize,
    },

    #[error("malformed ERDDAP response: {0}")]
    MalformedResponse(String),

    #[error("unexpected catalog format: {0}")]
    CatalogFormat(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl IngestError {
    /// Network-side failures, as opposed to local or data problems.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            IngestError::ErddapHttp(_)
                | IngestError::ErddapStatus { .. }
                | IngestError::Timeout(_)
                | IngestError::JobTimeout(_)
        )
    }
}
