use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::DasCache;
use crate::catalog::{CatalogEntry, parse_catalog};
use crate::classify::classify_checked;
use crate::config::IngestConfig;
use crate::dataset::{DatasetRecord, PublishHandoff, Stage};
use crate::domain::{Dataset, DatasetId, ErddapServer, Protocol, TimeWindow};
use crate::download::{DownloadOptions, download_chunks};
use crate::erddap::ErddapClient;
use crate::error::IngestError;
use crate::nrt::{RefreshJob, Refresher, current_window, overlaps_window, untracked};
use crate::planner::{
    UNKNOWN_SIZE_CHUNK_FACTOR, needs_chunking, parse_row_count, plan_chunks, time_range_from_das,
};
use crate::store::Store;
use crate::urls::{build_request_url, build_request_urls, rewrite_time_constraints};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Sink that drops every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub dataset_id: String,
    pub server: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub row_count: Option<u64>,
    pub chunks: usize,
    pub urls: Vec<String>,
    pub files: Vec<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partial_files: Vec<Utf8PathBuf>,
}

impl From<&DatasetRecord> for IngestSummary {
    fn from(record: &DatasetRecord) -> Self {
        let failure = record.failure();
        Self {
            dataset_id: record.dataset.id.to_string(),
            server: record.dataset.server.base_url().to_string(),
            ok: failure.is_none(),
            stage: failure.map(|failure| failure.stage),
            reason: failure.map(|failure| failure.reason.clone()),
            row_count: record.state.row_count,
            chunks: record.state.chunk_plan.len(),
            urls: record.state.urls.clone(),
            files: record.state.files.clone(),
            partial_files: failure
                .map(|failure| failure.partial_files.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub items: Vec<IngestSummary>,
    pub handoffs: Vec<PublishHandoff>,
}

impl BatchResult {
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|item| !item.ok).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResult {
    pub server: String,
    pub datasets: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NrtCandidates {
    pub window: TimeWindow,
    /// Datasets whose time range reaches into the window.
    pub overlapping: Vec<String>,
    /// The overlapping ones that are not tracked yet.
    pub untracked: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub das_cleared: bool,
    pub scratch_files_removed: usize,
}

#[derive(Clone)]
pub struct App<C: ErddapClient> {
    store: Store,
    client: C,
    config: IngestConfig,
}

impl<C: ErddapClient> App<C> {
    pub fn new(store: Store, client: C, config: IngestConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn das_cache(&self) -> DasCache<'_, C> {
        DasCache::new(&self.store, &self.client, self.config.metadata_timeout())
    }

    /// Runs every stage for one dataset. Failures are recorded on the returned
    /// record; once a stage fails the remaining ones are skipped.
    pub fn ingest(&self, dataset: Dataset, sink: &dyn ProgressSink) -> DatasetRecord {
        let started = Instant::now();
        let mut record = DatasetRecord::new(dataset);
        info!(dataset = %record.dataset.id, server = %record.dataset.server.host(), "ingesting");

        self.discover_metadata(&mut record, sink);
        self.plan_size(&mut record, sink);
        self.build_urls(&mut record, sink);
        self.download(&mut record, sink);

        match record.failure() {
            Some(failure) => warn!(
                dataset = %record.dataset.id,
                stage = %failure.stage,
                reason = %failure.reason,
                "ingest failed"
            ),
            None => info!(
                dataset = %record.dataset.id,
                files = record.state.files.len(),
                "ingest complete"
            ),
        }
        sink.event(ProgressEvent {
            message: format!("phase=Done; {}", record.dataset.id),
            elapsed: Some(started.elapsed()),
        });
        record
    }

    /// Ingests every dataset in turn. One failing dataset never stops the others.
    pub fn ingest_batch(&self, datasets: Vec<Dataset>, sink: &dyn ProgressSink) -> BatchResult {
        let records: Vec<DatasetRecord> = datasets
            .into_iter()
            .map(|dataset| self.ingest(dataset, sink))
            .collect();
        BatchResult {
            items: records.iter().map(IngestSummary::from).collect(),
            handoffs: records.iter().filter_map(DatasetRecord::handoff).collect(),
        }
    }

    fn discover_metadata(&self, record: &mut DatasetRecord, sink: &dyn ProgressSink) {
        if record.has_error() {
            return;
        }
        sink.event(ProgressEvent {
            message: format!("phase=Das; {}", record.dataset.id),
            elapsed: None,
        });
        let doc = match self.das_cache().load_or_fetch(&record.dataset) {
            Ok(doc) => doc,
            Err(err) => return record.fail(Stage::Das, &err),
        };

        let classification =
            match classify_checked(record.dataset.id.as_str(), &doc, self.config.include_all) {
                Ok(classification) => classification,
                Err(err) => return record.fail(Stage::Classify, &err),
            };

        let mut staged = record.state.clone();
        staged.time_range = classification
            .time_attribute
            .as_deref()
            .and_then(|time| time_range_from_das(&doc, time));
        if staged.time_range.is_none() {
            debug!(dataset = %record.dataset.id, "no time range; requests will be unconstrained");
        }
        staged.attributes = classification.variables;
        staged.time_attribute = classification.time_attribute;
        staged.has_latitude = classification.has_latitude;
        staged.has_longitude = classification.has_longitude;
        staged.global_metadata = doc.global().cloned().unwrap_or_default();
        staged.das = Some(doc);
        record.state = staged;
    }

    fn plan_size(&self, record: &mut DatasetRecord, sink: &dyn ProgressSink) {
        if record.has_error() {
            return;
        }
        let dataset = &record.dataset;
        let chunk_size = self.config.chunk_size;
        let mut staged = record.state.clone();

        if !dataset.is_trajectory {
            sink.event(ProgressEvent {
                message: format!("phase=Size; {}", dataset.id),
                elapsed: None,
            });
            staged.row_count = match self
                .client
                .fetch_nc_header(dataset, self.config.header_timeout())
            {
                Ok(header) => parse_row_count(&header),
                Err(err) => {
                    warn!(dataset = %dataset.id, error = %err, "row count unavailable");
                    None
                }
            };
        }

        let mut row_count = staged.row_count;
        if row_count.is_none() && self.config.chunk_unknown_size && !dataset.is_trajectory {
            row_count = Some(chunk_size.saturating_mul(UNKNOWN_SIZE_CHUNK_FACTOR));
        }
        staged.needs_chunking = needs_chunking(row_count, chunk_size, dataset.is_trajectory);

        if staged.needs_chunking {
            match (staged.time_range, row_count) {
                (Some(window), Some(rows)) => match plan_chunks(rows, chunk_size, window) {
                    Ok(plan) => {
                        info!(dataset = %dataset.id, rows, chunks = plan.len(), "planned time chunks");
                        staged.chunk_plan = plan;
                    }
                    Err(err) => return record.fail(Stage::Plan, &err),
                },
                _ => {
                    warn!(dataset = %dataset.id, "too large to fetch whole but has no time range");
                    staged.needs_chunking = false;
                }
            }
        }
        record.state = staged;
    }

    fn build_urls(&self, record: &mut DatasetRecord, sink: &dyn ProgressSink) {
        if record.has_error() {
            return;
        }
        sink.event(ProgressEvent {
            message: format!("phase=Urls; {}", record.dataset.id),
            elapsed: None,
        });
        let state = &record.state;
        let time_attribute = state.time_attribute.as_deref();
        let windows = match (&state.time_range, time_attribute) {
            _ if !state.chunk_plan.is_empty() => state.chunk_plan.clone(),
            (Some(range), Some(_)) => vec![*range],
            _ => Vec::new(),
        };
        let urls = build_request_urls(&record.dataset, &state.attributes, time_attribute, &windows);
        debug!(dataset = %record.dataset.id, urls = urls.len(), "built request urls");
        record.state.urls = urls;
    }

    fn download(&self, record: &mut DatasetRecord, sink: &dyn ProgressSink) {
        if record.has_error() {
            return;
        }
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Download; {} ({} requests)",
                record.dataset.id,
                record.state.urls.len()
            ),
            elapsed: None,
        });
        let options =
            DownloadOptions::new(self.config.max_attempts, self.config.download_timeout());
        let report = download_chunks(
            &self.client,
            &self.store,
            &record.dataset,
            &record.state.urls,
            &options,
        );
        sink.event(ProgressEvent {
            message: format!("phase=Download; {} finished", record.dataset.id),
            elapsed: Some(started.elapsed()),
        });

        if report.is_complete() {
            record.state.files = report.completed_files();
            return;
        }
        let err = match &report.write_error {
            Some(reason) => IngestError::Filesystem(reason.clone()),
            None => IngestError::DownloadFailed {
                dataset: record.dataset.id.to_string(),
                failed: report.failed_chunks().len(),
                total: record.state.urls.len(),
            },
        };
        record.fail_with_partial(Stage::Download, &err, report.completed_files());
    }

    /// Lists datasets on a server, optionally narrowed by a search term.
    pub fn list_datasets(
        &self,
        server: &ErddapServer,
        search: Option<&str>,
        protocol: Protocol,
    ) -> Result<CatalogResult, IngestError> {
        let url = match search {
            Some(term) => server.search_url(term, protocol),
            None => server.catalog_url(),
        };
        let json = self
            .client
            .fetch_catalog(&url, self.config.metadata_timeout())?;
        Ok(CatalogResult {
            server: server.base_url().to_string(),
            datasets: parse_catalog(&json)?,
        })
    }

    /// Datasets with data inside the moving window that are not tracked yet.
    pub fn find_nrt_candidates<S: AsRef<str>>(
        &self,
        server: &ErddapServer,
        protocol: Protocol,
        tracked: &[S],
    ) -> Result<NrtCandidates, IngestError> {
        let days = self.config.moving_window_days;
        let window = current_window(days)?;
        let json = self.client.fetch_catalog(
            &server.nrt_search_url(days, protocol),
            self.config.metadata_timeout(),
        )?;

        let mut overlapping = Vec::new();
        for entry in parse_catalog(&json)? {
            let range = match (entry.min_time, entry.max_time) {
                (Some(start), Some(end)) => Some((start, end)),
                _ => self.das_time_range(server, protocol, &entry.dataset_id),
            };
            match range {
                Some((start, end)) if overlaps_window(start, end, &window) => {
                    overlapping.push(entry.dataset_id);
                }
                Some(_) => debug!(dataset = %entry.dataset_id, "outside moving window"),
                None => debug!(dataset = %entry.dataset_id, "no time range; skipped"),
            }
        }

        let untracked = untracked(&overlapping, tracked);
        info!(overlapping = overlapping.len(), untracked = untracked.len(), "NRT candidates");
        Ok(NrtCandidates {
            window,
            overlapping,
            untracked,
        })
    }

    fn das_time_range(
        &self,
        server: &ErddapServer,
        protocol: Protocol,
        id: &str,
    ) -> Option<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> {
        let id: DatasetId = match id.parse() {
            Ok(id) => id,
            Err(err) => {
                warn!(dataset = %id, error = %err, "skipping candidate");
                return None;
            }
        };
        let dataset = Dataset::new(id, server.clone(), protocol);
        let doc = match self.das_cache().load_or_fetch(&dataset) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(dataset = %dataset.id, error = %err, "DAS unavailable");
                return None;
            }
        };
        let classification = crate::classify::classify(&doc, false);
        let window = time_range_from_das(&doc, classification.time_attribute.as_deref()?)?;
        Some((window.start, window.end))
    }

    pub fn clear_cache(
        &self,
        das: bool,
        scratch: bool,
        sink: &dyn ProgressSink,
    ) -> Result<ClearResult, IngestError> {
        sink.event(ProgressEvent {
            message: "phase=Store; clearing working storage".to_string(),
            elapsed: None,
        });
        if das {
            self.das_cache().clear()?;
        }
        let scratch_files_removed = if scratch {
            self.store.clean_scratch()?
        } else {
            0
        };
        Ok(ClearResult {
            das_cleared: das,
            scratch_files_removed,
        })
    }
}

impl<C: ErddapClient> Refresher for App<C> {
    /// Any error that comes back once `deadline` has passed is reported as
    /// [`IngestError::JobTimeout`], whichever request ran into it.
    fn refresh(
        &self,
        job: &RefreshJob,
        deadline: Instant,
    ) -> Result<Vec<Utf8PathBuf>, IngestError> {
        self.refresh_until(job, deadline).map_err(|err| match err {
            IngestError::JobTimeout(_) => err,
            _ if Instant::now() >= deadline => {
                warn!(dataset = %job.dataset_id(), error = %err, "refresh ran past its deadline");
                IngestError::JobTimeout(job.dataset_id().to_string())
            }
            _ => err,
        })
    }
}

impl<C: ErddapClient> App<C> {
    fn refresh_until(
        &self,
        job: &RefreshJob,
        deadline: Instant,
    ) -> Result<Vec<Utf8PathBuf>, IngestError> {
        let dataset = job.target.to_dataset();
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|remaining| !remaining.is_zero())
            .ok_or_else(|| IngestError::JobTimeout(dataset.id.to_string()))?;

        let doc = self
            .das_cache()
            .with_timeout(remaining.min(self.config.metadata_timeout()))
            .load_or_fetch(&dataset)?;
        let classification =
            classify_checked(dataset.id.as_str(), &doc, self.config.include_all)?;
        let time_attribute = classification
            .time_attribute
            .as_deref()
            .ok_or_else(|| IngestError::MissingTimeAttribute(dataset.id.to_string()))?;

        let url = match &job.target.url {
            Some(url) => rewrite_time_constraints(url, time_attribute, &job.window),
            None => build_request_url(
                &dataset,
                &classification.variables,
                Some(time_attribute),
                Some(&job.window),
            ),
        };

        let options =
            DownloadOptions::new(self.config.max_attempts, self.config.download_timeout())
                .with_deadline(deadline);
        let report = download_chunks(&self.client, &self.store, &dataset, &[url], &options);
        if report.timed_out {
            return Err(IngestError::JobTimeout(dataset.id.to_string()));
        }
        if let Some(reason) = report.write_error {
            return Err(IngestError::Filesystem(reason));
        }
        if !report.is_complete() {
            return Err(IngestError::DownloadFailed {
                dataset: dataset.id.to_string(),
                failed: report.failed_chunks().len(),
                total: 1,
            });
        }
        Ok(report.completed_files())
    }
}
