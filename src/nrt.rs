//! Near-real-time support: the trailing time window, candidate deduplication and the
//! bounded worker pool that refreshes tracked datasets.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::dataset::Stage;
use crate::domain::{Dataset, DatasetId, ErddapServer, Protocol, TimeWindow};
use crate::error::IngestError;

/// `[now - days, now]`.
pub fn moving_window(now: DateTime<Utc>, days: i64) -> Result<TimeWindow, IngestError> {
    let start = chrono::Duration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| IngestError::InvalidConfig(format!("moving window of {days} days")))?;
    TimeWindow::new(start, now)
}

pub fn current_window(days: i64) -> Result<TimeWindow, IngestError> {
    moving_window(Utc::now(), days)
}

pub fn overlaps_window(start: DateTime<Utc>, end: DateTime<Utc>, window: &TimeWindow) -> bool {
    start <= window.end && end >= window.start
}

/// Candidates that are not already tracked, in candidate order. Matching is exact
/// string equality on the dataset id.
pub fn untracked<S: AsRef<str>>(candidates: &[String], tracked: &[S]) -> Vec<String> {
    let tracked: HashSet<&str> = tracked.iter().map(|id| id.as_ref()).collect();
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|id| !tracked.contains(id.as_str()))
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// A dataset that was ingested before and is kept fresh. `url` is the request URL
/// used last time, if known; its time bounds get rewritten on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedDataset {
    pub dataset_id: DatasetId,
    pub server: ErddapServer,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl TrackedDataset {
    pub fn to_dataset(&self) -> Dataset {
        Dataset::new(self.dataset_id.clone(), self.server.clone(), self.protocol)
    }
}

#[derive(Debug, Clone)]
pub struct RefreshJob {
    pub target: TrackedDataset,
    pub window: TimeWindow,
}

impl RefreshJob {
    pub fn dataset_id(&self) -> &DatasetId {
        &self.target.dataset_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Refreshed { files: Vec<Utf8PathBuf> },
    Failed { reason: String },
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub dataset_id: String,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: RefreshOutcome,
}

impl RefreshResult {
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, RefreshOutcome::TimedOut)
    }
}

/// One refresh of one dataset. Implementations must give up once `deadline` passes
/// and report that as [`IngestError::JobTimeout`].
pub trait Refresher: Send + Sync {
    fn refresh(&self, job: &RefreshJob, deadline: Instant)
    -> Result<Vec<Utf8PathBuf>, IngestError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRun {
    pub window: TimeWindow,
    /// In completion order.
    pub results: Vec<RefreshResult>,
}

/// Processing order of tracked datasets, refreshed through a fixed-size pool.
pub struct RefreshScheduler {
    queue: VecDeque<TrackedDataset>,
    workers: usize,
    job_timeout: Duration,
    window_days: i64,
}

impl RefreshScheduler {
    pub fn new(
        tracked: Vec<TrackedDataset>,
        workers: usize,
        job_timeout: Duration,
        window_days: i64,
    ) -> Self {
        Self {
            queue: tracked.into(),
            workers: workers.max(1),
            job_timeout,
            window_days,
        }
    }

    pub fn from_config(tracked: Vec<TrackedDataset>, config: &IngestConfig) -> Self {
        Self::new(
            tracked,
            config.nrt_workers,
            config.nrt_job_timeout(),
            config.moving_window_days,
        )
    }

    pub fn queue(&self) -> impl Iterator<Item = &TrackedDataset> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs one pass over the queue. A dataset id appearing more than once is only
    /// refreshed once per pass; later copies wait for the next pass. Timed-out
    /// datasets move to the back of the queue.
    pub fn run_once<R: Refresher + 'static>(
        &mut self,
        refresher: Arc<R>,
    ) -> Result<RefreshRun, IngestError> {
        let window = current_window(self.window_days)?;

        let mut in_flight = HashSet::new();
        let mut jobs = Vec::new();
        let mut deferred = Vec::new();
        for target in self.queue.drain(..) {
            if in_flight.insert(target.dataset_id.clone()) {
                jobs.push(RefreshJob { target, window });
            } else {
                deferred.push(target);
            }
        }
        info!(jobs = jobs.len(), deferred = deferred.len(), workers = self.workers, "starting NRT refresh");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|index| format!("nrt-refresh-{index}"))
            .panic_handler(|_| error!("refresh worker panicked"))
            .build()
            .map_err(|err| IngestError::WorkerPool(err.to_string()))?;

        let (tx, rx) = mpsc::channel::<RefreshResult>();
        for job in &jobs {
            let tx = tx.clone();
            let refresher = Arc::clone(&refresher);
            let job = job.clone();
            let job_timeout = self.job_timeout;
            pool.spawn(move || {
                let started = Instant::now();
                let deadline = started + job_timeout;
                let outcome = match refresher.refresh(&job, deadline) {
                    Ok(files) => RefreshOutcome::Refreshed { files },
                    Err(IngestError::JobTimeout(_)) => RefreshOutcome::TimedOut,
                    // failures past the deadline count as timeouts
                    Err(_) if Instant::now() >= deadline => RefreshOutcome::TimedOut,
                    Err(err) => RefreshOutcome::Failed {
                        reason: format!("{}: {err}", Stage::of(&err)),
                    },
                };
                let result = RefreshResult {
                    dataset_id: job.dataset_id().to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    outcome,
                };
                // the receiver outlives every job
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(jobs.len());
        for result in rx {
            match &result.outcome {
                RefreshOutcome::Refreshed { files } => {
                    info!(dataset = %result.dataset_id, files = files.len(), elapsed_ms = result.duration_ms, "refreshed");
                }
                RefreshOutcome::Failed { reason } => {
                    warn!(dataset = %result.dataset_id, reason = %reason, "refresh failed");
                }
                RefreshOutcome::TimedOut => {
                    warn!(dataset = %result.dataset_id, "refresh timed out; requeued at the back");
                }
            }
            results.push(result);
        }

        // a panicking job never reports; surface it as a failure
        for job in &jobs {
            let id = job.dataset_id().as_str();
            if !results.iter().any(|result| result.dataset_id == id) {
                results.push(RefreshResult {
                    dataset_id: id.to_string(),
                    duration_ms: 0,
                    outcome: RefreshOutcome::Failed {
                        reason: "refresh worker panicked".to_string(),
                    },
                });
            }
        }

        let timed_out: HashSet<&str> = results
            .iter()
            .filter(|result| result.timed_out())
            .map(|result| result.dataset_id.as_str())
            .collect();
        let (late, on_time): (Vec<RefreshJob>, Vec<RefreshJob>) = jobs
            .into_iter()
            .partition(|job| timed_out.contains(job.dataset_id().as_str()));
        self.queue.extend(on_time.into_iter().map(|job| job.target));
        self.queue.extend(deferred);
        self.queue.extend(late.into_iter().map(|job| job.target));

        Ok(RefreshRun { window, results })
    }
}
