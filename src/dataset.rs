use std::fmt;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::das::{DasAttribute, DasDocument, DasSection};
use crate::domain::{Dataset, TimeWindow};
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Das,
    Classify,
    Size,
    Plan,
    Urls,
    Download,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Das => "das",
            Stage::Classify => "classify",
            Stage::Size => "size",
            Stage::Plan => "plan",
            Stage::Urls => "urls",
            Stage::Download => "download",
        }
    }

    /// Stage that an error of this family is attributed to when no stage is known.
    pub fn of(error: &IngestError) -> Stage {
        match error {
            IngestError::GeometryMissing(_) | IngestError::MissingTimeAttribute(_) => {
                Stage::Classify
            }
            IngestError::ChunkPlan(_) => Stage::Plan,
            IngestError::DownloadFailed { .. } | IngestError::JobTimeout(_) => Stage::Download,
            _ => Stage::Das,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
    /// Chunk files that did land before the failure. Kept for diagnostics only;
    /// they are never handed to the publishing layer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_files: Vec<Utf8PathBuf>,
}

/// Derived per-dataset state. Each stage computes its fields on a scratch copy and
/// only writes them back once the stage as a whole succeeded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestState {
    pub attributes: Vec<String>,
    pub time_attribute: Option<String>,
    pub has_latitude: bool,
    pub has_longitude: bool,
    pub global_metadata: DasSection,
    #[serde(skip)]
    pub das: Option<DasDocument>,
    pub time_range: Option<TimeWindow>,
    pub row_count: Option<u64>,
    pub needs_chunking: bool,
    pub chunk_plan: Vec<TimeWindow>,
    pub urls: Vec<String>,
    pub files: Vec<Utf8PathBuf>,
    pub failure: Option<StageFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetRecord {
    pub dataset: Dataset,
    pub state: IngestState,
}

impl DatasetRecord {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            state: IngestState::default(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.state.failure.is_some()
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.state.failure.as_ref()
    }

    pub fn fail(&mut self, stage: Stage, error: &IngestError) {
        self.fail_with_partial(stage, error, Vec::new());
    }

    pub fn fail_with_partial(
        &mut self,
        stage: Stage,
        error: &IngestError,
        partial_files: Vec<Utf8PathBuf>,
    ) {
        self.state.files.clear();
        self.state.failure = Some(StageFailure {
            stage,
            reason: error.to_string(),
            partial_files,
        });
    }

    /// `None` while the dataset is in error or has not produced files yet.
    pub fn handoff(&self) -> Option<PublishHandoff> {
        if self.has_error() || self.state.files.is_empty() {
            return None;
        }
        Some(PublishHandoff {
            dataset_id: self.dataset.id.to_string(),
            server: self.dataset.server.base_url().to_string(),
            attributes: self.requested_attributes(),
            global_metadata: self.state.global_metadata.clone(),
            start: self.state.time_range.map(|window| window.start),
            end: self.state.time_range.map(|window| window.end),
            files: self.state.files.clone(),
            needs_multi_part_upload: self.state.needs_chunking,
        })
    }

    /// Attribute names in the order they are requested from the server.
    fn requested_attributes(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.state.attributes.len() + 1);
        if let (Some(time), Some(_)) = (&self.state.time_attribute, &self.state.time_range) {
            names.push(time.clone());
        }
        names.extend(self.state.attributes.iter().cloned());
        names
    }
}

/// What the publishing layer receives for one successfully ingested dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishHandoff {
    pub dataset_id: String,
    pub server: String,
    pub attributes: Vec<String>,
    pub global_metadata: DasSection,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub files: Vec<Utf8PathBuf>,
    pub needs_multi_part_upload: bool,
}

impl PublishHandoff {
    pub fn license(&self) -> Option<&str> {
        self.global_value("license")
    }

    pub fn institution(&self) -> Option<&str> {
        self.global_value("institution")
            .or_else(|| self.global_value("creator_institution"))
    }

    pub fn summary(&self) -> Option<&str> {
        self.global_value("summary")
    }

    fn global_value(&self, name: &str) -> Option<&str> {
        self.global_metadata
            .get(name)
            .map(|attr: &DasAttribute| attr.value.as_str())
            .filter(|value| !value.trim().is_empty())
    }
}
