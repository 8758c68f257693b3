use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, ErddapServer, Protocol};
use crate::error::IngestError;

pub const DEFAULT_CONFIG_FILE: &str = "erddap-ingest.json";
/// Upper bound on the NRT moving window, about a century.
pub const MAX_MOVING_WINDOW_DAYS: i64 = 36_500;

/// Tunables passed explicitly through every pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    pub chunk_size: u64,
    pub moving_window_days: i64,
    pub include_all: bool,
    pub max_attempts: u32,
    pub metadata_timeout_secs: u64,
    pub header_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub nrt_workers: usize,
    pub nrt_job_timeout_secs: u64,
    /// Chunk datasets whose row count could not be discovered instead of
    /// downloading them whole.
    pub chunk_unknown_size: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 45_000,
            moving_window_days: 7,
            include_all: false,
            max_attempts: 3,
            metadata_timeout_secs: 60,
            header_timeout_secs: 30,
            download_timeout_secs: 300,
            nrt_workers: 4,
            nrt_job_timeout_secs: 900,
            chunk_unknown_size: false,
        }
    }
}

impl IngestConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn nrt_job_timeout(&self) -> Duration {
        Duration::from_secs(self.nrt_job_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidConfig("chunk_size must be positive".to_string()));
        }
        if self.moving_window_days <= 0 || self.moving_window_days > MAX_MOVING_WINDOW_DAYS {
            return Err(IngestError::InvalidConfig(format!(
                "moving_window_days must be between 1 and {MAX_MOVING_WINDOW_DAYS}"
            )));
        }
        if self.max_attempts == 0 {
            return Err(IngestError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.nrt_workers == 0 {
            return Err(IngestError::InvalidConfig(
                "nrt_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DatasetEntry {
    Shorthand(String),
    Detailed(DatasetEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatasetEntryObject {
    pub server: String,
    pub dataset_id: String,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub trajectory: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub settings: IngestConfig,
    pub datasets: Vec<Dataset>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `erddap-ingest.json` in the working directory. A missing
    /// default file yields the built-in defaults; a missing explicit file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IngestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(ConfigFile::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
        let config: ConfigFile = serde_json::from_str(&content)
            .map_err(|err| IngestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: ConfigFile) -> Result<ResolvedConfig, IngestError> {
        let schema_version = config.schema_version.unwrap_or(1);
        config.ingest.validate()?;

        let datasets = config
            .datasets
            .into_iter()
            .map(|entry| match entry {
                DatasetEntry::Shorthand(value) => Dataset::from_url(&value),
                DatasetEntry::Detailed(obj) => Ok(Dataset::new(
                    obj.dataset_id.parse()?,
                    ErddapServer::parse(&obj.server)?,
                    obj.protocol.unwrap_or_default(),
                )
                .trajectory(obj.trajectory.unwrap_or(false))),
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            settings: config.ingest,
            datasets,
        })
    }
}
