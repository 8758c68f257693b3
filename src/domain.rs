use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// `YYYY-MM-DDTHH:MM:SS`, the timestamp layout ERDDAP constraints expect before the `Z`.
pub const ERDDAP_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tabledap,
    Griddap,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tabledap => "tabledap",
            Protocol::Griddap => "griddap",
        }
    }

    /// Row-oriented responses come back as CSV text, array-oriented ones as binary payloads.
    pub fn is_row_oriented(&self) -> bool {
        matches!(self, Protocol::Tabledap)
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Protocol::Tabledap => "csv",
            Protocol::Griddap => "nc",
        }
    }

    pub fn response_format(&self) -> &'static str {
        match self {
            Protocol::Tabledap => "csvp",
            Protocol::Griddap => "nc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tabledap" => Ok(Protocol::Tabledap),
            "griddap" => Ok(Protocol::Griddap),
            other => Err(IngestError::InvalidDatasetUrl(format!(
                "unknown protocol {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        // ids double as cache and scratch file names
        let is_valid = !normalized.is_empty()
            && !normalized.starts_with('.')
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !is_valid {
            return Err(IngestError::InvalidDatasetId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for DatasetId {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasetId> for String {
    fn from(value: DatasetId) -> Self {
        value.0
    }
}

/// Normalized ERDDAP base URL, always ending in `/erddap` (or whatever the deployment root is)
/// without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ErddapServer(String);

impl ErddapServer {
    pub fn parse(value: &str) -> Result<Self, IngestError> {
        let mut base = value.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(IngestError::InvalidServerUrl(value.to_string()));
        }
        if let Some(stripped) = base.strip_suffix("index.html") {
            base = stripped;
        }
        base = base.trim_end_matches('/');
        for protocol in ["tabledap", "griddap"] {
            if let Some(stripped) = base.strip_suffix(protocol) {
                if stripped.ends_with('/') {
                    base = stripped.trim_end_matches('/');
                }
            }
        }
        let host = base
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        if host.is_empty() {
            return Err(IngestError::InvalidServerUrl(value.to_string()));
        }
        Ok(Self(base.to_string()))
    }

    pub fn base_url(&self) -> &str {
        &self.0
    }

    /// Host part, used in log lines and publish hand-off descriptions.
    pub fn host(&self) -> &str {
        self.0
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.0)
            .split('/')
            .next()
            .unwrap_or_default()
    }

    pub fn data_endpoint(&self, protocol: Protocol) -> String {
        format!("{}/{}/", self.0, protocol.as_str())
    }

    pub fn catalog_url(&self) -> String {
        format!("{}/info/index.json?itemsPerPage=100000", self.0)
    }

    pub fn search_url(&self, term: &str, protocol: Protocol) -> String {
        format!(
            "{}/search/index.json?searchFor={}&page=1&itemsPerPage=100000&protocol={}",
            self.0,
            encode_query_value(term),
            protocol.as_str()
        )
    }

    pub fn nrt_search_url(&self, window_days: i64, protocol: Protocol) -> String {
        format!(
            "{}/search/advanced.json?page=1&itemsPerPage=10000000&minTime=now-{}days&maxTime=&protocol={}",
            self.0,
            window_days,
            protocol.as_str()
        )
    }
}

impl fmt::Display for ErddapServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ErddapServer {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ErddapServer {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ErddapServer> for String {
    fn from(value: ErddapServer) -> Self {
        value.0
    }
}

/// Closed UTC interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, IngestError> {
        if end < start {
            return Err(IngestError::ChunkPlan(format!(
                "time window ends before it starts: {} > {}",
                format_erddap_time(&start),
                format_erddap_time(&end)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

pub fn format_erddap_time(value: &DateTime<Utc>) -> String {
    value.format(ERDDAP_TIME_FORMAT).to_string()
}

/// Identity of one dataset on one server. Never mutated once built; derived pipeline
/// state lives in [`crate::dataset::IngestState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub server: ErddapServer,
    #[serde(default)]
    pub protocol: Protocol,
    /// Track-style data (gliders) is always downloaded in one piece.
    #[serde(default)]
    pub is_trajectory: bool,
}

impl Dataset {
    pub fn new(id: DatasetId, server: ErddapServer, protocol: Protocol) -> Self {
        Self {
            id,
            server,
            protocol,
            is_trajectory: false,
        }
    }

    pub fn trajectory(mut self, is_trajectory: bool) -> Self {
        self.is_trajectory = is_trajectory;
        self
    }

    /// Parses `<base>/<tabledap|griddap>/<dataset_id>[.ext]`.
    pub fn from_url(value: &str) -> Result<Self, IngestError> {
        let trimmed = value.trim().trim_end_matches('/');
        let (prefix, last) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| IngestError::InvalidDatasetUrl(value.to_string()))?;
        let (base, protocol) = prefix
            .rsplit_once('/')
            .ok_or_else(|| IngestError::InvalidDatasetUrl(value.to_string()))?;
        let protocol: Protocol = protocol
            .parse()
            .map_err(|_| IngestError::InvalidDatasetUrl(value.to_string()))?;
        let id = last.split_once('.').map(|(id, _)| id).unwrap_or(last);
        Ok(Self::new(id.parse()?, ErddapServer::parse(base)?, protocol))
    }

    pub fn data_endpoint(&self) -> String {
        self.server.data_endpoint(self.protocol)
    }

    pub fn das_url(&self) -> String {
        format!("{}{}.das", self.data_endpoint(), self.id)
    }

    pub fn header_url(&self) -> String {
        format!("{}{}.ncHeader?", self.data_endpoint(), self.id)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.data_endpoint(), self.id)
    }
}

fn encode_query_value(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' || ch == '~' {
            out.push(ch);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_dataset_id_valid() {
        let id: DatasetId = " gcoos_42G01 ".parse().unwrap();
        assert_eq!(id.as_str(), "gcoos_42G01");
    }

    #[test]
    fn parse_dataset_id_rejects_paths() {
        let err = "../etc/passwd".parse::<DatasetId>().unwrap_err();
        assert_matches!(err, IngestError::InvalidDatasetId(_));
        assert!("".parse::<DatasetId>().is_err());
    }

    #[test]
    fn server_normalization() {
        let server = ErddapServer::parse("https://erddap.gcoos.org/erddap/index.html").unwrap();
        assert_eq!(server.base_url(), "https://erddap.gcoos.org/erddap");

        let server = ErddapServer::parse("https://gliders.ioos.us/erddap/tabledap/").unwrap();
        assert_eq!(server.base_url(), "https://gliders.ioos.us/erddap");
        assert_eq!(server.host(), "gliders.ioos.us");
        assert_eq!(
            server.data_endpoint(Protocol::Tabledap),
            "https://gliders.ioos.us/erddap/tabledap/"
        );
    }

    #[test]
    fn server_rejects_non_http() {
        let err = ErddapServer::parse("ftp://example.org/erddap").unwrap_err();
        assert_matches!(err, IngestError::InvalidServerUrl(_));
    }

    #[test]
    fn search_term_is_encoded() {
        let server = ErddapServer::parse("https://erddap.example.org/erddap").unwrap();
        assert_eq!(
            server.search_url("sea temp", Protocol::Tabledap),
            "https://erddap.example.org/erddap/search/index.json?searchFor=sea%20temp&page=1&itemsPerPage=100000&protocol=tabledap"
        );
    }

    #[test]
    fn dataset_from_url() {
        let dataset =
            Dataset::from_url("https://erddap.gcoos.org/erddap/tabledap/gcoos_42G01.html").unwrap();
        assert_eq!(dataset.id.as_str(), "gcoos_42G01");
        assert_eq!(dataset.protocol, Protocol::Tabledap);
        assert_eq!(dataset.server.base_url(), "https://erddap.gcoos.org/erddap");
        assert_eq!(
            dataset.das_url(),
            "https://erddap.gcoos.org/erddap/tabledap/gcoos_42G01.das"
        );
    }

    #[test]
    fn dataset_from_url_rejects_unknown_protocol() {
        let err = Dataset::from_url("https://example.org/erddap/wms/abc").unwrap_err();
        assert_matches!(err, IngestError::InvalidDatasetUrl(_));
    }

    #[test]
    fn window_rejects_inverted_bounds() {
        let start = DateTime::from_timestamp(100, 0).unwrap();
        let end = DateTime::from_timestamp(50, 0).unwrap();
        assert_matches!(TimeWindow::new(start, end), Err(IngestError::ChunkPlan(_)));
    }
}
