#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;

use erddap_ingest::domain::{Dataset, DatasetId, ErddapServer, Protocol};
use erddap_ingest::erddap::ErddapClient;
use erddap_ingest::error::IngestError;
use erddap_ingest::store::Store;

pub const SERVER: &str = "https://erddap.example.org/erddap";

pub const DEFAULT_CSV: &str =
    "time (UTC),latitude (degrees_north),longitude (degrees_east)\n2024-01-01T00:00:00Z,27.5,-90.1\n";

/// The week-long buoy used throughout the tests: 1970-01-01 to 1970-01-08.
pub const BUOY_DAS: &str = r#"Attributes {
 s {
  time {
    String _CoordinateAxisType "Time";
    Float64 actual_range 0.0, 604800.0;
    String ioos_category "Time";
    String units "seconds since 1970-01-01T00:00:00Z";
  }
  latitude {
    Float64 actual_range 27.0, 28.0;
    String units "degrees_north";
  }
  longitude {
    Float64 actual_range -91.0, -90.0;
    String units "degrees_east";
  }
  sea_water_temperature {
    Float32 actual_range 20.1, 29.8;
    String units "degree_C";
  }
  sea_water_temperature_qc {
    Int32 actual_range 1, 4;
  }
 }
 NC_GLOBAL {
    String institution "GCOOS";
    String license "Public Domain";
    String summary "Hourly observations.
Collected at the surface.";
 }
}
"#;

pub const NO_GEOMETRY_DAS: &str = r#"Attributes {
 s {
  time {
    Float64 actual_range 0.0, 604800.0;
  }
  sea_water_temperature {
    Float32 actual_range 20.1, 29.8;
  }
 }
 NC_GLOBAL {
    String license "Public Domain";
 }
}
"#;

pub fn header_with_rows(rows: u64) -> String {
    format!(
        "netcdf buoy.nc {{\n  dimensions:\n    row = {rows};\n    station_strlen = 5;\n  variables:\n    double time(row={rows});\n}}\n"
    )
}

#[derive(Clone)]
pub enum Reply {
    Body(Vec<u8>),
    Status(u16),
    Timeout,
    /// Blocks for the whole request timeout, then times out.
    Stall,
    Transport,
}

impl Reply {
    pub fn text(value: &str) -> Self {
        Reply::Body(value.as_bytes().to_vec())
    }

    fn into_result(self, url: &str, timeout: Duration) -> Result<Vec<u8>, IngestError> {
        match self {
            Reply::Body(body) => Ok(body),
            Reply::Status(status) => Err(IngestError::ErddapStatus {
                status,
                message: "scripted failure".to_string(),
            }),
            Reply::Timeout => Err(IngestError::Timeout(url.to_string())),
            Reply::Stall => {
                thread::sleep(timeout);
                Err(IngestError::Timeout(url.to_string()))
            }
            Reply::Transport => Err(IngestError::ErddapHttp("connection reset".to_string())),
        }
    }
}

/// Scripted ERDDAP server. Data URLs answer from their script first and fall back to
/// `default_data` once the script is used up.
pub struct MockErddap {
    das: HashMap<String, Reply>,
    headers: HashMap<String, Reply>,
    catalogs: Vec<(String, String)>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    default_data: Reply,
    pub calls: Mutex<Vec<String>>,
    pub data_timeouts: Mutex<Vec<Duration>>,
}

impl Default for MockErddap {
    fn default() -> Self {
        Self {
            das: HashMap::new(),
            headers: HashMap::new(),
            catalogs: Vec::new(),
            scripts: Mutex::new(HashMap::new()),
            default_data: Reply::text(DEFAULT_CSV),
            calls: Mutex::new(Vec::new()),
            data_timeouts: Mutex::new(Vec::new()),
        }
    }
}

impl MockErddap {
    pub fn with_das(mut self, id: &str, text: &str) -> Self {
        self.das.insert(id.to_string(), Reply::text(text));
        self
    }

    pub fn with_das_reply(mut self, id: &str, reply: Reply) -> Self {
        self.das.insert(id.to_string(), reply);
        self
    }

    pub fn with_header(mut self, id: &str, reply: Reply) -> Self {
        self.headers.insert(id.to_string(), reply);
        self
    }

    /// Catalog JSON returned for any URL containing `fragment`.
    pub fn with_catalog(mut self, fragment: &str, json: &str) -> Self {
        self.catalogs.push((fragment.to_string(), json.to_string()));
        self
    }

    pub fn with_default_data(mut self, reply: Reply) -> Self {
        self.default_data = reply;
        self
    }

    pub fn script(self, url: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, fragment: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.contains(fragment))
            .count()
    }

    fn record(&self, url: &str) {
        self.calls.lock().unwrap().push(url.to_string());
    }
}

impl ErddapClient for MockErddap {
    fn fetch_das(&self, dataset: &Dataset, timeout: Duration) -> Result<String, IngestError> {
        let url = dataset.das_url();
        self.record(&url);
        let reply = self
            .das
            .get(dataset.id.as_str())
            .cloned()
            .unwrap_or(Reply::Status(404));
        reply
            .into_result(&url, timeout)
            .map(|body| String::from_utf8(body).unwrap())
    }

    fn fetch_nc_header(
        &self,
        dataset: &Dataset,
        timeout: Duration,
    ) -> Result<String, IngestError> {
        let url = dataset.header_url();
        self.record(&url);
        let reply = self
            .headers
            .get(dataset.id.as_str())
            .cloned()
            .unwrap_or(Reply::Timeout);
        reply
            .into_result(&url, timeout)
            .map(|body| String::from_utf8(body).unwrap())
    }

    fn fetch_data(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, IngestError> {
        self.record(url);
        self.data_timeouts.lock().unwrap().push(timeout);
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|replies| replies.pop_front());
        scripted
            .unwrap_or_else(|| self.default_data.clone())
            .into_result(url, timeout)
    }

    fn fetch_catalog(&self, url: &str, _timeout: Duration) -> Result<String, IngestError> {
        self.record(url);
        self.catalogs
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, json)| json.clone())
            .ok_or(IngestError::ErddapStatus {
                status: 404,
                message: "no catalog".to_string(),
            })
    }
}

pub fn server() -> ErddapServer {
    ErddapServer::parse(SERVER).unwrap()
}

pub fn dataset(id: &str) -> Dataset {
    let id: DatasetId = id.parse().unwrap();
    Dataset::new(id, server(), Protocol::Tabledap)
}

pub fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new_with_paths(root.join("das"), root.join("scratch"));
    (temp, store)
}
