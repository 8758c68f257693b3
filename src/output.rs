use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::nrt::RefreshRun;
use crate::pipeline::{
    BatchResult, CatalogResult, ClearResult, NrtCandidates, ProgressEvent, ProgressSink,
};

/// Machine-readable results on stdout. Logs go to stderr so the two never mix.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_catalog(result: &CatalogResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_candidates(result: &NrtCandidates) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_refresh(result: &RefreshRun) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => debug!("{}", event.message),
        }
    }
}
