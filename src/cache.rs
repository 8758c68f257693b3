use std::time::Duration;

use tracing::{debug, info};

use crate::das::{DasDocument, parse_das};
use crate::domain::{Dataset, DatasetId};
use crate::erddap::ErddapClient;
use crate::error::IngestError;
use crate::store::Store;

/// Parsed DAS documents keyed by dataset id. Entries never expire on their own.
pub struct DasCache<'a, C: ErddapClient + ?Sized> {
    store: &'a Store,
    client: &'a C,
    timeout: Duration,
}

impl<'a, C: ErddapClient + ?Sized> DasCache<'a, C> {
    pub fn new(store: &'a Store, client: &'a C, timeout: Duration) -> Self {
        Self {
            store,
            client,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn load_or_fetch(&self, dataset: &Dataset) -> Result<DasDocument, IngestError> {
        if let Some(doc) = self.store.read_das(&dataset.id)? {
            debug!(dataset = %dataset.id, "DAS cache hit");
            return Ok(doc);
        }
        self.refresh(dataset)
    }

    /// Fetches and stores a fresh document regardless of what is cached.
    pub fn refresh(&self, dataset: &Dataset) -> Result<DasDocument, IngestError> {
        let text = self.client.fetch_das(dataset, self.timeout)?;
        let doc = parse_das(&text);
        if doc.is_empty() {
            return Err(IngestError::MalformedResponse(format!(
                "DAS for {} has no sections",
                dataset.id
            )));
        }
        self.store.write_das(&dataset.id, &doc)?;
        info!(dataset = %dataset.id, sections = doc.len(), "fetched DAS");
        Ok(doc)
    }

    pub fn invalidate(&self, id: &DatasetId) -> Result<bool, IngestError> {
        self.store.invalidate_das(id)
    }

    pub fn clear(&self) -> Result<(), IngestError> {
        self.store.clear_das()
    }
}
