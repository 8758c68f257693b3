use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::Dataset;
use crate::error::IngestError;

/// Everything the pipeline asks of an ERDDAP server. Each call is bounded by the
/// timeout it is given.
pub trait ErddapClient: Send + Sync {
    fn fetch_das(&self, dataset: &Dataset, timeout: Duration) -> Result<String, IngestError>;
    fn fetch_nc_header(&self, dataset: &Dataset, timeout: Duration)
    -> Result<String, IngestError>;
    fn fetch_data(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, IngestError>;
    fn fetch_catalog(&self, url: &str, timeout: Duration) -> Result<String, IngestError>;
}

#[derive(Clone)]
pub struct ErddapHttpClient {
    client: Client,
}

impl ErddapHttpClient {
    pub fn new() -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("erddap-ingest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IngestError::ErddapHttp(err.to_string()))?,
        );
        // per-request timeouts override this ceiling
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| IngestError::ErddapHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn get_text(&self, url: &str, timeout: Duration) -> Result<String, IngestError> {
        debug!(url = %url, "metadata request");
        let response =
            self.send_with_retries(url, || self.client.get(url).timeout(timeout))?;
        let response = handle_status(response)?;
        response.text().map_err(|err| map_transport(url, err))
    }

    fn send_with_retries<F>(&self, url: &str, mut make_req: F) -> Result<Response, IngestError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    // a timed-out metadata request is reported, not retried
                    if attempt < MAX_RETRIES && err.is_connect() {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(map_transport(url, err));
                }
            }
        }
    }
}

impl ErddapClient for ErddapHttpClient {
    fn fetch_das(&self, dataset: &Dataset, timeout: Duration) -> Result<String, IngestError> {
        self.get_text(&dataset.das_url(), timeout)
    }

    fn fetch_nc_header(
        &self,
        dataset: &Dataset,
        timeout: Duration,
    ) -> Result<String, IngestError> {
        self.get_text(&dataset.header_url(), timeout)
    }

    fn fetch_data(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, IngestError> {
        // the downloader owns retries for data requests
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|err| map_transport(url, err))?;
        let response = handle_status(response)?;
        let bytes = response.bytes().map_err(|err| map_transport(url, err))?;
        Ok(bytes.to_vec())
    }

    fn fetch_catalog(&self, url: &str, timeout: Duration) -> Result<String, IngestError> {
        self.get_text(url, timeout)
    }
}

fn handle_status(response: Response) -> Result<Response, IngestError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .map(|body| first_line(&body))
        .unwrap_or_else(|_| "ERDDAP request failed".to_string());
    Err(IngestError::ErddapStatus { status, message })
}

fn map_transport(url: &str, err: reqwest::Error) -> IngestError {
    if err.is_timeout() {
        IngestError::Timeout(url.to_string())
    } else {
        IngestError::ErddapHttp(err.to_string())
    }
}

/// ERDDAP error pages are long; the first non-empty line carries the reason.
fn first_line(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("ERDDAP request failed")
        .to_string()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
