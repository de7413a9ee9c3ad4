use async_trait::async_trait;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::ReadAt;
use crate::error::{Error, Result};

const DEFAULT_RETRIES: u32 = 10;

/// Archive bytes served over HTTP, fetched with Range requests.
///
/// Only the ranges the archive layer asks for are downloaded: the tail with
/// the end of central directory, the directory itself, and the entries that
/// are actually read.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeReader {
    /// Opens `url`, checking with a HEAD request that the server supports
    /// byte ranges and reports the length.
    pub async fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let size = probe(&client, &url).await?;
        log::debug!("{url}: {size} bytes, ranges supported");

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retry: DEFAULT_RETRIES,
        })
    }

    /// Attempts per range on timeouts and connection failures.
    pub fn with_retries(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry.max(1);
        self
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// One GET for `start..=end`. A server may answer the whole file with a
    /// plain 200 when the range covers all of it.
    async fn fetch(&self, start: u64, end: u64) -> std::result::Result<Vec<u8>, FetchError> {
        let range = format!("bytes={start}-{end}");
        log::trace!("GET {} {range}", self.url);
        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, &range)
            .send()
            .await
            .map_err(FetchError::from_request)?;

        let whole_file = start == 0 && end + 1 == self.size;
        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if whole_file => {}
            status => {
                return Err(FetchError::Fatal(Error::Remote(format!(
                    "{range} failed with status {status}"
                ))));
            }
        }
        let bytes = resp.bytes().await.map_err(FetchError::from_request)?;
        if bytes.is_empty() {
            return Err(FetchError::Fatal(Error::Remote(format!(
                "empty response for {range}"
            ))));
        }
        Ok(bytes.to_vec())
    }
}

enum FetchError {
    Retry(reqwest::Error),
    Fatal(Error),
}

impl FetchError {
    fn from_request(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            FetchError::Retry(e)
        } else {
            FetchError::Fatal(e.into())
        }
    }
}

async fn probe(client: &Client, url: &str) -> Result<u64> {
    let resp = client.head(url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::Remote(format!(
            "HEAD {url} failed with status {}",
            resp.status()
        )));
    }

    let headers = resp.headers();
    let ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");
    if !ranges.contains("bytes") {
        return Err(Error::Remote(
            "remote server does not support Range requests".into(),
        ));
    }

    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Remote("remote server did not return Content-Length".into()))
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let wanted = (end - offset + 1) as usize;
        let mut received = 0;
        let mut attempt = 0;

        // servers may cut a range short; ask again for the rest
        while received < wanted {
            match self.fetch(offset + received as u64, end).await {
                Ok(bytes) => {
                    let n = bytes.len().min(wanted - received);
                    buf[received..received + n].copy_from_slice(&bytes[..n]);
                    received += n;
                    self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(FetchError::Retry(e)) => {
                    attempt += 1;
                    if attempt >= self.max_retry {
                        return Err(Error::Remote(format!(
                            "giving up after {attempt} attempts: {e}"
                        )));
                    }
                    log::warn!("connection error, retry {attempt}/{}: {e}", self.max_retry);
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(FetchError::Fatal(e)) => return Err(e),
            }
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
