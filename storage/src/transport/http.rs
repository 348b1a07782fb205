// storage/src/transport/http.rs

use super::{
    default_headers, meta_from_headers, range_header, slice_full_body, BlockingTransport, RemoteMeta,
    Transport, PROBE_RANGE,
};
use crate::page::Window;
use crate::{Result, StorageError};
use bytes::Bytes;
use httpvfs_core::{OpenMethod, VfsConfig};
use log::{debug, warn};
use reqwest::header::RANGE;
use reqwest::StatusCode;

fn check_open_status(url: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StorageError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

fn range_body(url: &str, status: StatusCode, body: Bytes, window: Window) -> Result<Bytes> {
    match status {
        StatusCode::PARTIAL_CONTENT => Ok(body),
        StatusCode::OK => {
            warn!(
                "Server for {} ignored the Range header, sent {} bytes for a {} byte window",
                url,
                body.len(),
                window.len
            );
            Ok(slice_full_body(body, window))
        }
        other => Err(StorageError::Http {
            url: url.to_string(),
            status: other.as_u16(),
        }),
    }
}

/// Asynchronous origin client used by the shared backend.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &VfsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers(config)?)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn probe(&self, url: &str, method: OpenMethod) -> Result<RemoteMeta> {
        debug!("{} {}", method, url);
        let request = match method {
            OpenMethod::Head => self.client.head(url),
            OpenMethod::Get => self.client.get(url).header(RANGE, PROBE_RANGE),
        };

        let response = request.send().await?;
        check_open_status(url, response.status())?;
        meta_from_headers(url, response.headers(), method)
    }

    async fn get_range(&self, url: &str, window: Window) -> Result<Bytes> {
        debug!("GET {} {}", url, range_header(window));
        let response = self
            .client
            .get(url)
            .header(RANGE, range_header(window))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return range_body(url, status, Bytes::new(), window);
        }
        let body = response.bytes().await?;
        range_body(url, status, body, window)
    }
}

/// Blocking origin client used by the in-thread fallback.
#[derive(Debug, Clone)]
pub struct BlockingHttpTransport {
    client: reqwest::blocking::Client,
}

impl BlockingHttpTransport {
    pub fn new(config: &VfsConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .default_headers(default_headers(config)?)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl BlockingTransport for BlockingHttpTransport {
    fn probe(&self, url: &str, method: OpenMethod) -> Result<RemoteMeta> {
        debug!("{} {}", method, url);
        let request = match method {
            OpenMethod::Head => self.client.head(url),
            OpenMethod::Get => self.client.get(url).header(RANGE, PROBE_RANGE),
        };

        let response = request.send()?;
        check_open_status(url, response.status())?;
        meta_from_headers(url, response.headers(), method)
    }

    fn get_range(&self, url: &str, window: Window) -> Result<Bytes> {
        debug!("GET {} {}", url, range_header(window));
        let response = self
            .client
            .get(url)
            .header(RANGE, range_header(window))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return range_body(url, status, Bytes::new(), window);
        }
        let body = response.bytes()?;
        range_body(url, status, body, window)
    }
}
