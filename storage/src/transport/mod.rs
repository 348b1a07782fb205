// storage/src/transport/mod.rs

//! Access to the origin server.
//!
//! The engines only ever need two things from the network: the size of a
//! file and a byte range of it. [`Transport`] is used by the asynchronous
//! engine, [`BlockingTransport`] by the in-thread fallback.

mod http;

pub use self::http::{BlockingHttpTransport, HttpTransport};

use crate::page::Window;
use crate::{Result, StorageError};
use bytes::Bytes;
use httpvfs_core::{OpenMethod, VfsConfig};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE};
use std::future::Future;

/// What opening a URL tells us about the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMeta {
    pub content_length: u64,
    pub accepts_ranges: bool,
}

pub trait Transport {
    /// Discovers the size of the file behind `url`.
    fn probe(&self, url: &str, method: OpenMethod) -> impl Future<Output = Result<RemoteMeta>>;

    /// Fetches `window` of the file. The result may be shorter than the
    /// window only at the end of the file.
    fn get_range(&self, url: &str, window: Window) -> impl Future<Output = Result<Bytes>>;
}

pub trait BlockingTransport {
    fn probe(&self, url: &str, method: OpenMethod) -> Result<RemoteMeta>;

    fn get_range(&self, url: &str, window: Window) -> Result<Bytes>;
}

/// Value of the `Range` header for a window.
pub fn range_header(window: Window) -> String {
    format!("bytes={}-{}", window.start, window.end_inclusive())
}

/// Range used by `GET` opens: the first byte only.
pub(crate) const PROBE_RANGE: &str = "bytes=0-0";

/// Extracts the complete length from `Content-Range: bytes a-b/total`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (unit, rest) = value.trim().split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (_, total) = rest.split_once('/')?;
    total.trim().parse().ok()
}

/// Builds [`RemoteMeta`] from the headers of an open response.
pub fn meta_from_headers(url: &str, headers: &HeaderMap, method: OpenMethod) -> Result<RemoteMeta> {
    let header_str = |name: &HeaderName| headers.get(name).and_then(|value| value.to_str().ok());

    let from_range = match method {
        OpenMethod::Get => header_str(&CONTENT_RANGE).and_then(parse_content_range_total),
        OpenMethod::Head => None,
    };

    let content_length = match from_range {
        Some(total) => total,
        None => header_str(&CONTENT_LENGTH)
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| {
                StorageError::Malformed(format!("no usable Content-Length for {}", url))
            })?,
    };

    // A 206 reply proves range support even without the header
    let accepts_ranges = header_str(&ACCEPT_RANGES).is_some_and(|value| value.eq_ignore_ascii_case("bytes"))
        || (method == OpenMethod::Get && from_range.is_some());

    Ok(RemoteMeta {
        content_length,
        accepts_ranges,
    })
}

/// Cuts `window` out of a full-body reply from a server that ignored `Range`.
pub fn slice_full_body(body: Bytes, window: Window) -> Bytes {
    let start = (window.start as usize).min(body.len());
    let end = (window.start + window.len).min(body.len() as u64) as usize;
    body.slice(start..end)
}

/// Configured headers, attached to every request.
pub fn default_headers(config: &VfsConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| StorageError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| StorageError::InvalidHeader(name.to_string()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
