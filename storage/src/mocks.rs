// storage/src/mocks.rs

//! In-memory origin server for tests.

use crate::page::{Window, PAGE_SIZE_OFFSET};
use crate::transport::{slice_full_body, BlockingTransport, RemoteMeta, Transport};
use crate::{Result, StorageError};
use bytes::Bytes;
use httpvfs_core::OpenMethod;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One request seen by the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Probe { url: String, method: OpenMethod },
    Range { url: String, window: Window },
}

#[derive(Default)]
struct Inner {
    files: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, u16>>,
    requests: Mutex<Vec<Recorded>>,
    latency: Mutex<Duration>,
    hide_accept_ranges: Mutex<bool>,
}

/// Serves byte ranges of in-memory files and records every request.
/// Clones share state, so a test can keep one while an engine owns another.
#[derive(Clone, Default)]
pub struct MockOrigin {
    inner: Arc<Inner>,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, url: &str, data: Bytes) -> Self {
        self.inner.files.lock().insert(url.to_string(), data);
        self
    }

    /// Every request for `url` answers with `status` from now on.
    pub fn fail_with(&self, url: &str, status: u16) {
        self.inner.failures.lock().insert(url.to_string(), status);
    }

    pub fn recover(&self, url: &str) {
        self.inner.failures.lock().remove(url);
    }

    /// Delay applied before answering each request.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    pub fn hide_accept_ranges(&self) {
        *self.inner.hide_accept_ranges.lock() = true;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.requests.lock().clone()
    }

    /// Windows of all range requests, in arrival order.
    pub fn ranges(&self) -> Vec<Window> {
        self.inner
            .requests
            .lock()
            .iter()
            .filter_map(|recorded| match recorded {
                Recorded::Range { window, .. } => Some(*window),
                Recorded::Probe { .. } => None,
            })
            .collect()
    }

    pub fn probe_count(&self) -> usize {
        self.requests().len() - self.ranges().len()
    }

    pub fn clear_requests(&self) {
        self.inner.requests.lock().clear();
    }

    fn latency(&self) -> Duration {
        *self.inner.latency.lock()
    }

    fn file(&self, url: &str) -> Result<Bytes> {
        if let Some(status) = self.inner.failures.lock().get(url) {
            return Err(StorageError::Http {
                url: url.to_string(),
                status: *status,
            });
        }
        self.inner.files.lock().get(url).cloned().ok_or_else(|| StorageError::Http {
            url: url.to_string(),
            status: 404,
        })
    }

    fn record_probe(&self, url: &str, method: OpenMethod) {
        self.inner.requests.lock().push(Recorded::Probe {
            url: url.to_string(),
            method,
        });
    }

    fn record_range(&self, url: &str, window: Window) {
        self.inner.requests.lock().push(Recorded::Range {
            url: url.to_string(),
            window,
        });
    }

    fn serve_probe(&self, url: &str) -> Result<RemoteMeta> {
        let data = self.file(url)?;
        Ok(RemoteMeta {
            content_length: data.len() as u64,
            accepts_ranges: !*self.inner.hide_accept_ranges.lock(),
        })
    }

    fn serve_range(&self, url: &str, window: Window) -> Result<Bytes> {
        let data = self.file(url)?;
        if window.start >= data.len() as u64 {
            return Err(StorageError::Http {
                url: url.to_string(),
                status: 416,
            });
        }
        Ok(slice_full_body(data, window))
    }
}

impl Transport for MockOrigin {
    async fn probe(&self, url: &str, method: OpenMethod) -> Result<RemoteMeta> {
        self.record_probe(url, method);
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.serve_probe(url)
    }

    async fn get_range(&self, url: &str, window: Window) -> Result<Bytes> {
        self.record_range(url, window);
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.serve_range(url, window)
    }
}

impl BlockingTransport for MockOrigin {
    fn probe(&self, url: &str, method: OpenMethod) -> Result<RemoteMeta> {
        self.record_probe(url, method);
        std::thread::sleep(self.latency());
        self.serve_probe(url)
    }

    fn get_range(&self, url: &str, window: Window) -> Result<Bytes> {
        self.record_range(url, window);
        std::thread::sleep(self.latency());
        self.serve_range(url, window)
    }
}

/// A database image with a valid page size field and a position-dependent
/// byte pattern everywhere else.
pub fn sample_database(page_size: u32, pages: usize) -> Bytes {
    let len = page_size as usize * pages;
    let mut data: Vec<u8> = (0..len).map(|i| ((i % 251) ^ (i / 251 % 256)) as u8).collect();

    let header = b"SQLite format 3\0";
    let header_len = header.len().min(len);
    data[..header_len].copy_from_slice(&header[..header_len]);

    let field = if page_size == 65536 { 1u16 } else { page_size as u16 };
    if len >= PAGE_SIZE_OFFSET + 2 {
        data[PAGE_SIZE_OFFSET..PAGE_SIZE_OFFSET + 2].copy_from_slice(&field.to_be_bytes());
    }

    Bytes::from(data)
}
