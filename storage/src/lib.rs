// storage/src/lib.rs

//! Page cache engine for remote databases
//!
//! This crate turns page reads of a remote, read-only database file into
//! HTTP range requests. It provides the page geometry helpers, the
//! remote file registry, the LRU page cache with super-page coalescing,
//! and two engines driving it: an asynchronous one for the shared fetch
//! backend and a blocking one for the in-thread fallback.

pub mod blocking;
pub mod cache;
pub mod endian;
pub mod engine;
pub mod file;
pub mod page;
pub mod transport;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use blocking::BlockingEngine;
pub use cache::{CacheEntry, Lookup, PageCache};
pub use engine::PageCacheEngine;
pub use file::{FileId, FileRegistry, RemoteFile};
pub use page::{PageKey, ReadSlot, Window};
pub use transport::{BlockingTransport, RemoteMeta, Transport};

use httpvfs_core::ResultCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("HTTP status {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("File {0} is not open")]
    NotOpen(String),

    #[error("Offset {0} is too big")]
    TooBig(u64),

    #[error("Read at {offset} is not aligned to page size {page_size}")]
    UnalignedRead { offset: u64, page_size: u32 },

    #[error("Read chunk {offset}:{len} spans across a page boundary")]
    SpanningRead { offset: u64, len: usize },

    #[error("Page size {page_size} is over the maximum configured {max}")]
    PageSizeTooLarge { page_size: u32, max: usize },

    #[error("Invalid header {0}")]
    InvalidHeader(String),
}

impl StorageError {
    /// Status written into the rendezvous result word. Always positive,
    /// `0` is reserved for success.
    pub fn status(&self) -> i32 {
        match self {
            StorageError::Http { .. } => 1,
            StorageError::Transport(_) => 2,
            StorageError::Malformed(_) => 3,
            StorageError::NotOpen(_) => 4,
            StorageError::TooBig(_) => 5,
            StorageError::UnalignedRead { .. } => 6,
            StorageError::SpanningRead { .. } => 7,
            StorageError::PageSizeTooLarge { .. } => 8,
            StorageError::InvalidHeader(_) => 9,
        }
    }

    /// Network failure, bad status or unusable body.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            StorageError::Http { .. } | StorageError::Transport(_) | StorageError::Malformed(_)
        )
    }

    /// Host engine code for a failed read or size query.
    pub fn result_code(&self) -> ResultCode {
        match self {
            StorageError::NotOpen(_) => ResultCode::NotFound,
            StorageError::TooBig(_) => ResultCode::TooBig,
            StorageError::InvalidHeader(_) => ResultCode::CantOpen,
            _ => ResultCode::IoErr,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        match (err.status(), err.url()) {
            (Some(status), Some(url)) => StorageError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            },
            _ => StorageError::Transport(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_positive_and_distinct() {
        let errors = [
            StorageError::Http {
                url: "u".into(),
                status: 404,
            },
            StorageError::Transport("t".into()),
            StorageError::Malformed("m".into()),
            StorageError::NotOpen("u".into()),
            StorageError::TooBig(1),
            StorageError::UnalignedRead {
                offset: 1,
                page_size: 1024,
            },
            StorageError::SpanningRead { offset: 1, len: 2 },
            StorageError::PageSizeTooLarge {
                page_size: 8192,
                max: 4096,
            },
            StorageError::InvalidHeader("h".into()),
        ];

        let mut seen = std::collections::HashSet::new();
        for err in &errors {
            assert!(err.status() > 0);
            assert!(seen.insert(err.status()));
        }
    }

    #[test]
    fn test_io_classification() {
        assert!(StorageError::Transport("reset".into()).is_io());
        assert!(!StorageError::NotOpen("u".into()).is_io());
        assert!(!StorageError::SpanningRead { offset: 0, len: 1 }.is_io());
    }
}
