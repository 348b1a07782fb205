// vfs/src/lib.rs

//! Read-only database storage over HTTP range requests.
//!
//! The host engine reads pages through a [`StorageInterface`]. Two
//! adapters implement it:
//!
//! - [`HttpVfs`] forwards each call over a blocking [`Rendezvous`] to a
//!   shared fetch backend thread, so every connection benefits from one
//!   page cache and concurrent misses for the same page cost one request.
//! - [`SyncHttpVfs`] fetches in the calling thread with a private cache,
//!   for targets that cannot run the backend thread.
//!
//! [`HttpBackend`] picks one of the two and hands out adapters.

pub mod adapter;
pub mod backend;
pub mod handle;
pub mod interface;
pub mod rendezvous;

pub use adapter::{HttpVfs, SyncHttpVfs};
pub use backend::{BackendChannel, BackendHandle};
pub use handle::{FileHandle, HandleTable};
pub use interface::{install, EngineConnection, HostEngine, Opened, PostOpenHook, StorageInterface, VfsResult};
pub use rendezvous::Rendezvous;

use httpvfs_core::{BackendType, ResultCode, VfsConfig};
use httpvfs_storage::transport::HttpTransport;
use httpvfs_storage::StorageError;
use log::{info, warn};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Backend timeout after {0:?}")]
    Timeout(Duration),

    #[error("Backend is not running")]
    Disconnected,

    #[error("Shared backend is not available on this target")]
    SharedUnavailable,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start backend thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl VfsError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            VfsError::Storage(err) => err.result_code(),
            VfsError::Timeout(_) | VfsError::Disconnected | VfsError::Spawn(_) => ResultCode::IoErr,
            VfsError::SharedUnavailable | VfsError::InvalidConfig(_) => ResultCode::CantOpen,
        }
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;

/// Backend type to run, given what was asked for and what the target
/// supports.
pub fn resolve_backend_type(requested: Option<BackendType>, shared_supported: bool) -> Result<BackendType> {
    match requested {
        Some(BackendType::Sync) => Ok(BackendType::Sync),
        Some(BackendType::Shared) if shared_supported => Ok(BackendType::Shared),
        Some(BackendType::Shared) => Err(VfsError::SharedUnavailable),
        None if shared_supported => Ok(BackendType::Shared),
        None => {
            warn!("Shared backend is not available, falling back to the sync backend");
            Ok(BackendType::Sync)
        }
    }
}

/// A configured backend, ready to hand out one adapter per connection.
pub enum HttpBackend {
    Shared(BackendHandle),
    Sync(VfsConfig),
}

impl HttpBackend {
    pub fn new(config: VfsConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| VfsError::InvalidConfig(err.to_string()))?;

        let backend_type = resolve_backend_type(config.backend_type, BackendType::shared_supported())?;
        info!("using {} backend", backend_type);

        match backend_type {
            BackendType::Shared => {
                let transport = HttpTransport::new(&config)?;
                Ok(HttpBackend::Shared(BackendHandle::spawn(config, transport)?))
            }
            BackendType::Sync => Ok(HttpBackend::Sync(config)),
        }
    }

    pub fn backend_type(&self) -> BackendType {
        match self {
            HttpBackend::Shared(_) => BackendType::Shared,
            HttpBackend::Sync(_) => BackendType::Sync,
        }
    }

    pub fn config(&self) -> &VfsConfig {
        match self {
            HttpBackend::Shared(handle) => handle.config(),
            HttpBackend::Sync(config) => config,
        }
    }

    /// New adapter for one database connection.
    pub fn create_vfs(&self) -> Result<Box<dyn StorageInterface + Send>> {
        match self {
            HttpBackend::Shared(handle) => {
                let channel = handle.create_channel()?;
                Ok(Box::new(HttpVfs::new(channel, handle.config())))
            }
            HttpBackend::Sync(config) => Ok(Box::new(SyncHttpVfs::new(config)?)),
        }
    }

    pub fn close(self) -> Result<()> {
        match self {
            HttpBackend::Shared(handle) => handle.close(),
            HttpBackend::Sync(_) => Ok(()),
        }
    }
}
