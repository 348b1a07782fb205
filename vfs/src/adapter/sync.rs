// vfs/src/adapter/sync.rs

use super::{check_offset, finish_read, OpenFile};
use crate::handle::{FileHandle, HandleTable};
use crate::interface::{Opened, StorageInterface, VfsResult};
use crate::Result;
use httpvfs_core::{AccessFlags, OpenFlags, ResultCode, VfsConfig};
use httpvfs_storage::transport::BlockingHttpTransport;
use httpvfs_storage::{BlockingEngine, BlockingTransport};
use log::{debug, error};

/// Fallback adapter that fetches in the calling thread, with a cache
/// private to this instance.
pub struct SyncHttpVfs<T = BlockingHttpTransport> {
    engine: BlockingEngine<T>,
    files: HandleTable<OpenFile>,
}

impl SyncHttpVfs {
    pub fn new(config: &VfsConfig) -> Result<Self> {
        let transport = BlockingHttpTransport::new(config)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: BlockingTransport> SyncHttpVfs<T> {
    pub fn with_transport(transport: T, config: &VfsConfig) -> Self {
        Self {
            engine: BlockingEngine::new(transport, config),
            files: HandleTable::new(),
        }
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    fn url(&self, file: FileHandle) -> VfsResult<&str> {
        self.files
            .get(file)
            .map(|open| open.url.as_str())
            .ok_or(ResultCode::NotFound)
    }
}

impl<T: BlockingTransport> StorageInterface for SyncHttpVfs<T> {
    fn open(&mut self, name: Option<&str>, flags: OpenFlags) -> VfsResult<Opened> {
        debug!("xOpen {:?} flags {:#x}", name, flags.0);
        let Some(url) = name else {
            error!("HTTP VFS does not support anonymous files");
            return Err(ResultCode::CantOpen);
        };

        if let Err(err) = self.engine.open(url) {
            error!("xOpen {} failed: {}", url, err);
            return Err(ResultCode::CantOpen);
        }

        let handle = self.files.insert(OpenFile {
            url: url.to_string(),
        });
        Ok(Opened {
            handle,
            flags: OpenFlags::READONLY,
        })
    }

    fn close(&mut self, file: FileHandle) -> VfsResult<()> {
        debug!("xClose {}", file);
        self.files.remove(file).map(|_| ()).ok_or(ResultCode::NotFound)
    }

    fn read(&mut self, file: FileHandle, buf: &mut [u8], offset: u64) -> VfsResult<()> {
        check_offset(offset)?;
        let url = self.url(file)?.to_string();

        let data = self.engine.read(&url, offset, buf.len()).map_err(|err| {
            error!("xRead {} [{}:{}] failed: {}", url, offset, buf.len(), err);
            err.result_code()
        })?;

        let copied = data.len().min(buf.len());
        buf[..copied].copy_from_slice(&data[..copied]);
        finish_read(buf, copied)
    }

    fn file_size(&mut self, file: FileHandle) -> VfsResult<u64> {
        let url = self.url(file)?;
        self.engine.file_size(url).map_err(|err| {
            error!("xFileSize {} failed: {}", url, err);
            err.result_code()
        })
    }

    fn access(&mut self, name: &str, flags: AccessFlags) -> VfsResult<bool> {
        debug!("xAccess {} {:?}", name, flags);
        if flags == AccessFlags::ReadWrite {
            return Ok(false);
        }

        match self.open(Some(name), OpenFlags::READONLY) {
            Ok(opened) => {
                self.close(opened.handle)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}
