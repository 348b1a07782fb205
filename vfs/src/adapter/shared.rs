// vfs/src/adapter/shared.rs

use super::{check_offset, finish_read, OpenFile};
use crate::backend::BackendChannel;
use crate::handle::{FileHandle, HandleTable};
use crate::interface::{Opened, StorageInterface, VfsResult};
use crate::rendezvous::Rendezvous;
use httpvfs_core::{AccessFlags, OpenFlags, Request, ResultCode, VfsConfig};
use log::{debug, error};

/// Adapter for one database connection, backed by the shared fetch
/// backend. Every call blocks on the rendezvous until the backend answers
/// or the timeout passes.
pub struct HttpVfs {
    rendezvous: Rendezvous,
    files: HandleTable<OpenFile>,
}

impl HttpVfs {
    pub fn new(channel: BackendChannel, config: &VfsConfig) -> Self {
        debug!("HTTP VFS for consumer {}", channel.id);
        Self {
            rendezvous: channel.into_rendezvous(config),
            files: HandleTable::new(),
        }
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    fn url(&self, file: FileHandle) -> VfsResult<String> {
        self.files
            .get(file)
            .map(|open| open.url.clone())
            .ok_or(ResultCode::NotFound)
    }
}

impl StorageInterface for HttpVfs {
    fn open(&mut self, name: Option<&str>, flags: OpenFlags) -> VfsResult<Opened> {
        debug!("xOpen {:?} flags {:#x}", name, flags.0);
        let Some(url) = name else {
            error!("HTTP VFS does not support anonymous files");
            return Err(ResultCode::CantOpen);
        };

        let handle = self.files.insert(OpenFile {
            url: url.to_string(),
        });
        let word = self.rendezvous.send_and_wait(Request::open(url));
        if word != 0 {
            self.files.remove(handle);
            error!("xOpen {} failed with {}", url, word);
            return Err(if word < 0 {
                ResultCode::IoErr
            } else {
                ResultCode::CantOpen
            });
        }

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
        let url = self.url(file)?;
        if buf.len() > self.rendezvous.capacity() {
            error!(
                "xRead {} of {} bytes is larger than the {} byte shared region",
                url,
                buf.len(),
                self.rendezvous.capacity()
            );
            return Err(ResultCode::IoErr);
        }

        let word = self
            .rendezvous
            .send_and_wait(Request::read(url.as_str(), offset, buf.len()));
        if word != 0 {
            error!("xRead {} [{}:{}] failed with {}", url, offset, buf.len(), word);
            return Err(ResultCode::IoErr);
        }

        let copied = self.rendezvous.read_payload(|data| {
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            len
        });
        finish_read(buf, copied)
    }

    fn file_size(&mut self, file: FileHandle) -> VfsResult<u64> {
        let url = self.url(file)?;
        let word = self.rendezvous.send_and_wait(Request::file_size(url.as_str()));
        if word != 0 {
            error!("xFileSize {} failed with {}", url, word);
            return Err(ResultCode::IoErr);
        }

        self.rendezvous.read_payload(|data| {
            <[u8; 8]>::try_from(data)
                .map(u64::from_le_bytes)
                .map_err(|_| ResultCode::IoErr)
        })
    }

    fn access(&mut self, name: &str, flags: AccessFlags) -> VfsResult<bool> {
        debug!("xAccess {} {:?}", name, flags);
        if flags == AccessFlags::ReadWrite {
            return Ok(false);
        }

        let word = self.rendezvous.send_and_wait(Request::access(name));
        if word != 0 {
            error!("xAccess {} failed with {}", name, word);
            return Err(ResultCode::IoErr);
        }

        self.rendezvous.read_payload(|data| {
            <[u8; 4]>::try_from(data)
                .map(|word| u32::from_le_bytes(word) != 0)
                .map_err(|_| ResultCode::IoErr)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendHandle;
    use httpvfs_core::codes::IOCAP_IMMUTABLE;
    use httpvfs_storage::mocks::{sample_database, MockOrigin};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const URL: &str = "http://h/db";

    fn start(origin: &MockOrigin, config: VfsConfig) -> (BackendHandle, HttpVfs) {
        let backend = BackendHandle::spawn(config.clone(), origin.clone()).unwrap();
        let vfs = HttpVfs::new(backend.create_channel().unwrap(), &config);
        (backend, vfs)
    }

    fn config() -> VfsConfig {
        VfsConfig::default().with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_open_read_size() {
        let data = sample_database(1024, 6);
        let origin = MockOrigin::new().with_file(URL, data.clone());
        let (backend, mut vfs) = start(&origin, config());

        let opened = vfs.open(Some(URL), OpenFlags::READWRITE | OpenFlags::CREATE).unwrap();
        assert_eq!(opened.flags, OpenFlags::READONLY);

        let mut buf = vec![0u8; 1024];
        vfs.read(opened.handle, &mut buf, 2048).unwrap();
        assert_eq!(buf, data[2048..3072].to_vec());

        let mut header = [0u8; 100];
        vfs.read(opened.handle, &mut header, 0).unwrap();
        assert_eq!(header.to_vec(), data[..100].to_vec());

        assert_eq!(vfs.file_size(opened.handle), Ok(6144));
        assert_eq!(vfs.device_characteristics(opened.handle), IOCAP_IMMUTABLE);
        assert_eq!(vfs.close(opened.handle), Ok(()));
        assert_eq!(vfs.close(opened.handle), Err(ResultCode::NotFound));

        backend.close().unwrap();
    }

    #[test]
    fn test_anonymous_open() {
        let origin = MockOrigin::new();
        let (backend, mut vfs) = start(&origin, config());

        assert_eq!(vfs.open(None, OpenFlags::READONLY), Err(ResultCode::CantOpen));
        assert!(origin.requests().is_empty());

        backend.close().unwrap();
    }

    #[test]
    fn test_failed_open_releases_handle() {
        let origin = MockOrigin::new();
        let (backend, mut vfs) = start(&origin, config());

        assert_eq!(vfs.open(Some(URL), OpenFlags::READONLY), Err(ResultCode::CantOpen));
        assert_eq!(vfs.open_files(), 0);

        backend.close().unwrap();
    }

    #[test]
    fn test_short_read_zero_fills() {
        let data = sample_database(1024, 2).slice(..1500);
        let origin = MockOrigin::new().with_file(URL, data.clone());
        let (backend, mut vfs) = start(&origin, config());
        let file = vfs.open(Some(URL), OpenFlags::READONLY).unwrap().handle;

        let mut buf = vec![0xaau8; 1024];
        assert_eq!(vfs.read(file, &mut buf, 1024), Err(ResultCode::IoErrShortRead));
        assert_eq!(&buf[..476], &data[1024..1500]);
        assert!(buf[476..].iter().all(|b| *b == 0));

        backend.close().unwrap();
    }

    #[test]
    fn test_read_errors() {
        let origin = MockOrigin::new().with_file(URL, sample_database(1024, 4));
        let (backend, mut vfs) = start(&origin, config());
        let file = vfs.open(Some(URL), OpenFlags::READONLY).unwrap().handle;

        let mut spanning = vec![0u8; 100];
        assert_eq!(vfs.read(file, &mut spanning, 1000), Err(ResultCode::IoErr));

        let mut huge = vec![0u8; 8192];
        assert_eq!(vfs.read(file, &mut huge, 0), Err(ResultCode::IoErr));

        let mut buf = vec![0u8; 16];
        assert_eq!(vfs.read(file, &mut buf, 1 << 53), Err(ResultCode::TooBig));

        vfs.close(file).unwrap();
        assert_eq!(vfs.read(file, &mut buf, 0), Err(ResultCode::NotFound));

        backend.close().unwrap();
    }

    #[test]
    fn test_access() {
        let origin = MockOrigin::new().with_file(URL, sample_database(1024, 1));
        let (backend, mut vfs) = start(&origin, config());

        assert_eq!(vfs.access(URL, AccessFlags::Exists), Ok(true));
        assert_eq!(vfs.access(URL, AccessFlags::Read), Ok(true));
        assert_eq!(vfs.access("http://h/missing", AccessFlags::Exists), Ok(false));

        origin.clear_requests();
        assert_eq!(vfs.access(URL, AccessFlags::ReadWrite), Ok(false));
        assert!(origin.requests().is_empty());

        backend.close().unwrap();
    }

    #[test]
    fn test_timeout_is_io_error() {
        let origin = MockOrigin::new().with_file(URL, sample_database(1024, 1));
        origin.set_latency(Duration::from_millis(500));
        let (backend, mut vfs) = start(&origin, config().with_timeout(Duration::from_millis(50)));

        assert_eq!(vfs.open(Some(URL), OpenFlags::READONLY), Err(ResultCode::IoErr));
        assert_eq!(vfs.open_files(), 0);

        backend.terminate();
    }
}
