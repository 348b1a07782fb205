// vfs/src/interface.rs

//! Storage-interface boundary towards the host database engine.
//!
//! [`StorageInterface`] is the callback set the engine calls through. Only
//! `open`, `close`, `read`, `file_size` and `access` touch the origin; every
//! other callback has an inert default for a read-only, lock-free file.

use crate::handle::FileHandle;
use httpvfs_core::codes::{FCNTL_SYNC, IOCAP_IMMUTABLE, MAX_PATHNAME};
use httpvfs_core::{codes, AccessFlags, LockLevel, OpenFlags, ResultCode, VfsConfig};
use log::{debug, info};
use std::time::Duration;

/// Name the adapters register under.
pub const VFS_NAME: &str = "http";

pub type VfsResult<T> = std::result::Result<T, ResultCode>;

/// Outcome of a successful `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    pub handle: FileHandle,
    /// Flags the file was actually opened with.
    pub flags: OpenFlags,
}

pub trait StorageInterface {
    fn name(&self) -> &'static str {
        VFS_NAME
    }

    fn open(&mut self, name: Option<&str>, flags: OpenFlags) -> VfsResult<Opened>;

    fn close(&mut self, file: FileHandle) -> VfsResult<()>;

    /// Fills `buf` from `offset`. A read past end of file zero-fills the
    /// rest of `buf` and fails with [`ResultCode::IoErrShortRead`].
    fn read(&mut self, file: FileHandle, buf: &mut [u8], offset: u64) -> VfsResult<()>;

    fn file_size(&mut self, file: FileHandle) -> VfsResult<u64>;

    fn access(&mut self, name: &str, flags: AccessFlags) -> VfsResult<bool>;

    fn write(&mut self, file: FileHandle, _data: &[u8], _offset: u64) -> VfsResult<()> {
        debug!("xWrite {}", file);
        Err(ResultCode::ReadOnly)
    }

    fn truncate(&mut self, file: FileHandle, _size: u64) -> VfsResult<()> {
        debug!("xTruncate {}", file);
        Ok(())
    }

    fn sync(&mut self, file: FileHandle, _flags: i32) -> VfsResult<()> {
        debug!("xSync {}", file);
        Ok(())
    }

    fn lock(&mut self, _file: FileHandle, _level: LockLevel) -> VfsResult<()> {
        Ok(())
    }

    fn unlock(&mut self, _file: FileHandle, _level: LockLevel) -> VfsResult<()> {
        Ok(())
    }

    fn check_reserved_lock(&mut self, _file: FileHandle) -> VfsResult<bool> {
        Ok(false)
    }

    fn file_control(&mut self, file: FileHandle, op: i32) -> VfsResult<()> {
        debug!("xFileControl {} op {}", file, op);
        if op == FCNTL_SYNC {
            Ok(())
        } else {
            Err(ResultCode::NotFound)
        }
    }

    fn sector_size(&mut self, _file: FileHandle) -> u32 {
        0
    }

    fn device_characteristics(&mut self, _file: FileHandle) -> i32 {
        IOCAP_IMMUTABLE
    }

    fn delete(&mut self, name: &str, _sync_dir: bool) -> VfsResult<()> {
        debug!("xDelete {}", name);
        Err(ResultCode::ReadOnly)
    }

    /// URLs are already absolute.
    fn full_pathname(&mut self, name: &str) -> VfsResult<String> {
        if name.len() >= MAX_PATHNAME {
            return Err(ResultCode::CantOpen);
        }
        Ok(name.to_string())
    }

    fn current_time(&mut self) -> f64 {
        codes::julian_day_now()
    }

    fn current_time_i64(&mut self) -> i64 {
        codes::julian_millis_now()
    }

    fn last_error(&mut self) -> i32 {
        0
    }
}

/// Connection to the host engine, as seen by the post-open hook.
pub trait EngineConnection {
    fn busy_timeout(&mut self, timeout: Duration) -> anyhow::Result<()>;

    fn execute(&mut self, sql: &str) -> anyhow::Result<()>;
}

/// Registration surface of the host engine.
pub trait HostEngine {
    type Connection: EngineConnection;

    fn register_vfs(&mut self, vfs: Box<dyn StorageInterface + Send>) -> anyhow::Result<()>;

    fn set_post_open_hook(&mut self, hook: PostOpenHook);

    fn post_open_hook(&self) -> Option<&PostOpenHook>;

    /// Called by the engine for every connection it opens. Runs the
    /// installed hook, if any.
    fn connection_opened(&self, conn: &mut Self::Connection) -> anyhow::Result<()> {
        match self.post_open_hook() {
            Some(hook) => hook.apply(conn),
            None => Ok(()),
        }
    }
}

/// Connection setup run after every open on the HTTP storage interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOpenHook {
    pub busy_timeout: Duration,
}

impl PostOpenHook {
    /// Statements run on every new connection. The remote file has no
    /// journal to speak of and pages are cached by the adapter.
    pub const STATEMENTS: [&'static str; 2] = ["PRAGMA journal_mode=DELETE;", "PRAGMA cache_size=0;"];

    pub fn new(config: &VfsConfig) -> Self {
        Self {
            busy_timeout: config.timeout,
        }
    }

    pub fn apply<C: EngineConnection + ?Sized>(&self, conn: &mut C) -> anyhow::Result<()> {
        conn.busy_timeout(self.busy_timeout)?;
        for sql in Self::STATEMENTS {
            conn.execute(sql)?;
        }
        Ok(())
    }
}

/// Registers `vfs` with the engine and installs the post-open hook.
pub fn install<E: HostEngine>(
    engine: &mut E,
    vfs: Box<dyn StorageInterface + Send>,
    config: &VfsConfig,
) -> anyhow::Result<()> {
    let name = vfs.name();
    engine.register_vfs(vfs)?;
    engine.set_post_open_hook(PostOpenHook::new(config));
    info!("registered storage interface {:?}", name);
    Ok(())
}
