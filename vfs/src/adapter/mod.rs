// vfs/src/adapter/mod.rs

//! Storage-interface adapters: [`HttpVfs`] talks to the shared fetch
//! backend, [`SyncHttpVfs`] fetches in the calling thread.

mod shared;
mod sync;

pub use shared::HttpVfs;
pub use sync::SyncHttpVfs;

use crate::interface::VfsResult;
use httpvfs_core::ResultCode;
use httpvfs_storage::page::MAX_SAFE_OFFSET;
use log::debug;

/// An open remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenFile {
    url: String,
}

fn check_offset(offset: u64) -> VfsResult<()> {
    if offset > MAX_SAFE_OFFSET {
        Err(ResultCode::TooBig)
    } else {
        Ok(())
    }
}

/// Zero-fills what the origin did not deliver.
fn finish_read(buf: &mut [u8], copied: usize) -> VfsResult<()> {
    if copied >= buf.len() {
        return Ok(());
    }
    debug!("short read, {} of {} bytes", copied, buf.len());
    buf[copied..].fill(0);
    Err(ResultCode::IoErrShortRead)
}
