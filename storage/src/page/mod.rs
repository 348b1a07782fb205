// storage/src/page/mod.rs

use crate::endian::ntoh16;
use crate::file::FileId;
use crate::{Result, StorageError};
use bytes::Bytes;
use httpvfs_core::config::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use log::warn;

/// Page size assumed until the real one is read from the header.
pub const PROVISIONAL_PAGE_SIZE: u32 = 1024;

/// Location of the big-endian page size field in page 0.
pub const PAGE_SIZE_OFFSET: usize = 16;

/// Largest offset the storage interface accepts (2^53 - 1).
pub const MAX_SAFE_OFFSET: u64 = (1 << 53) - 1;

/// Cache key: one logical page of one remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub file: FileId,
    pub index: u64,
}

impl PageKey {
    pub fn new(file: FileId, index: u64) -> Self {
        Self { file, index }
    }

    pub fn previous(&self) -> Option<PageKey> {
        self.index.checked_sub(1).map(|index| PageKey::new(self.file, index))
    }

    pub fn offset(&self, page_size: u32) -> u64 {
        self.index * page_size as u64
    }
}

/// Where a read lands inside the page grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSlot {
    pub index: u64,
    /// Offset of the read relative to the start of its page.
    pub within: usize,
    pub len: usize,
}

/// Maps a byte range onto exactly one page.
///
/// Unaligned reads are logged and still served; reads crossing a page
/// boundary are refused since the engine never asks for more than one
/// page per call.
pub fn locate(offset: u64, len: usize, page_size: u32) -> Result<ReadSlot> {
    if offset > MAX_SAFE_OFFSET {
        return Err(StorageError::TooBig(offset));
    }

    let page_size = page_size as u64;
    let index = offset / page_size;
    let page_start = index * page_size;

    if page_start != offset {
        warn!(
            "{}",
            StorageError::UnalignedRead {
                offset,
                page_size: page_size as u32,
            }
        );
    }

    if page_start + page_size < offset + len as u64 {
        return Err(StorageError::SpanningRead { offset, len });
    }

    Ok(ReadSlot {
        index,
        within: (offset - page_start) as usize,
        len,
    })
}

/// Reads the page size from the first bytes of a database file.
pub fn discover_page_size(header: &[u8]) -> Result<u32> {
    let field = header
        .get(PAGE_SIZE_OFFSET..PAGE_SIZE_OFFSET + 2)
        .ok_or_else(|| {
            StorageError::Malformed(format!(
                "database header is {} bytes, too short for the page size field",
                header.len()
            ))
        })?;

    let page_size = match ntoh16([field[0], field[1]]) {
        // 65536 does not fit in 16 bits and is stored as 1
        1 => MAX_PAGE_SIZE as u32,
        size => size as u32,
    };

    if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE as u32..=MAX_PAGE_SIZE as u32).contains(&page_size) {
        return Err(StorageError::Malformed(format!(
            "invalid page size {} in database header",
            page_size
        )));
    }

    Ok(page_size)
}

/// Byte range requested from the origin for one cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub len: u64,
}

impl Window {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Last byte of the window, as used in a `Range` header.
    pub fn end_inclusive(&self) -> u64 {
        self.start + self.len.saturating_sub(1)
    }

    /// Shrinks the window so it does not run past the end of the file.
    pub fn clamp_to(self, content_length: u64) -> Self {
        let len = content_length.saturating_sub(self.start).min(self.len);
        Self {
            start: self.start,
            len,
        }
    }
}

/// Cuts the bytes of `slot` out of a (super-)page buffer starting at page
/// `first`. Returns fewer bytes when the buffer ends early.
pub fn extract(data: &Bytes, first: u64, slot: &ReadSlot, page_size: u32) -> Bytes {
    let start = (slot.index - first) as usize * page_size as usize + slot.within;
    if start >= data.len() {
        return Bytes::new();
    }
    let end = (start + slot.len).min(data.len());
    data.slice(start..end)
}
