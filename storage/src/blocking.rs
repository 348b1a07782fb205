// storage/src/blocking.rs

//! Blocking twin of [`PageCacheEngine`](crate::PageCacheEngine) for the
//! in-thread fallback. Same page-size discovery and super-page algorithm,
//! but the cache is private to one instance and every miss blocks the
//! caller on the origin.

use crate::cache::{Lookup, PageCache};
use crate::file::{FileRegistry, RemoteFile};
use crate::page::{self, PageKey, Window, PROVISIONAL_PAGE_SIZE};
use crate::transport::BlockingTransport;
use crate::{Result, StorageError};
use bytes::Bytes;
use httpvfs_core::{OpenMethod, VfsConfig};
use log::{debug, warn};
use std::convert::Infallible;

pub struct BlockingEngine<T> {
    transport: T,
    files: FileRegistry,
    // Nothing is ever in flight here
    cache: PageCache<Infallible>,
    open_method: OpenMethod,
    max_page_size: usize,
}

impl<T: BlockingTransport> BlockingEngine<T> {
    pub fn new(transport: T, config: &VfsConfig) -> Self {
        Self {
            transport,
            files: FileRegistry::new(),
            cache: PageCache::from_config(config),
            open_method: config.open_method,
            max_page_size: config.max_page_size,
        }
    }

    pub fn open(&mut self, url: &str) -> Result<()> {
        if self.files.contains(url) {
            return Ok(());
        }

        let meta = self.transport.probe(url, self.open_method)?;
        if !meta.accepts_ranges {
            warn!(
                "Server for {} does not advertise 'Accept-Ranges'. \
                 If the server supports it, add \"Accept-Ranges: bytes\" to remove this message.",
                url
            );
        }
        let file = self.files.register(url, meta.content_length);
        debug!("opened {} as file {} ({} bytes)", url, file.id, file.content_length);
        Ok(())
    }

    pub fn read(&mut self, url: &str, offset: u64, len: usize) -> Result<Bytes> {
        let file = self.files.require(url)?.clone();

        let page_size = self.page_size(&file)?;
        if page_size as usize > self.max_page_size {
            return Err(StorageError::PageSizeTooLarge {
                page_size,
                max: self.max_page_size,
            });
        }

        let slot = page::locate(offset, len, page_size)?;
        let (data, first) = self.load(&file, slot.index, page_size)?;
        Ok(page::extract(&data, first, &slot, page_size))
    }

    pub fn file_size(&self, url: &str) -> Result<u64> {
        Ok(self.files.require(url)?.content_length)
    }

    pub fn file(&self, url: &str) -> Option<&RemoteFile> {
        self.files.get(url)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn page_size(&mut self, file: &RemoteFile) -> Result<u32> {
        if let Some(size) = self.files.get(&file.url).and_then(|known| known.page_size) {
            return Ok(size);
        }

        let window = Window {
            start: 0,
            len: PROVISIONAL_PAGE_SIZE as u64,
        }
        .clamp_to(file.content_length);
        let head = self.transport.get_range(&file.url, window)?;
        let page_size = self
            .files
            .set_page_size(&file.url, page::discover_page_size(&head)?)?;

        if page_size != PROVISIONAL_PAGE_SIZE {
            warn!(
                "Page size for {} is {}, recommended size is {}",
                file.url, page_size, PROVISIONAL_PAGE_SIZE
            );
        }
        if page_size as usize <= head.len() {
            self.cache
                .seed(PageKey::new(file.id, 0), head.slice(..page_size as usize));
        }
        Ok(page_size)
    }

    fn load(&mut self, file: &RemoteFile, index: u64, page_size: u32) -> Result<(Bytes, u64)> {
        let key = PageKey::new(file.id, index);

        match self.cache.lookup(key, page_size) {
            Lookup::Hit { data, first } => {
                debug!("cache hit for {}:{}", file.url, index);
                return Ok((data, first));
            }
            Lookup::Pending(never) => match never {},
            Lookup::Miss => {}
        }

        let window = self.cache.fetch_window(key, page_size, file.content_length);
        if window.is_empty() {
            return Ok((Bytes::new(), index));
        }
        debug!(
            "cache miss for {}:{}, fetching {} bytes",
            file.url, index, window.len
        );

        let data = self.transport.get_range(&file.url, window)?;
        self.cache.complete(key, page_size, data.clone());
        Ok((data, index))
    }
}
