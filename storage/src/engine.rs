// storage/src/engine.rs

//! Asynchronous page cache engine.
//!
//! The engine is single-threaded by construction (`Rc` + `RefCell`): it is
//! owned by the fetch backend actor and every state change happens on the
//! actor's thread. Opens, page-size probes and page fetches are stored as
//! shared futures while in flight, so concurrent callers asking for the
//! same thing wait on one network request.

use crate::cache::{Lookup, PageCache};
use crate::file::{FileId, FileRegistry, RemoteFile};
use crate::page::{self, PageKey, Window, PROVISIONAL_PAGE_SIZE};
use crate::transport::Transport;
use crate::{Result, StorageError};
use bytes::Bytes;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use httpvfs_core::{OpenMethod, VfsConfig};
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

type PendingFetch = Shared<LocalBoxFuture<'static, Result<Bytes>>>;
type PendingOpen = Shared<LocalBoxFuture<'static, Result<()>>>;
type PendingProbe = Shared<LocalBoxFuture<'static, Result<u32>>>;

struct State {
    files: FileRegistry,
    opening: HashMap<String, PendingOpen>,
    probing: HashMap<FileId, PendingProbe>,
    cache: PageCache<PendingFetch>,
}

pub struct PageCacheEngine<T> {
    transport: Rc<T>,
    state: Rc<RefCell<State>>,
    open_method: OpenMethod,
    max_page_size: usize,
}

impl<T> Clone for PageCacheEngine<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            state: self.state.clone(),
            open_method: self.open_method,
            max_page_size: self.max_page_size,
        }
    }
}

impl<T: Transport + 'static> PageCacheEngine<T> {
    pub fn new(transport: T, config: &VfsConfig) -> Self {
        Self {
            transport: Rc::new(transport),
            state: Rc::new(RefCell::new(State {
                files: FileRegistry::new(),
                opening: HashMap::new(),
                probing: HashMap::new(),
                cache: PageCache::from_config(config),
            })),
            open_method: config.open_method,
            max_page_size: config.max_page_size,
        }
    }

    /// Makes `url` known to the engine. Opening a known URL is free;
    /// concurrent openers of a new URL share one request.
    pub async fn open(&self, url: &str) -> Result<()> {
        let pending = {
            let mut state = self.state.borrow_mut();
            if state.files.contains(url) {
                return Ok(());
            }
            match state.opening.get(url) {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.start_open(url.to_string()).shared();
                    state.opening.insert(url.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Whether `url` can be opened.
    pub async fn access(&self, url: &str) -> bool {
        match self.open(url).await {
            Ok(()) => true,
            Err(err) => {
                debug!("access check for {} failed: {}", url, err);
                false
            }
        }
    }

    /// Reads `len` bytes at `offset`. The range must lie within one page.
    /// Fewer bytes come back only at the end of the file.
    pub async fn read(&self, url: &str, offset: u64, len: usize) -> Result<Bytes> {
        let file = self.state.borrow().files.require(url)?.clone();

        let page_size = self.page_size(&file).await?;
        if page_size as usize > self.max_page_size {
            return Err(StorageError::PageSizeTooLarge {
                page_size,
                max: self.max_page_size,
            });
        }

        let slot = page::locate(offset, len, page_size)?;
        let (data, first) = self.load(&file, slot.index, page_size).await?;
        Ok(page::extract(&data, first, &slot, page_size))
    }

    pub fn file_size(&self, url: &str) -> Result<u64> {
        Ok(self.state.borrow().files.require(url)?.content_length)
    }

    pub fn file(&self, url: &str) -> Option<RemoteFile> {
        self.state.borrow().files.get(url).cloned()
    }

    pub fn resident_bytes(&self) -> usize {
        self.state.borrow().cache.resident_bytes()
    }

    fn start_open(&self, url: String) -> LocalBoxFuture<'static, Result<()>> {
        let transport = self.transport.clone();
        let state = self.state.clone();
        let method = self.open_method;

        async move {
            let probed = transport.probe(&url, method).await;

            let mut state = state.borrow_mut();
            state.opening.remove(&url);
            let meta = probed?;

            if !meta.accepts_ranges {
                warn!(
                    "Server for {} does not advertise 'Accept-Ranges'. \
                     If the server supports it, add \"Accept-Ranges: bytes\" to remove this message.",
                    url
                );
            }
            let file = state.files.register(&url, meta.content_length);
            debug!("opened {} as file {} ({} bytes)", url, file.id, file.content_length);
            Ok(())
        }
        .boxed_local()
    }

    /// Page size of `file`, read from its header on first use.
    async fn page_size(&self, file: &RemoteFile) -> Result<u32> {
        let pending = {
            let mut state = self.state.borrow_mut();
            if let Some(size) = state.files.get(&file.url).and_then(|known| known.page_size) {
                return Ok(size);
            }
            match state.probing.get(&file.id) {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.start_probe(file.clone()).shared();
                    state.probing.insert(file.id, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    // The header is fetched as a provisional 1024-byte page. If the real
    // page size is not larger, those bytes are kept as page 0.
    fn start_probe(&self, file: RemoteFile) -> LocalBoxFuture<'static, Result<u32>> {
        let transport = self.transport.clone();
        let state = self.state.clone();

        async move {
            let window = Window {
                start: 0,
                len: PROVISIONAL_PAGE_SIZE as u64,
            }
            .clamp_to(file.content_length);

            let fetched = transport.get_range(&file.url, window).await;

            let mut state = state.borrow_mut();
            state.probing.remove(&file.id);
            let head = fetched?;
            let discovered = page::discover_page_size(&head)?;
            let page_size = state.files.set_page_size(&file.url, discovered)?;

            if page_size != PROVISIONAL_PAGE_SIZE {
                warn!(
                    "Page size for {} is {}, recommended size is {}",
                    file.url, page_size, PROVISIONAL_PAGE_SIZE
                );
            }
            if page_size as usize <= head.len() {
                state
                    .cache
                    .seed(PageKey::new(file.id, 0), head.slice(..page_size as usize));
            }
            Ok(page_size)
        }
        .boxed_local()
    }

    /// Buffer holding page `index` and the page it starts at.
    async fn load(&self, file: &RemoteFile, index: u64, page_size: u32) -> Result<(Bytes, u64)> {
        let key = PageKey::new(file.id, index);

        let pending = {
            let mut state = self.state.borrow_mut();
            match state.cache.lookup(key, page_size) {
                Lookup::Hit { data, first } => {
                    debug!("cache hit for {}:{}", file.url, index);
                    return Ok((data, first));
                }
                Lookup::Pending(pending) => {
                    debug!("joining in-flight fetch for {}:{}", file.url, index);
                    pending
                }
                Lookup::Miss => {
                    let window = state.cache.fetch_window(key, page_size, file.content_length);
                    if window.is_empty() {
                        return Ok((Bytes::new(), index));
                    }
                    debug!(
                        "cache miss for {}:{}, fetching {} bytes",
                        file.url, index, window.len
                    );
                    let pending = self
                        .start_fetch(file.url.clone(), key, window, page_size)
                        .shared();
                    state.cache.insert_pending(key, pending.clone());
                    pending
                }
            }
        };

        Ok((pending.await?, index))
    }

    fn start_fetch(
        &self,
        url: String,
        key: PageKey,
        window: Window,
        page_size: u32,
    ) -> LocalBoxFuture<'static, Result<Bytes>> {
        let transport = self.transport.clone();
        let state = self.state.clone();

        async move {
            let fetched = transport.get_range(&url, window).await;

            let mut state = state.borrow_mut();
            match &fetched {
                Ok(data) => state.cache.complete(key, page_size, data.clone()),
                Err(_) => state.cache.abandon(key),
            }
            fetched
        }
        .boxed_local()
    }
}
