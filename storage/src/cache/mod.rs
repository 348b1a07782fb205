// storage/src/cache/mod.rs

//! Size-bounded LRU cache of remote pages.
//!
//! A fetch may cover several consecutive pages (a super-page). The buffer
//! is stored under the first page of the window and every other covered
//! page points back to it, so a read anywhere inside the window resolves
//! in one hop. While a fetch is in flight its key holds the pending fetch
//! itself, which lets concurrent readers of the same page share it.

use crate::page::{PageKey, Window};
use bytes::Bytes;
use httpvfs_core::VfsConfig;
use log::debug;
use lru::LruCache;

/// Accounting weight of a redirect entry.
const REDIRECT_WEIGHT: usize = std::mem::size_of::<u64>();

#[derive(Debug, Clone)]
pub enum CacheEntry<P> {
    /// Authoritative data starting at this page.
    Page(Bytes),
    /// This page lives inside the super-page stored at the given index.
    Redirect(u64),
    /// A fetch starting at this page is in flight.
    Pending(P),
}

impl<P> CacheEntry<P> {
    fn weight(&self) -> usize {
        match self {
            CacheEntry::Page(data) => data.len(),
            CacheEntry::Redirect(_) => REDIRECT_WEIGHT,
            CacheEntry::Pending(_) => 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CacheEntry::Pending(_))
    }
}

#[derive(Debug, Clone)]
pub enum Lookup<P> {
    /// `data` starts at page `first`, which is the looked-up page or the
    /// head of its super-page.
    Hit { data: Bytes, first: u64 },
    Pending(P),
    Miss,
}

pub struct PageCache<P> {
    entries: LruCache<PageKey, CacheEntry<P>>,
    resident: usize,
    capacity: usize,
    max_window: usize,
}

impl<P: Clone> PageCache<P> {
    pub fn new(capacity: usize, max_window: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            resident: 0,
            capacity,
            max_window,
        }
    }

    pub fn from_config(config: &VfsConfig) -> Self {
        Self::new(config.cache_bytes(), config.max_window())
    }

    /// Looks up a page, following at most one redirect. A redirect to
    /// anything but a buffer covering the page is a miss.
    pub fn lookup(&mut self, key: PageKey, page_size: u32) -> Lookup<P> {
        let first = match self.entries.get(&key) {
            None => return Lookup::Miss,
            Some(CacheEntry::Page(data)) => {
                return Lookup::Hit {
                    data: data.clone(),
                    first: key.index,
                }
            }
            Some(CacheEntry::Pending(pending)) => return Lookup::Pending(pending.clone()),
            Some(CacheEntry::Redirect(first)) => *first,
        };

        let skip = (key.index - first) as usize * page_size as usize;
        match self.entries.get(&PageKey::new(key.file, first)) {
            Some(CacheEntry::Page(data)) if data.len() > skip => Lookup::Hit {
                data: data.clone(),
                first,
            },
            _ => Lookup::Miss,
        }
    }

    pub fn peek(&self, key: PageKey) -> Option<&CacheEntry<P>> {
        self.entries.peek(&key)
    }

    /// Size of the buffer holding `key`, without touching recency.
    fn buffer_len(&self, key: PageKey) -> Option<usize> {
        match self.entries.peek(&key)? {
            CacheEntry::Page(data) => Some(data.len()),
            CacheEntry::Redirect(first) => match self.entries.peek(&PageKey::new(key.file, *first))? {
                CacheEntry::Page(data) => Some(data.len()),
                _ => None,
            },
            CacheEntry::Pending(_) => None,
        }
    }

    /// Window to fetch for a miss on `key`. Sequential access doubles the
    /// buffer holding the previous page, otherwise one page is fetched.
    pub fn fetch_window(&self, key: PageKey, page_size: u32, content_length: u64) -> Window {
        let page = page_size as u64;
        let len = match key.previous().and_then(|prev| self.buffer_len(prev)) {
            Some(previous) => {
                let doubled = (previous as u64 * 2).min(self.max_window as u64);
                (doubled - doubled % page).max(page)
            }
            None => page,
        };

        Window {
            start: key.offset(page_size),
            len,
        }
        .clamp_to(content_length)
    }

    pub fn insert_pending(&mut self, key: PageKey, pending: P) {
        self.put(key, CacheEntry::Pending(pending));
    }

    /// Stores a page unless something already occupies its key.
    pub fn seed(&mut self, key: PageKey, data: Bytes) {
        if self.entries.contains(&key) || data.is_empty() {
            return;
        }
        self.put(key, CacheEntry::Page(data));
        self.evict();
    }

    /// Replaces the pending fetch at `key` with its data and points every
    /// other page the data covers back at `key`.
    pub fn complete(&mut self, key: PageKey, page_size: u32, data: Bytes) {
        if data.is_empty() {
            self.abandon(key);
            return;
        }

        let pages = (data.len() as u64).div_ceil(page_size as u64);
        for index in key.index + 1..key.index + pages {
            let covered = PageKey::new(key.file, index);
            if matches!(self.entries.peek(&covered), Some(CacheEntry::Pending(_))) {
                continue;
            }
            self.put(covered, CacheEntry::Redirect(key.index));
        }

        self.put(key, CacheEntry::Page(data));
        self.evict();
    }

    /// Drops a failed fetch so a later read can retry it.
    pub fn abandon(&mut self, key: PageKey) {
        if matches!(self.entries.peek(&key), Some(CacheEntry::Pending(_))) {
            self.remove(key);
        }
    }

    pub fn remove(&mut self, key: PageKey) -> Option<CacheEntry<P>> {
        let entry = self.entries.pop(&key)?;
        self.resident -= entry.weight();
        Some(entry)
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn put(&mut self, key: PageKey, entry: CacheEntry<P>) {
        self.resident += entry.weight();
        if let Some(old) = self.entries.put(key, entry) {
            self.resident -= old.weight();
        }
    }

    fn evict(&mut self) {
        while self.resident > self.capacity {
            // In-flight fetches have subscribers and are never evicted
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(_, entry)| !entry.is_pending())
                .map(|(key, _)| *key);

            let Some(victim) = victim else { break };
            debug!("evicting page {} of file {}", victim.index, victim.file);
            self.remove(victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileId;
    use pretty_assertions::assert_eq;

    const FILE: FileId = FileId(1);

    fn key(index: u64) -> PageKey {
        PageKey::new(FILE, index)
    }

    fn page(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    fn hit_first(lookup: Lookup<u32>) -> Option<u64> {
        match lookup {
            Lookup::Hit { first, .. } => Some(first),
            _ => None,
        }
    }

    #[test]
    fn test_sequential_reads_build_super_pages() {
        let mut cache: PageCache<u32> = PageCache::new(1 << 20, 1 << 18);

        // Page 0 has no predecessor: one page
        assert_eq!(
            cache.fetch_window(key(0), 1024, 100_000),
            Window { start: 0, len: 1024 }
        );
        cache.complete(key(0), 1024, page(1024, 0));

        // Page 1 follows a cached page: twice its size
        let window = cache.fetch_window(key(1), 1024, 100_000);
        assert_eq!(window, Window { start: 1024, len: 2048 });
        assert_eq!(window.end_inclusive(), 3071);
        cache.complete(key(1), 1024, page(2048, 1));

        // Page 2 is inside the super-page at 1
        assert_eq!(hit_first(cache.lookup(key(2), 1024)), Some(1));

        // Page 3 follows a 2-page super-page: four pages
        assert_eq!(
            cache.fetch_window(key(3), 1024, 100_000),
            Window { start: 3072, len: 4096 }
        );
    }

    #[test]
    fn test_window_respects_cap_and_file_end() {
        let mut cache: PageCache<u32> = PageCache::new(1 << 20, 4096);
        cache.complete(key(0), 1024, page(4096, 0));

        // Doubling 4096 is capped at the maximum window
        assert_eq!(cache.fetch_window(key(4), 1024, 100_000).len, 4096);

        // Clamped to the content length
        assert_eq!(cache.fetch_window(key(4), 1024, 5000).len, 5000 - 4096);

        // Past the end of the file nothing is fetched
        assert!(cache.fetch_window(key(10), 1024, 5000).is_empty());
    }

    #[test]
    fn test_pending_lookup_and_abandon() {
        let mut cache: PageCache<u32> = PageCache::new(1 << 20, 1 << 18);

        cache.insert_pending(key(5), 42);
        assert!(matches!(cache.lookup(key(5), 1024), Lookup::Pending(42)));
        assert_eq!(cache.resident_bytes(), 0);

        cache.abandon(key(5));
        assert!(matches!(cache.lookup(key(5), 1024), Lookup::Miss));

        // Abandon never drops real data
        cache.complete(key(6), 1024, page(1024, 6));
        cache.abandon(key(6));
        assert!(cache.peek(key(6)).is_some());
    }

    #[test]
    fn test_complete_keeps_pending_neighbours() {
        let mut cache: PageCache<u32> = PageCache::new(1 << 20, 1 << 18);

        cache.insert_pending(key(3), 7);
        cache.complete(key(2), 1024, page(2048, 2));

        assert!(cache.peek(key(3)).unwrap().is_pending());
    }

    #[test]
    fn test_redirect_to_evicted_page_is_miss() {
        let mut cache: PageCache<u32> = PageCache::new(1 << 20, 1 << 18);
        cache.complete(key(0), 1024, page(3072, 0));

        cache.remove(key(0));

        assert!(matches!(cache.lookup(key(1), 1024), Lookup::Miss));
        assert!(matches!(cache.lookup(key(2), 1024), Lookup::Miss));
    }

    #[test]
    fn test_redirect_to_shorter_buffer_is_miss() {
        let mut cache: PageCache<u32> = PageCache::new(1 << 20, 1 << 18);
        cache.complete(key(0), 1024, page(3072, 0));

        // The head gets refetched as a single page; old redirects no longer fit
        cache.remove(key(0));
        cache.complete(key(0), 1024, page(1024, 0));

        assert!(matches!(cache.lookup(key(2), 1024), Lookup::Miss));
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache: PageCache<u32> = PageCache::new(3 * 1024, 1 << 18);

        cache.complete(key(10), 1024, page(1024, 10));
        cache.complete(key(20), 1024, page(1024, 20));
        cache.complete(key(30), 1024, page(1024, 30));

        // Touch 10 so 20 becomes least recently used
        assert!(hit_first(cache.lookup(key(10), 1024)).is_some());
        cache.complete(key(40), 1024, page(1024, 40));

        assert!(cache.peek(key(20)).is_none());
        assert!(cache.peek(key(10)).is_some());
        assert!(cache.peek(key(40)).is_some());
        assert!(cache.resident_bytes() <= cache.capacity());
    }

    #[test]
    fn test_eviction_skips_pending() {
        let mut cache: PageCache<u32> = PageCache::new(2 * 1024, 1 << 18);

        cache.insert_pending(key(1), 1);
        cache.complete(key(10), 1024, page(1024, 10));
        cache.complete(key(20), 1024, page(1024, 20));
        cache.complete(key(30), 1024, page(1024, 30));

        assert!(cache.peek(key(1)).unwrap().is_pending());
        assert!(cache.peek(key(10)).is_none());
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let mut cache: PageCache<u32> = PageCache::new(1 << 20, 1 << 18);

        cache.insert_pending(key(0), 9);
        cache.seed(key(0), page(1024, 0));
        assert!(cache.peek(key(0)).unwrap().is_pending());

        cache.seed(key(1), page(1024, 1));
        assert_eq!(cache.resident_bytes(), 1024);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_resident_bytes_accounting() {
        let mut cache: PageCache<u32> = PageCache::new(1 << 20, 1 << 18);

        cache.insert_pending(key(0), 1);
        cache.complete(key(0), 1024, page(3072, 0));
        assert_eq!(cache.resident_bytes(), 3072 + 2 * REDIRECT_WEIGHT);

        cache.remove(key(1));
        assert_eq!(cache.resident_bytes(), 3072 + REDIRECT_WEIGHT);
    }
}
