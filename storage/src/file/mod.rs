// storage/src/file/mod.rs

use crate::{Result, StorageError};
use std::collections::HashMap;
use std::fmt;

/// Identifies a remote file inside one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: FileId,
    pub url: String,
    pub content_length: u64,
    /// Unknown until the first read; never changes once set.
    pub page_size: Option<u32>,
}

/// Known remote files, one entry per distinct URL.
#[derive(Debug)]
pub struct FileRegistry {
    files: HashMap<String, RemoteFile>,
    next_id: u32,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.files.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&RemoteFile> {
        self.files.get(url)
    }

    /// Same as [`get`](Self::get) but reports an unknown URL as `NotOpen`.
    pub fn require(&self, url: &str) -> Result<&RemoteFile> {
        self.files
            .get(url)
            .ok_or_else(|| StorageError::NotOpen(url.to_string()))
    }

    /// Registers a URL. Registering a known URL keeps the existing entry.
    pub fn register(&mut self, url: &str, content_length: u64) -> &RemoteFile {
        let next_id = &mut self.next_id;
        self.files.entry(url.to_string()).or_insert_with(|| {
            let id = FileId(*next_id);
            *next_id += 1;
            RemoteFile {
                id,
                url: url.to_string(),
                content_length,
                page_size: None,
            }
        })
    }

    /// Records the discovered page size. The first value wins.
    pub fn set_page_size(&mut self, url: &str, page_size: u32) -> Result<u32> {
        let file = self
            .files
            .get_mut(url)
            .ok_or_else(|| StorageError::NotOpen(url.to_string()))?;
        Ok(*file.page_size.get_or_insert(page_size))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
