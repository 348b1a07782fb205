// core/src/config.rs

//! Configuration shared by the shared backend and the sync fallback.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Smallest page size the database format allows.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size the database format allows.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Which backend strategy serves the storage interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// One fetch backend thread shared by every connection.
    Shared,
    /// Blocking HTTP inside the calling thread with a private cache.
    Sync,
}

impl BackendType {
    /// Whether this target can run a backend on its own thread.
    pub fn shared_supported() -> bool {
        !cfg!(all(target_arch = "wasm32", not(target_feature = "atomics")))
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendType::Shared => write!(f, "shared"),
            BackendType::Sync => write!(f, "sync"),
        }
    }
}

/// HTTP method used to discover the size of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpenMethod {
    #[default]
    Head,
    Get,
}

impl fmt::Display for OpenMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMethod::Head => write!(f, "HEAD"),
            OpenMethod::Get => write!(f, "GET"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Upper bound for one storage-interface call, HTTP transfers included.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Largest page size a remote file may use, also the rendezvous payload size.
    pub max_page_size: usize,
    /// Page cache size in KiB.
    pub cache_size: usize,
    /// Extra headers attached to every request. Names loaded through
    /// [`VfsConfig::load`] come back lowercased.
    pub headers: BTreeMap<String, String>,
    /// `None` picks the shared backend when the target supports it.
    pub backend_type: Option<BackendType>,
    pub open_method: OpenMethod,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_page_size: 4096,
            cache_size: 1024,
            headers: BTreeMap::new(),
            backend_type: None,
            open_method: OpenMethod::Head,
        }
    }
}

impl VfsConfig {
    /// Loads a configuration from an optional file, overridden by
    /// `HTTPVFS_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix("HTTPVFS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.timeout.is_zero() {
            return Err(config::ConfigError::Message(
                "timeout must be greater than zero".to_string(),
            ));
        }

        if self.cache_size == 0 {
            return Err(config::ConfigError::Message(
                "cache_size must be greater than zero".to_string(),
            ));
        }

        if !self.max_page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.max_page_size)
        {
            return Err(config::ConfigError::Message(format!(
                "max_page_size must be a power of two between {} and {}, got {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.max_page_size
            )));
        }

        Ok(())
    }

    /// Cache bound in bytes.
    pub fn cache_bytes(&self) -> usize {
        self.cache_size * 1024
    }

    /// Largest super-page window: a quarter of the cache, at least one page.
    /// A zero page size yields the plain quarter.
    pub fn max_window(&self) -> usize {
        let quarter = self.cache_bytes() / 4;
        match quarter.checked_rem(self.max_page_size) {
            Some(rem) => (quarter - rem).max(self.max_page_size),
            None => quarter,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    pub fn with_cache_size(mut self, kib: usize) -> Self {
        self.cache_size = kib;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_backend_type(mut self, backend_type: BackendType) -> Self {
        self.backend_type = Some(backend_type);
        self
    }

    pub fn with_open_method(mut self, method: OpenMethod) -> Self {
        self.open_method = method;
        self
    }
}

// Durations travel as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::Mutex;

    // Loading reads the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = VfsConfig::default();

        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.max_page_size, 4096);
        assert_eq!(config.cache_size, 1024);
        assert!(config.headers.is_empty());
        assert_eq!(config.backend_type, None);
        assert_eq!(config.open_method, OpenMethod::Head);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip_uses_millis() {
        let config = VfsConfig::default()
            .with_timeout(Duration::from_millis(1500))
            .with_backend_type(BackendType::Sync)
            .with_open_method(OpenMethod::Get);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 1500);
        assert_eq!(json["backend_type"], "sync");
        assert_eq!(json["open_method"], "GET");

        let back: VfsConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: VfsConfig = serde_json::from_str(r#"{"max_page_size": 1024}"#).unwrap();

        assert_eq!(config.max_page_size, 1024);
        assert_eq!(config.cache_size, 1024);
        assert_eq!(config.timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_load_from_file() {
        let _env = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"timeout": 45000, "max_page_size": 1024, "headers": {{"Authorization": "Bearer x"}}}}"#
        )
        .unwrap();

        let config = VfsConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.max_page_size, 1024);
        assert_eq!(
            config.headers.get("authorization").map(String::as_str),
            Some("Bearer x")
        );
    }

    #[test]
    fn test_load_from_environment() {
        let _env = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"timeout": 45000, "cache_size": 64}}"#).unwrap();

        std::env::set_var("HTTPVFS_TIMEOUT", "5000");
        std::env::set_var("HTTPVFS_MAX_PAGE_SIZE", "1024");
        let from_env = VfsConfig::load(None);
        let layered = VfsConfig::load(Some(file.path()));
        std::env::remove_var("HTTPVFS_TIMEOUT");
        std::env::remove_var("HTTPVFS_MAX_PAGE_SIZE");

        let from_env = from_env.unwrap();
        assert_eq!(from_env.timeout, Duration::from_secs(5));
        assert_eq!(from_env.max_page_size, 1024);
        assert_eq!(from_env.cache_size, 1024);

        // Environment wins over the file, the file over defaults
        let layered = layered.unwrap();
        assert_eq!(layered.timeout, Duration::from_secs(5));
        assert_eq!(layered.max_page_size, 1024);
        assert_eq!(layered.cache_size, 64);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(VfsConfig::default().with_max_page_size(1000).validate().is_err());
        assert!(VfsConfig::default().with_max_page_size(256).validate().is_err());
        assert!(VfsConfig::default().with_max_page_size(131072).validate().is_err());
        assert!(VfsConfig::default().with_cache_size(0).validate().is_err());
        assert!(VfsConfig::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_max_window() {
        // 1 MiB cache, 4 KiB pages: a quarter of the cache
        assert_eq!(VfsConfig::default().max_window(), 256 * 1024);

        // Tiny cache still allows one full page
        let config = VfsConfig::default().with_cache_size(4);
        assert_eq!(config.max_window(), 4096);

        // Unvalidated page sizes never panic
        let config = VfsConfig::default().with_max_page_size(0);
        assert_eq!(config.max_window(), 256 * 1024);
        let config = VfsConfig::default().with_max_page_size(1000).with_cache_size(1);
        assert_eq!(config.max_window(), 1000);
    }
}
