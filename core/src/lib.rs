// core/src/lib.rs

//! Shared definitions for the HTTP storage backend: configuration, the host
//! engine's result codes and flags, and the requests consumers send to the
//! fetch backend.

pub mod codes;
pub mod config;
pub mod message;

pub use codes::{AccessFlags, LockLevel, OpenFlags, ResultCode};
pub use config::{BackendType, OpenMethod, VfsConfig};
pub use message::{Operation, Request};
