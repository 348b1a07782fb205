// core/src/message.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data operations a consumer can ask the fetch backend for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Open,
    Access,
    Read,
    FileSize,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Open => write!(f, "xOpen"),
            Operation::Access => write!(f, "xAccess"),
            Operation::Read => write!(f, "xRead"),
            Operation::FileSize => write!(f, "xFileSize"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub op: Operation,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

impl Request {
    pub fn open(url: impl Into<String>) -> Self {
        Self::bare(Operation::Open, url)
    }

    pub fn access(url: impl Into<String>) -> Self {
        Self::bare(Operation::Access, url)
    }

    pub fn file_size(url: impl Into<String>) -> Self {
        Self::bare(Operation::FileSize, url)
    }

    pub fn read(url: impl Into<String>, offset: u64, length: usize) -> Self {
        Self {
            op: Operation::Read,
            url: url.into(),
            offset: Some(offset),
            length: Some(length),
        }
    }

    fn bare(op: Operation, url: impl Into<String>) -> Self {
        Self {
            op,
            url: url.into(),
            offset: None,
            length: None,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.offset, self.length) {
            (Some(offset), Some(length)) => {
                write!(f, "{} {} [{}:{}]", self.op, self.url, offset, length)
            }
            _ => write!(f, "{} {}", self.op, self.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_control_requests_omit_range() {
        let json = serde_json::to_string(&Request::open("http://h/db")).unwrap();
        assert_eq!(json, r#"{"op":"Open","url":"http://h/db"}"#);
    }

    #[test]
    fn test_read_request_display() {
        let request = Request::read("http://h/db", 4096, 1024);

        assert_eq!(request.to_string(), "xRead http://h/db [4096:1024]");
        assert_eq!(Request::file_size("u").to_string(), "xFileSize u");
    }
}
