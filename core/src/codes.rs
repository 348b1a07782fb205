// core/src/codes.rs

//! Result codes and flags of the host engine's storage interface.
//!
//! Values match the engine's C API so they can be handed back unchanged.

use std::fmt;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok = 0,
    Error = 1,
    ReadOnly = 8,
    IoErr = 10,
    NotFound = 12,
    CantOpen = 14,
    TooBig = 18,
    /// Read hit end of file; the rest of the buffer was zero-filled.
    IoErrShortRead = 10 | (2 << 8),
}

impl ResultCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultCode::Ok => "SQLITE_OK",
            ResultCode::Error => "SQLITE_ERROR",
            ResultCode::ReadOnly => "SQLITE_READONLY",
            ResultCode::IoErr => "SQLITE_IOERR",
            ResultCode::NotFound => "SQLITE_NOTFOUND",
            ResultCode::CantOpen => "SQLITE_CANTOPEN",
            ResultCode::TooBig => "SQLITE_TOOBIG",
            ResultCode::IoErrShortRead => "SQLITE_IOERR_SHORT_READ",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Flags passed to and returned from `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub i32);

impl OpenFlags {
    pub const READONLY: OpenFlags = OpenFlags(0x0000_0001);
    pub const READWRITE: OpenFlags = OpenFlags(0x0000_0002);
    pub const CREATE: OpenFlags = OpenFlags(0x0000_0004);
    pub const MAIN_DB: OpenFlags = OpenFlags(0x0000_0100);

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Question asked by `access`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFlags {
    Exists = 0,
    ReadWrite = 1,
    Read = 2,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    None = 0,
    Shared = 1,
    Reserved = 2,
    Pending = 3,
    Exclusive = 4,
}

/// Device characteristic: the file never changes while open.
pub const IOCAP_IMMUTABLE: i32 = 0x0000_2000;

/// `file_control` opcode sent before a sync.
pub const FCNTL_SYNC: i32 = 21;

/// Longest pathname (URL) the storage interface accepts.
pub const MAX_PATHNAME: usize = 1024;

/// Julian day number of the Unix epoch.
const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Current time as a Julian day number.
pub fn julian_day_now() -> f64 {
    UNIX_EPOCH_JULIAN_DAY + chrono::Utc::now().timestamp_millis() as f64 / MILLIS_PER_DAY
}

/// Current time as milliseconds since the Julian epoch.
pub fn julian_millis_now() -> i64 {
    (UNIX_EPOCH_JULIAN_DAY * MILLIS_PER_DAY) as i64 + chrono::Utc::now().timestamp_millis()
}
