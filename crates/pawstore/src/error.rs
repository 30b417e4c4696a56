//! Error types for pawstore

use std::fmt;
use std::io;

/// Result type alias for pawstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Log file could not be parsed
    Parse(String),

    /// Write would push usage past the configured quota
    QuotaExceeded {
        /// Usage the write would have produced, in bytes
        needed: u64,
        /// Configured quota, in bytes
        quota: u64,
    },

    /// Storage is closed
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::QuotaExceeded { needed, quota } => write!(
                f,
                "Quota exceeded: write needs {} bytes, quota is {} bytes",
                needed, quota
            ),
            Error::Closed => write!(f, "Storage is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Parse(format!("invalid UTF-8 in record: {}", err))
    }
}
