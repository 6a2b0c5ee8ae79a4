//! Error types for Tapedeck Core

use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid media URI: {0}")]
    InvalidMediaUri(String),

    // Cache errors
    #[error("Cache read failed for {key}@{position}: {reason}")]
    CacheRead {
        key: String,
        position: u64,
        reason: String,
    },

    #[error("Cache write failed for {key}@{position}: {source}")]
    CacheWrite {
        key: String,
        position: u64,
        source: std::io::Error,
    },

    #[error("Cache index corrupt: {0}")]
    CacheIndex(#[from] serde_json::Error),

    // Upstream errors
    #[error("Failed to fetch {url}")]
    UpstreamFetch { url: String, source: reqwest::Error },

    #[error("Unexpected HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Requested range not satisfiable: position {position} for {url}")]
    RangeNotSatisfiable { url: String, position: u64 },

    // Engine errors
    #[error("Invalid playback state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("No media item set")]
    NoMediaItem,

    #[error("Engine released")]
    Released,

    // Internal errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CacheRead { .. }
                | Error::CacheWrite { .. }
                | Error::UpstreamFetch { .. }
        )
    }

    /// Returns true if this error originates in the cache layer
    pub fn is_cache_error(&self) -> bool {
        matches!(
            self,
            Error::CacheRead { .. } | Error::CacheWrite { .. } | Error::CacheIndex(_)
        )
    }

    /// Returns the error code used in logs and player error events
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::InvalidMediaUri(_) => "INVALID_URI",
            Error::CacheRead { .. } => "CACHE_READ",
            Error::CacheWrite { .. } => "CACHE_WRITE",
            Error::CacheIndex(_) => "CACHE_INDEX",
            Error::UpstreamFetch { .. } => "IO_NETWORK",
            Error::HttpStatus { .. } => "IO_BAD_HTTP_STATUS",
            Error::RangeNotSatisfiable { .. } => "IO_READ_POSITION_OUT_OF_RANGE",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::NoMediaItem => "NO_MEDIA_ITEM",
            Error::Released => "RELEASED",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_errors_are_recoverable() {
        let err = Error::CacheRead {
            key: "k".into(),
            position: 0,
            reason: "missing".into(),
        };
        assert!(err.is_recoverable());
        assert!(err.is_cache_error());
        assert_eq!(err.error_code(), "CACHE_READ");
    }

    #[test]
    fn test_status_error_is_fatal() {
        let err = Error::HttpStatus {
            url: "https://example.com/a.mp3".into(),
            status: 404,
        };
        assert!(!err.is_recoverable());
        assert!(!err.is_cache_error());
        assert_eq!(err.to_string(), "Unexpected HTTP status 404 for https://example.com/a.mp3");
    }
}
