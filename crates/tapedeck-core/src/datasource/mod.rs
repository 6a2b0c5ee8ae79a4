//! Layered data sources
//!
//! The engine reads media through a [`DataSource`]. Sources stack: the
//! demo chain is a read-through [`CacheDataSource`] over a
//! [`DefaultDataSource`], which reads `file://` URIs locally and sends the
//! rest to an [`HttpDataSource`]. All are created from factories so the
//! engine can open fresh sources per media item.

mod cache;
mod file;
mod http;

pub use cache::{
    CacheDataSink, CacheDataSource, CacheDataSourceFactory, DEFAULT_FRAGMENT_SIZE,
    FLAG_IGNORE_CACHE_FOR_UNSET_LENGTH_REQUESTS, FLAG_IGNORE_CACHE_ON_ERROR,
};
pub use file::{DefaultDataSource, DefaultDataSourceFactory, FileDataSource};
pub use http::{default_user_agent, HttpDataSource, HttpDataSourceFactory};

use crate::types::MediaMetadata;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use url::Url;

/// Region of a resource to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpec {
    pub uri: Url,
    /// Offset of the first byte to read
    pub position: u64,
    /// Maximum number of bytes to read, `None` reads to the end
    pub length: Option<u64>,
    /// Cache key overriding the URI
    pub key: Option<String>,
}

impl DataSpec {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            position: 0,
            length: None,
            key: None,
        }
    }

    pub fn with_range(mut self, position: u64, length: Option<u64>) -> Self {
        self.position = position;
        self.length = length;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Key identifying this resource in the cache
    pub fn cache_key(&self) -> String {
        self.key.clone().unwrap_or_else(|| self.uri.to_string())
    }
}

/// Bytes returned by one read, plus what the source learned about the resource
#[derive(Debug, Clone, Default)]
pub struct DataChunk {
    pub bytes: Bytes,
    /// Offset of the first returned byte
    pub position: u64,
    /// Full length of the resource, when known
    pub total_length: Option<u64>,
    /// The source can serve arbitrary byte ranges
    pub range_supported: bool,
    pub content_type: Option<String>,
    /// Station metadata announced by the server
    pub metadata: MediaMetadata,
    /// Served from the local cache
    pub from_cache: bool,
}

impl DataChunk {
    /// An empty chunk marks the end of the resource
    pub fn is_end_of_input(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A readable source of media bytes
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Read up to `spec.length` bytes starting at `spec.position`
    async fn read(&self, spec: &DataSpec) -> Result<DataChunk>;

    /// Source name for logging
    fn name(&self) -> &'static str;
}

/// Creates data sources
pub trait DataSourceFactory: Send + Sync {
    fn create_data_source(&self) -> Result<Arc<dyn DataSource>>;
}
