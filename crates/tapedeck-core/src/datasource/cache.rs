//! Read-through cache over an upstream source

use super::{DataChunk, DataSource, DataSourceFactory, DataSpec};
use crate::cache::{Cache, ContentMetadata};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fall back to upstream when the cache fails, and stop using the cache
/// for the rest of the source's life.
pub const FLAG_IGNORE_CACHE_ON_ERROR: u32 = 1 << 1;

/// Go straight to upstream for requests without a length.
pub const FLAG_IGNORE_CACHE_FOR_UNSET_LENGTH_REQUESTS: u32 = 1 << 2;

/// Largest span written in one piece, 5 MiB
pub const DEFAULT_FRAGMENT_SIZE: u64 = 5 * 1024 * 1024;

/// Writes upstream bytes into the cache, split into fragments
#[derive(Debug, Clone)]
pub struct CacheDataSink {
    cache: Arc<Cache>,
    fragment_size: u64,
}

impl CacheDataSink {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self {
            cache,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
        }
    }

    pub fn with_fragment_size(mut self, fragment_size: u64) -> Self {
        self.fragment_size = fragment_size.max(1);
        self
    }

    /// Store `data` for `key` starting at `position`
    pub fn write(&self, key: &str, position: u64, data: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        for fragment in data.chunks(self.fragment_size as usize) {
            self.cache.write_span(key, position + offset as u64, fragment)?;
            offset += fragment.len();
        }
        Ok(())
    }
}

/// Builds [`CacheDataSource`]s over an upstream factory
#[derive(Clone, Default)]
pub struct CacheDataSourceFactory {
    cache: Option<Arc<Cache>>,
    upstream: Option<Arc<dyn DataSourceFactory>>,
    sink: Option<CacheDataSink>,
    flags: u32,
}

impl CacheDataSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn set_upstream_data_source_factory(mut self, upstream: Arc<dyn DataSourceFactory>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Sink used to write upstream bytes into the cache. `None` makes the cache read-only.
    pub fn set_cache_write_data_sink(mut self, sink: Option<CacheDataSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn set_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }
}

impl std::fmt::Debug for CacheDataSourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDataSourceFactory")
            .field("cache", &self.cache)
            .field("has_upstream", &self.upstream.is_some())
            .field("sink", &self.sink)
            .field("flags", &self.flags)
            .finish()
    }
}

impl DataSourceFactory for CacheDataSourceFactory {
    fn create_data_source(&self) -> Result<Arc<dyn DataSource>> {
        let cache = self
            .cache
            .clone()
            .ok_or_else(|| Error::InvalidConfig("cache data source needs a cache".to_string()))?;
        let upstream = self
            .upstream
            .as_ref()
            .ok_or_else(|| {
                Error::InvalidConfig("cache data source needs an upstream factory".to_string())
            })?
            .create_data_source()?;
        Ok(Arc::new(CacheDataSource::new(
            cache,
            upstream,
            self.sink.clone(),
            self.flags,
        )))
    }
}

/// Serves cached bytes when present, otherwise reads upstream and stores
/// the result through the sink.
pub struct CacheDataSource {
    cache: Arc<Cache>,
    upstream: Arc<dyn DataSource>,
    sink: Option<CacheDataSink>,
    flags: u32,
    bypass_cache: AtomicBool,
}

impl CacheDataSource {
    pub fn new(
        cache: Arc<Cache>,
        upstream: Arc<dyn DataSource>,
        sink: Option<CacheDataSink>,
        flags: u32,
    ) -> Self {
        Self {
            cache,
            upstream,
            sink,
            flags,
            bypass_cache: AtomicBool::new(false),
        }
    }

    /// Whether a cache error has switched this source to upstream only
    pub fn is_bypassing_cache(&self) -> bool {
        self.bypass_cache.load(Ordering::Relaxed)
    }

    fn ignore_cache_on_error(&self) -> bool {
        self.flags & FLAG_IGNORE_CACHE_ON_ERROR != 0
    }

    /// Swallow `err` when the flag allows it, bypassing the cache from now on
    fn handle_cache_error(&self, err: Error) -> Result<()> {
        if self.ignore_cache_on_error() {
            warn!(error = %err, "Cache error, falling back to upstream");
            self.bypass_cache.store(true, Ordering::Relaxed);
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl DataSource for CacheDataSource {
    async fn read(&self, spec: &DataSpec) -> Result<DataChunk> {
        let key = spec.cache_key();
        let skip_cache = self.is_bypassing_cache()
            || (spec.length.is_none()
                && self.flags & FLAG_IGNORE_CACHE_FOR_UNSET_LENGTH_REQUESTS != 0);

        if !skip_cache {
            match self.cache.read_span(&key, spec.position, spec.length) {
                Ok(Some(bytes)) => {
                    let content = self.cache.content_metadata(&key).unwrap_or_default();
                    return Ok(DataChunk {
                        bytes,
                        position: spec.position,
                        total_length: content.length,
                        range_supported: content.range_supported,
                        content_type: content.content_type,
                        metadata: content.metadata,
                        from_cache: true,
                    });
                }
                Ok(None) => {}
                Err(err) => self.handle_cache_error(err)?,
            }
        }

        let chunk = self.upstream.read(spec).await?;
        debug!(
            key = %key,
            position = spec.position,
            bytes = chunk.len(),
            upstream = self.upstream.name(),
            "Cache miss served upstream"
        );

        if !self.is_bypassing_cache() {
            let content = ContentMetadata {
                length: chunk.total_length,
                range_supported: chunk.range_supported,
                content_type: chunk.content_type.clone(),
                metadata: chunk.metadata.clone(),
            };
            if let Err(err) = self.cache.set_content_metadata(&key, content) {
                self.handle_cache_error(err)?;
            }
        }

        if let Some(sink) = &self.sink {
            if !self.is_bypassing_cache() && !chunk.is_empty() {
                if let Err(err) = sink.write(&key, spec.position, &chunk.bytes) {
                    self.handle_cache_error(err)?;
                }
            }
        }

        Ok(chunk)
    }

    fn name(&self) -> &'static str {
        "cache"
    }
}
