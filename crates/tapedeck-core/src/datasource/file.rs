//! Local file source and scheme routing

use super::{DataChunk, DataSource, DataSourceFactory, DataSpec};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, instrument};

/// Reads byte ranges of `file://` URIs
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDataSource;

#[async_trait]
impl DataSource for FileDataSource {
    #[instrument(skip(self), fields(uri = %spec.uri, position = spec.position, length = ?spec.length))]
    async fn read(&self, spec: &DataSpec) -> Result<DataChunk> {
        let path = spec
            .uri
            .to_file_path()
            .map_err(|_| Error::InvalidMediaUri(format!("not a local path: {}", spec.uri)))?;

        let mut file = tokio::fs::File::open(&path).await?;
        let total = file.metadata().await?.len();
        if spec.position > total {
            return Err(Error::RangeNotSatisfiable {
                url: spec.uri.to_string(),
                position: spec.position,
            });
        }

        let available = total - spec.position;
        let length = spec.length.map_or(available, |l| l.min(available));
        let mut buf = vec![0u8; length as usize];
        file.seek(SeekFrom::Start(spec.position)).await?;
        file.read_exact(&mut buf).await?;

        debug!(path = %path.display(), bytes = buf.len(), total, "File read");
        Ok(DataChunk {
            bytes: Bytes::from(buf),
            position: spec.position,
            total_length: Some(total),
            range_supported: true,
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Sends `file` URIs to a [`FileDataSource`] and everything else upstream
pub struct DefaultDataSource {
    file: FileDataSource,
    upstream: Arc<dyn DataSource>,
}

impl DefaultDataSource {
    pub fn new(upstream: Arc<dyn DataSource>) -> Self {
        Self {
            file: FileDataSource,
            upstream,
        }
    }
}

#[async_trait]
impl DataSource for DefaultDataSource {
    async fn read(&self, spec: &DataSpec) -> Result<DataChunk> {
        match spec.uri.scheme() {
            "file" => self.file.read(spec).await,
            _ => self.upstream.read(spec).await,
        }
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Builds [`DefaultDataSource`]s over an upstream network factory
#[derive(Clone)]
pub struct DefaultDataSourceFactory {
    upstream: Arc<dyn DataSourceFactory>,
}

impl DefaultDataSourceFactory {
    pub fn new(upstream: Arc<dyn DataSourceFactory>) -> Self {
        Self { upstream }
    }
}

impl DataSourceFactory for DefaultDataSourceFactory {
    fn create_data_source(&self) -> Result<Arc<dyn DataSource>> {
        Ok(Arc::new(DefaultDataSource::new(
            self.upstream.create_data_source()?,
        )))
    }
}
