//! HTTP upstream

use super::{DataChunk, DataSource, DataSourceFactory, DataSpec};
use crate::types::MediaMetadata;
use crate::{Error, Result, VERSION};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(8_000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(8_000);

/// User agent sent by the demo, e.g. `TapedeckDemo/0.1.0 (linux; x86_64) tapedeck/0.1.0`
pub fn default_user_agent() -> String {
    format!(
        "TapedeckDemo/{VERSION} ({}; {}) tapedeck/{VERSION}",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Factory for [`HttpDataSource`]s sharing one client and cookie store
#[derive(Debug, Clone)]
pub struct HttpDataSourceFactory {
    user_agent: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    accept_cookies: bool,
    client: Option<Client>,
}

impl HttpDataSourceFactory {
    pub fn new() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            accept_cookies: true,
            client: None,
        }
    }

    pub fn set_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self.client = None;
        self
    }

    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.client = None;
        self
    }

    pub fn set_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self.client = None;
        self
    }

    /// Keep cookies set by the origin server and send them back on later requests
    pub fn set_accept_cookies(mut self, accept: bool) -> Self {
        self.accept_cookies = accept;
        self.client = None;
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Build the shared client now so every source reuses its connection pool
    pub fn build(mut self) -> Result<Self> {
        self.client = Some(self.build_client()?);
        Ok(self)
    }

    fn build_client(&self) -> Result<Client> {
        Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .cookie_store(self.accept_cookies)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("HTTP client: {e}")))
    }
}

impl Default for HttpDataSourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSourceFactory for HttpDataSourceFactory {
    fn create_data_source(&self) -> Result<Arc<dyn DataSource>> {
        let client = match &self.client {
            Some(client) => client.clone(),
            None => self.build_client()?,
        };
        Ok(Arc::new(HttpDataSource { client }))
    }
}

/// Reads byte ranges over HTTP
///
/// Servers that ignore `Range` answer `200` with the whole resource; the
/// source then discards bytes up to the requested position. Live streams
/// answer `200` without a length and are read from wherever they are.
#[derive(Debug, Clone)]
pub struct HttpDataSource {
    client: Client,
}

#[async_trait]
impl DataSource for HttpDataSource {
    #[instrument(skip(self), fields(uri = %spec.uri, position = spec.position, length = ?spec.length))]
    async fn read(&self, spec: &DataSpec) -> Result<DataChunk> {
        let url = spec.uri.to_string();
        let start = Instant::now();

        let mut request = self.client.get(spec.uri.clone());
        if spec.position > 0 || spec.length.is_some() {
            request = request.header(RANGE, range_header(spec.position, spec.length));
        }

        let mut response = request.send().await.map_err(|source| Error::UpstreamFetch {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(Error::RangeNotSatisfiable {
                url,
                position: spec.position,
            });
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let partial = status == StatusCode::PARTIAL_CONTENT;
        let headers = response.headers();
        let total_length = if partial {
            content_range_total(headers)
        } else {
            response.content_length()
        };
        let range_supported = partial
            || headers
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let content_type = header_string(headers, CONTENT_TYPE.as_str());
        let metadata = icy_metadata(headers);

        // An unbounded 200 is a live stream: there is no earlier content to skip
        let mut skip = if partial || total_length.is_none() {
            0
        } else {
            spec.position
        };
        let want = spec.length.unwrap_or(u64::MAX);
        let mut body = BytesMut::new();

        while (body.len() as u64) < want {
            let Some(mut chunk) = response.chunk().await.map_err(|source| Error::UpstreamFetch {
                url: url.clone(),
                source,
            })?
            else {
                break;
            };

            if skip > 0 {
                let dropped = skip.min(chunk.len() as u64);
                skip -= dropped;
                chunk = chunk.slice(dropped as usize..);
            }

            let room = (want - body.len() as u64).min(chunk.len() as u64) as usize;
            body.extend_from_slice(&chunk[..room]);
        }

        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            total_length = ?total_length,
            range_supported,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Upstream read"
        );

        Ok(DataChunk {
            bytes: Bytes::from(body),
            position: spec.position,
            total_length,
            range_supported,
            content_type,
            metadata,
            from_cache: false,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn range_header(position: u64, length: Option<u64>) -> String {
    match length {
        Some(length) if length > 0 => format!("bytes={}-{}", position, position + length - 1),
        _ => format!("bytes={position}-"),
    }
}

/// Total length from `Content-Range: bytes a-b/total`
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn icy_metadata(headers: &HeaderMap) -> MediaMetadata {
    MediaMetadata {
        title: None,
        station: header_string(headers, "icy-name"),
        genre: header_string(headers, "icy-genre"),
        description: header_string(headers, "icy-description"),
    }
}
