//! On-disk media cache
//!
//! Cached media is stored as spans: contiguous byte ranges of one resource,
//! identified by the resource's cache key and the span's start position.
//! Each span lives in its own file under the cache root; the span index is
//! persisted next to them as `cached_content_index.json`.
//!
//! Spans of one resource never overlap: a write only stores the bytes that
//! are not cached yet. Which spans are dropped as the cache grows is decided
//! by a pluggable [`CacheEvictor`], selected through [`EvictionPolicy`].
//!
//! Span writes rewrite the index at most once per
//! [`INDEX_PERSIST_INTERVAL`]; [`Cache::flush`] (also run on drop) writes
//! any pending changes.

mod evictor;
mod provider;

pub use evictor::{CacheEvictor, EvictionPolicy, LruEvictor, NoOpEvictor, MAX_CACHE_BYTES};
pub use provider::{default_cache_dir, CacheProvider, DOWNLOAD_CONTENT_DIRECTORY};

use crate::types::MediaMetadata;
use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File name of the persisted span index
pub const INDEX_FILE_NAME: &str = "cached_content_index.json";

/// Minimum time between index rewrites caused by span writes
pub const INDEX_PERSIST_INTERVAL: Duration = Duration::from_secs(5);

const INDEX_VERSION: u32 = 1;

/// Identity of a cached span
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpanKey {
    pub key: String,
    pub position: u64,
}

impl SpanKey {
    pub fn new(key: impl Into<String>, position: u64) -> Self {
        Self {
            key: key.into(),
            position,
        }
    }

    /// File holding the span's bytes, relative to the cache root
    fn file_name(&self) -> String {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, self.key.as_bytes());
        format!("{}.{}.span", id.simple(), self.position)
    }
}

impl std::fmt::Display for SpanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.key, self.position)
    }
}

/// Metadata for one cached span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpan {
    #[serde(flatten)]
    pub id: SpanKey,
    pub length: u64,
    pub file_name: String,
    pub cached_at: DateTime<Utc>,
    pub last_touch: u64,
}

impl CacheSpan {
    /// Position one past the last cached byte
    pub fn end(&self) -> u64 {
        self.id.position + self.length
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.id.position && position < self.end()
    }
}

/// Per-resource facts learned from upstream, kept with the cached spans
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Full length of the resource, when upstream reported it
    pub length: Option<u64>,
    /// Upstream honours byte-range requests
    pub range_supported: bool,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: MediaMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheIndex {
    version: u32,
    spans: Vec<CacheSpan>,
    #[serde(default)]
    resources: BTreeMap<String, ContentMetadata>,
}

struct Inner {
    spans: BTreeMap<SpanKey, CacheSpan>,
    resources: BTreeMap<String, ContentMetadata>,
    evictor: Box<dyn CacheEvictor>,
    total_bytes: u64,
    next_touch: u64,
    /// The in-memory index differs from the file
    dirty: bool,
    last_persist: Option<Instant>,
}

/// Disk-backed span cache, shared by reference between data sources
pub struct Cache {
    root: PathBuf,
    policy: EvictionPolicy,
    inner: Mutex<Inner>,
}

impl Cache {
    /// Open (or create) a cache rooted at `root`
    pub fn open(root: impl Into<PathBuf>, policy: EvictionPolicy) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut evictor = policy.build_evictor();
        let mut spans = BTreeMap::new();

        let (loaded, resources) = load_index(&root);
        for span in loaded {
            let path = root.join(&span.file_name);
            match fs::metadata(&path) {
                Ok(meta) if meta.len() == span.length => {
                    spans.insert(span.id.clone(), span);
                }
                _ => {
                    warn!(span = %span.id, "Dropping cache span with missing or truncated file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        for id in overlapping_spans(&spans) {
            if let Some(span) = spans.remove(&id) {
                warn!(span = %id, "Dropping cache span overlapping an earlier one");
                let _ = fs::remove_file(root.join(&span.file_name));
            }
        }

        let mut by_touch: Vec<&CacheSpan> = spans.values().collect();
        by_touch.sort_by_key(|span| span.last_touch);
        for span in by_touch {
            evictor.on_span_added(&span.id, span.length);
        }
        let total_bytes: u64 = spans.values().map(|span| span.length).sum();
        let next_touch = spans
            .values()
            .map(|span| span.last_touch + 1)
            .max()
            .unwrap_or(0);

        info!(
            root = %root.display(),
            policy = %policy,
            evictor = evictor.name(),
            spans = spans.len(),
            total_bytes,
            "Cache opened"
        );

        Ok(Self {
            root,
            policy,
            inner: Mutex::new(Inner {
                spans,
                resources,
                evictor,
                total_bytes,
                next_touch,
                dirty: false,
                last_persist: None,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Read up to `length` cached bytes of `key` starting at `position`
    ///
    /// Returns `Ok(None)` when no span covers `position`. The returned bytes
    /// may be shorter than `length` when the covering span ends first.
    pub fn read_span(&self, key: &str, position: u64, length: Option<u64>) -> Result<Option<Bytes>> {
        let mut inner = self.lock();

        let Some(span) = covering_span(&inner.spans, key, position).cloned() else {
            return Ok(None);
        };

        let path = self.root.join(&span.file_name);
        let data = match fs::read(&path) {
            Ok(data) if data.len() as u64 == span.length => data,
            Ok(data) => {
                self.drop_span(&mut inner, &span.id);
                return Err(Error::CacheRead {
                    key: key.to_string(),
                    position,
                    reason: format!("span holds {} bytes, index says {}", data.len(), span.length),
                });
            }
            Err(e) => {
                self.drop_span(&mut inner, &span.id);
                return Err(Error::CacheRead {
                    key: key.to_string(),
                    position,
                    reason: e.to_string(),
                });
            }
        };

        let touch = inner.next_touch;
        inner.next_touch += 1;
        if let Some(entry) = inner.spans.get_mut(&span.id) {
            entry.last_touch = touch;
        }
        inner.evictor.on_span_touched(&span.id);
        inner.dirty = true;

        let offset = (position - span.id.position) as usize;
        let available = data.len() - offset;
        let take = length.map_or(available, |l| available.min(l as usize));
        let bytes = Bytes::from(data).slice(offset..offset + take);

        debug!(key, position, bytes = bytes.len(), "Cache hit");
        Ok(Some(bytes))
    }

    /// Cache `data` as the bytes of `key` starting at `position`
    ///
    /// Ranges already cached are kept as they are; only the uncovered parts
    /// of `data` are stored, each as its own span.
    pub fn write_span(&self, key: &str, position: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = position + data.len() as u64;
        let mut inner = self.lock();
        let gaps = uncovered_ranges(&inner.spans, key, position, end);
        if gaps.is_empty() {
            debug!(key, position, length = data.len(), "Range already cached");
            return Ok(());
        }

        let mut written = 0;
        for &(start, stop) in &gaps {
            let slice = &data[(start - position) as usize..(stop - position) as usize];
            self.insert_span(&mut inner, key, start, slice)?;
            written += slice.len();
        }

        let total = inner.total_bytes;
        let victims = inner.evictor.select_for_eviction(total);
        for victim in &victims {
            debug!(span = %victim, "Evicting cache span");
            self.drop_span(&mut inner, victim);
        }

        debug!(
            key,
            position,
            written,
            spans = gaps.len(),
            total_bytes = inner.total_bytes,
            evicted = victims.len(),
            "Cache span written"
        );

        self.persist_deferred(&mut inner)
    }

    /// Write any index changes not yet on disk
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.dirty {
            self.persist(&mut inner)?;
        }
        Ok(())
    }

    /// Facts about `key` recorded by an earlier upstream read
    pub fn content_metadata(&self, key: &str) -> Option<ContentMetadata> {
        self.lock().resources.get(key).cloned()
    }

    /// Record facts about `key`; persisted only when they change
    pub fn set_content_metadata(&self, key: &str, metadata: ContentMetadata) -> Result<()> {
        let mut inner = self.lock();
        if inner.resources.get(key) == Some(&metadata) {
            return Ok(());
        }
        inner.resources.insert(key.to_string(), metadata);
        self.persist(&mut inner)
    }

    /// Remove every span of `key`
    pub fn remove_key(&self, key: &str) -> Result<usize> {
        let mut inner = self.lock();
        inner.resources.remove(key);
        let ids: Vec<SpanKey> = inner
            .spans
            .keys()
            .filter(|id| id.key == key)
            .cloned()
            .collect();
        for id in &ids {
            self.drop_span(&mut inner, id);
        }
        self.persist(&mut inner)?;
        Ok(ids.len())
    }

    /// Remove every span
    pub fn clear(&self) -> Result<usize> {
        let mut inner = self.lock();
        inner.resources.clear();
        let ids: Vec<SpanKey> = inner.spans.keys().cloned().collect();
        for id in &ids {
            self.drop_span(&mut inner, id);
        }
        self.persist(&mut inner)?;
        info!(removed = ids.len(), "Cache cleared");
        Ok(ids.len())
    }

    /// Snapshot of all cached spans, ordered by key then position
    pub fn spans(&self) -> Vec<CacheSpan> {
        self.lock().spans.values().cloned().collect()
    }

    /// Total number of cached bytes
    pub fn total_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    /// Number of contiguous bytes of `key` cached from `position`
    pub fn cached_length(&self, key: &str, position: u64) -> u64 {
        let inner = self.lock();
        let mut cursor = position;
        while let Some(span) = covering_span(&inner.spans, key, cursor) {
            cursor = span.end();
        }
        cursor - position
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_span(&self, inner: &mut Inner, key: &str, position: u64, data: &[u8]) -> Result<()> {
        let id = SpanKey::new(key, position);
        let file_name = id.file_name();
        fs::write(self.root.join(&file_name), data).map_err(|source| Error::CacheWrite {
            key: key.to_string(),
            position,
            source,
        })?;

        let touch = inner.next_touch;
        inner.next_touch += 1;
        let length = data.len() as u64;
        inner.spans.insert(
            id.clone(),
            CacheSpan {
                id: id.clone(),
                length,
                file_name,
                cached_at: Utc::now(),
                last_touch: touch,
            },
        );
        inner.total_bytes += length;
        inner.evictor.on_span_added(&id, length);
        inner.dirty = true;
        Ok(())
    }

    fn drop_span(&self, inner: &mut Inner, id: &SpanKey) {
        if let Some(span) = inner.spans.remove(id) {
            inner.dirty = true;
            inner.total_bytes -= span.length;
            inner.evictor.on_span_removed(id);
            if let Err(e) = fs::remove_file(self.root.join(&span.file_name)) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(span = %id, error = %e, "Failed to delete cache span file");
                }
            }
        }
    }

    /// Persist unless the index was written less than
    /// [`INDEX_PERSIST_INTERVAL`] ago
    fn persist_deferred(&self, inner: &mut Inner) -> Result<()> {
        let due = inner
            .last_persist
            .map_or(true, |at| at.elapsed() >= INDEX_PERSIST_INTERVAL);
        if due {
            self.persist(inner)
        } else {
            Ok(())
        }
    }

    fn persist(&self, inner: &mut Inner) -> Result<()> {
        let index = CacheIndex {
            version: INDEX_VERSION,
            spans: inner.spans.values().cloned().collect(),
            resources: inner.resources.clone(),
        };
        let json = serde_json::to_vec_pretty(&index)?;
        let tmp = self.root.join(format!("{INDEX_FILE_NAME}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.root.join(INDEX_FILE_NAME))?;
        inner.dirty = false;
        inner.last_persist = Some(Instant::now());
        Ok(())
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(root = %self.root.display(), error = %e, "Failed to write cache index");
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn covering_span<'a>(
    spans: &'a BTreeMap<SpanKey, CacheSpan>,
    key: &str,
    position: u64,
) -> Option<&'a CacheSpan> {
    let upper = SpanKey::new(key, position);
    spans
        .range(..=upper)
        .next_back()
        .map(|(_, span)| span)
        .filter(|span| span.id.key == key && span.contains(position))
}

/// Parts of `start..end` of `key` not covered by any span, in order
fn uncovered_ranges(
    spans: &BTreeMap<SpanKey, CacheSpan>,
    key: &str,
    start: u64,
    end: u64,
) -> Vec<(u64, u64)> {
    let mut cursor = covering_span(spans, key, start).map_or(start, |span| span.end());
    let mut gaps = Vec::new();
    let following = spans.range(SpanKey::new(key, start)..SpanKey::new(key, end));
    for span in following.map(|(_, span)| span) {
        if span.id.position > cursor {
            gaps.push((cursor, span.id.position));
        }
        cursor = cursor.max(span.end());
    }
    if cursor < end {
        gaps.push((cursor, end));
    }
    gaps
}

/// Spans starting inside an earlier span of the same key
fn overlapping_spans(spans: &BTreeMap<SpanKey, CacheSpan>) -> Vec<SpanKey> {
    let mut overlapping = Vec::new();
    let mut previous: Option<&CacheSpan> = None;
    for span in spans.values() {
        match previous {
            Some(prev) if prev.id.key == span.id.key && span.id.position < prev.end() => {
                overlapping.push(span.id.clone());
            }
            _ => previous = Some(span),
        }
    }
    overlapping
}

fn load_index(root: &Path) -> (Vec<CacheSpan>, BTreeMap<String, ContentMetadata>) {
    let path = root.join(INDEX_FILE_NAME);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Default::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable cache index, starting empty");
            return Default::default();
        }
    };
    match serde_json::from_slice::<CacheIndex>(&data) {
        Ok(index) if index.version == INDEX_VERSION => (index.spans, index.resources),
        Ok(index) => {
            warn!(version = index.version, "Unsupported cache index version, starting empty");
            Default::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt cache index, starting empty");
            Default::default()
        }
    }
}
