//! Eviction policies for the media cache

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::SpanKey;

/// Upper bound used when the least-recently-used policy is selected without a limit, 900 MiB
pub const MAX_CACHE_BYTES: u64 = 900 * 1024 * 1024;

/// Rule governing which cached spans are removed as storage grows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Never remove anything. Disk usage grows without bound.
    #[default]
    NoEviction,
    /// Remove least recently touched spans once the total exceeds `max_bytes`
    LeastRecentlyUsed { max_bytes: u64 },
}

impl EvictionPolicy {
    pub fn build_evictor(&self) -> Box<dyn CacheEvictor> {
        match *self {
            EvictionPolicy::NoEviction => Box::new(NoOpEvictor),
            EvictionPolicy::LeastRecentlyUsed { max_bytes } => Box::new(LruEvictor::new(max_bytes)),
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::NoEviction => write!(f, "no-eviction"),
            EvictionPolicy::LeastRecentlyUsed { max_bytes } => write!(f, "lru({max_bytes} bytes)"),
        }
    }
}

/// Tracks cached spans and picks the ones to drop
///
/// The cache calls every hook while holding its lock, in the order spans are
/// added, touched and removed.
pub trait CacheEvictor: Send {
    /// A span was written
    fn on_span_added(&mut self, span: &SpanKey, length: u64);

    /// A span was read
    fn on_span_touched(&mut self, span: &SpanKey);

    /// A span was removed, by eviction or otherwise
    fn on_span_removed(&mut self, span: &SpanKey);

    /// Spans to remove so the cache fits the policy, given its current size
    fn select_for_eviction(&mut self, total_bytes: u64) -> Vec<SpanKey>;

    fn name(&self) -> &'static str;
}

/// Evictor that never removes anything
#[derive(Debug, Default)]
pub struct NoOpEvictor;

impl CacheEvictor for NoOpEvictor {
    fn on_span_added(&mut self, _span: &SpanKey, _length: u64) {}

    fn on_span_touched(&mut self, _span: &SpanKey) {}

    fn on_span_removed(&mut self, _span: &SpanKey) {}

    fn select_for_eviction(&mut self, _total_bytes: u64) -> Vec<SpanKey> {
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "no-op"
    }
}

/// Least-recently-used evictor bounded by total bytes
#[derive(Debug)]
pub struct LruEvictor {
    max_bytes: u64,
    /// Touch sequence -> span, oldest first
    order: BTreeMap<u64, SpanKey>,
    /// Span -> (touch sequence, length)
    entries: HashMap<SpanKey, (u64, u64)>,
    next_touch: u64,
}

impl LruEvictor {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            order: BTreeMap::new(),
            entries: HashMap::new(),
            next_touch: 0,
        }
    }

    fn touch(&mut self, span: &SpanKey, length: u64) {
        if let Some((seq, _)) = self.entries.remove(span) {
            self.order.remove(&seq);
        }
        let seq = self.next_touch;
        self.next_touch += 1;
        self.order.insert(seq, span.clone());
        self.entries.insert(span.clone(), (seq, length));
    }
}

impl CacheEvictor for LruEvictor {
    fn on_span_added(&mut self, span: &SpanKey, length: u64) {
        self.touch(span, length);
    }

    fn on_span_touched(&mut self, span: &SpanKey) {
        if let Some(&(_, length)) = self.entries.get(span) {
            self.touch(span, length);
        }
    }

    fn on_span_removed(&mut self, span: &SpanKey) {
        if let Some((seq, _)) = self.entries.remove(span) {
            self.order.remove(&seq);
        }
    }

    fn select_for_eviction(&mut self, total_bytes: u64) -> Vec<SpanKey> {
        let mut remaining = total_bytes;
        let mut selected = Vec::new();
        for span in self.order.values() {
            if remaining <= self.max_bytes {
                break;
            }
            if let Some(&(_, length)) = self.entries.get(span) {
                remaining = remaining.saturating_sub(length);
                selected.push(span.clone());
            }
        }
        selected
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(position: u64) -> SpanKey {
        SpanKey::new("https://example.com/a.mp3", position)
    }

    #[test]
    fn test_noop_never_selects() {
        let mut evictor = NoOpEvictor;
        for i in 0..100 {
            evictor.on_span_added(&span(i), u64::MAX / 200);
        }
        assert!(evictor.select_for_eviction(u64::MAX).is_empty());
    }

    #[test]
    fn test_lru_selects_oldest_first() {
        let mut evictor = LruEvictor::new(200);
        evictor.on_span_added(&span(0), 100);
        evictor.on_span_added(&span(100), 100);
        evictor.on_span_added(&span(200), 100);

        assert_eq!(evictor.select_for_eviction(300), vec![span(0)]);
    }

    #[test]
    fn test_lru_touch_refreshes_order() {
        let mut evictor = LruEvictor::new(200);
        evictor.on_span_added(&span(0), 100);
        evictor.on_span_added(&span(100), 100);
        evictor.on_span_added(&span(200), 100);
        evictor.on_span_touched(&span(0));

        assert_eq!(evictor.select_for_eviction(300), vec![span(100)]);
    }

    #[test]
    fn test_lru_removed_span_is_not_selected() {
        let mut evictor = LruEvictor::new(0);
        evictor.on_span_added(&span(0), 10);
        evictor.on_span_removed(&span(0));
        assert!(evictor.select_for_eviction(10).is_empty());
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&EvictionPolicy::LeastRecentlyUsed { max_bytes: 10 }).unwrap();
        assert_eq!(json, r#"{"kind":"least_recently_used","max_bytes":10}"#);
        let policy: EvictionPolicy = serde_json::from_str(r#"{"kind":"no_eviction"}"#).unwrap();
        assert_eq!(policy, EvictionPolicy::NoEviction);
    }
}
