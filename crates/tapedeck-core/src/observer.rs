//! Event observation
//!
//! Captures engine events for:
//! - Log lines, one per event ([`EventLogger`])
//! - Stamped analytics records with fan-out to listeners ([`AnalyticsCollector`])

use crate::events::{EventKind, PlayerEvent, PlayerListener};
use crate::types::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// Tag attached to every event log line
pub const LOG_TAG: &str = "TEST";

/// Tracing target for event log lines
pub const EVENT_TARGET: &str = "tapedeck::events";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Destination for tagged log lines
pub trait LogSink: Send + Sync {
    fn write(&self, tag: &str, message: &str);
}

/// Forwards log lines to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, tag: &str, message: &str) {
        info!(target: EVENT_TARGET, tag, "{message}");
    }
}

/// A line captured by [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub tag: String,
    pub message: String,
}

/// Keeps log lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.entries).iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, tag: &str, message: &str) {
        lock(&self.entries).push(LogEntry {
            tag: tag.to_string(),
            message: message.to_string(),
        });
    }
}

/// Writes one line per event: `<name>() called with: <payload>`
#[derive(Clone)]
pub struct EventLogger {
    sink: Arc<dyn LogSink>,
}

impl EventLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Logger writing through `tracing`
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    pub fn format(event: &PlayerEvent) -> String {
        format!("{}() called with: {}", event.name(), event.payload())
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::tracing()
    }
}

impl PlayerListener for EventLogger {
    fn on_event(&self, event: &PlayerEvent) {
        self.sink.write(LOG_TAG, &Self::format(event));
    }
}

/// Event with collection metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEventRecord {
    /// Unique event ID
    pub id: Uuid,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    /// Sequence number, starting at 1
    pub sequence: u64,
    #[serde(flatten)]
    pub event: PlayerEvent,
}

impl AnalyticsEventRecord {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// Handle returned by [`AnalyticsCollector::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Default number of records kept
pub const DEFAULT_MAX_HISTORY: usize = 256;

/// Stamps engine events and fans them out to registered listeners
///
/// Registered with the engine as a listener itself. Timeline changes are
/// also logged by the collector, with the manifest slot the engine never
/// fills.
pub struct AnalyticsCollector {
    session_id: SessionId,
    sequence: AtomicU64,
    next_listener: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn PlayerListener>)>>,
    history: Mutex<VecDeque<AnalyticsEventRecord>>,
    max_history: usize,
    sink: Arc<dyn LogSink>,
}

impl AnalyticsCollector {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self::with_max_history(sink, DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(sink: Arc<dyn LogSink>, max_history: usize) -> Self {
        Self {
            session_id: SessionId::new(),
            sequence: AtomicU64::new(0),
            next_listener: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(max_history.min(DEFAULT_MAX_HISTORY))),
            max_history,
            sink,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn add_listener(&self, listener: Arc<dyn PlayerListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, listener));
        debug!(listener = id.0, "Analytics listener added");
        id
    }

    /// Returns false when `id` was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Records kept so far, oldest first
    pub fn records(&self) -> Vec<AnalyticsEventRecord> {
        lock(&self.history).iter().cloned().collect()
    }

    pub fn clear(&self) {
        lock(&self.history).clear();
    }

    /// Drop all listeners and history
    pub fn release(&self) {
        lock(&self.listeners).clear();
        self.clear();
        debug!(session_id = %self.session_id, "Analytics collector released");
    }

    fn record(&self, event: &PlayerEvent) -> AnalyticsEventRecord {
        let record = AnalyticsEventRecord {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            timestamp: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            event: event.clone(),
        };

        if self.max_history > 0 {
            let mut history = lock(&self.history);
            if history.len() >= self.max_history {
                history.pop_front();
            }
            history.push_back(record.clone());
        }
        record
    }
}

impl PlayerListener for AnalyticsCollector {
    fn on_event(&self, event: &PlayerEvent) {
        let record = self.record(event);
        debug!(
            event_id = %record.id,
            sequence = record.sequence,
            kind = %record.kind(),
            "Analytics event"
        );

        if let PlayerEvent::TimelineChanged { timeline, reason } = event {
            self.sink.write(
                LOG_TAG,
                &format!(
                    "onTimelineChanged() called with: timeline = {timeline}, manifest = null, reason = {reason}"
                ),
            );
        }

        // Listeners may add or remove listeners, so call them unlocked
        let listeners: Vec<Arc<dyn PlayerListener>> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlaybackState, Timeline, TimelineChangeReason};

    #[test]
    fn test_event_logger_line() {
        let sink = Arc::new(MemorySink::new());
        let logger = EventLogger::new(sink.clone());

        logger.on_event(&PlayerEvent::PlaybackStateChanged {
            state: PlaybackState::Ready,
        });

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tag, LOG_TAG);
        assert_eq!(
            entries[0].message,
            "onPlaybackStateChanged() called with: state = STATE_READY"
        );
    }

    #[test]
    fn test_collector_stamps_records() {
        let collector = AnalyticsCollector::new(Arc::new(MemorySink::new()));
        collector.on_event(&PlayerEvent::IsLoadingChanged { is_loading: true });
        collector.on_event(&PlayerEvent::IsPlayingChanged { is_playing: true });

        let records = collector.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[1].sequence, 2);
        assert_eq!(records[1].kind(), EventKind::IsPlayingChanged);
        assert!(records.iter().all(|r| r.session_id == collector.session_id()));
        assert_ne!(records[0].id, records[1].id);
    }

    #[test]
    fn test_collector_history_is_bounded() {
        let collector = AnalyticsCollector::with_max_history(Arc::new(MemorySink::new()), 3);
        for _ in 0..5 {
            collector.on_event(&PlayerEvent::SeekProcessed);
        }
        let sequences: Vec<u64> = collector.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[test]
    fn test_collector_fans_out_until_removed() {
        let collector = AnalyticsCollector::new(Arc::new(MemorySink::new()));
        let sink = Arc::new(MemorySink::new());
        let id = collector.add_listener(Arc::new(EventLogger::new(sink.clone())));

        collector.on_event(&PlayerEvent::SeekProcessed);
        assert_eq!(sink.len(), 1);

        assert!(collector.remove_listener(id));
        assert!(!collector.remove_listener(id));
        collector.on_event(&PlayerEvent::SeekProcessed);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_collector_logs_timeline_changes() {
        let sink = Arc::new(MemorySink::new());
        let collector = AnalyticsCollector::new(sink.clone());

        collector.on_event(&PlayerEvent::TimelineChanged {
            timeline: Timeline::default(),
            reason: TimelineChangeReason::PlaylistChanged,
        });
        collector.on_event(&PlayerEvent::SeekProcessed);

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("manifest = null"));
        assert!(messages[0].contains("PLAYLIST_CHANGED"));
    }

    #[test]
    fn test_record_serializes_flat() {
        let collector = AnalyticsCollector::new(Arc::new(MemorySink::new()));
        collector.on_event(&PlayerEvent::ShuffleModeChanged { enabled: false });
        let json = serde_json::to_value(&collector.records()[0]).unwrap();
        assert_eq!(json["event"], "shuffle_mode_changed");
        assert_eq!(json["sequence"], 1);
    }
}
