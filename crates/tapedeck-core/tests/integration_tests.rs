//! Integration tests for Tapedeck Core

use std::sync::Arc;
use std::time::Duration;

use tapedeck_core::cache::INDEX_FILE_NAME;
use tapedeck_core::datasource::FLAG_IGNORE_CACHE_ON_ERROR;
use tapedeck_core::observer::LOG_TAG;
use tapedeck_core::{
    assemble, BufferPolicy, CacheProvider, Command, Commands, DataSpec, DiscontinuityReason,
    Error, EventKind, EventLogger, EvictionPolicy, Format, HeadlessEngine, HostOptions,
    MediaEngine, MediaItemTransitionReason, MediaMetadata, MediaReference, MemorySink,
    PlayWhenReadyChangeReason, PlaybackError, PlaybackParameters, PlaybackState,
    PlaybackSuppressionReason, PlayerEvent, PlayerHost, PlayerListener, PollerState,
    PositionInfo, RepeatMode, SeekParameters, Settings, Timeline, TimelineChangeReason,
    TrackGroup, TrackSelection, TrackSelectorParameters,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves a fixed body, honouring `Range: bytes=a-b`
struct RangeResponder {
    body: Vec<u8>,
    content_type: &'static str,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len();
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(start, end)| {
                let start: usize = start.parse().ok()?;
                let end: usize = if end.is_empty() { total - 1 } else { end.parse().ok()? };
                Some((start, end.min(total - 1)))
            });

        match range {
            Some((start, _)) if start >= total => ResponseTemplate::new(416),
            Some((start, end)) => ResponseTemplate::new(206)
                .insert_header("content-type", self.content_type)
                .insert_header("accept-ranges", "bytes")
                .insert_header("content-range", format!("bytes {start}-{end}/{total}").as_str())
                .set_body_bytes(self.body[start..=end].to_vec()),
            None => ResponseTemplate::new(200)
                .insert_header("content-type", self.content_type)
                .insert_header("accept-ranges", "bytes")
                .set_body_bytes(self.body.clone()),
        }
    }
}

fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn mount_media(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(RangeResponder {
            body,
            content_type: "audio/mpeg",
        })
        .mount(server)
        .await;
}

fn settings_for(uri: String) -> Settings {
    Settings {
        media_uri: uri,
        ..Default::default()
    }
}

// =============================================================================
// Cache Provider Tests
// =============================================================================

#[test]
fn test_provider_returns_same_cache() {
    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();

    let first = provider.get_cache();
    let second = provider.get_cache();
    let from_clone = provider.clone().get_cache();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &from_clone));
}

#[test]
fn test_no_eviction_never_removes_entries() {
    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let cache = provider.get_cache();

    let chunk = vec![7u8; 4096];
    for i in 0..64u64 {
        cache.write_span("https://example.com/a.mp3", i * 4096, &chunk).unwrap();
    }

    assert_eq!(cache.spans().len(), 64);
    assert_eq!(cache.total_bytes(), 64 * 4096);
    for i in 0..64u64 {
        assert!(cache
            .read_span("https://example.com/a.mp3", i * 4096, Some(4096))
            .unwrap()
            .is_some());
    }
}

#[test]
fn test_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
        provider.get_cache().write_span("k", 0, b"persisted").unwrap();
    }
    assert!(dir.path().join(INDEX_FILE_NAME).exists());

    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let bytes = provider.get_cache().read_span("k", 0, None).unwrap().unwrap();
    assert_eq!(&bytes[..], b"persisted");
}

// =============================================================================
// Buffer Policy Tests
// =============================================================================

#[test]
fn test_buffer_invariant_enforced() {
    let result = BufferPolicy::builder()
        .set_buffer_durations_ms(5_000, 60_000, 10_000, 8_000)
        .build();
    assert!(matches!(result, Err(Error::InvalidConfig(_))));

    let policy = BufferPolicy::builder()
        .set_buffer_durations_ms(5_000, 60_000, 5_000, 30_000)
        .build()
        .unwrap();
    assert!(policy.min_buffer_ms <= policy.buffer_for_playback_ms);
    assert!(policy.buffer_for_playback_ms <= policy.buffer_for_playback_after_rebuffer_ms);
    assert!(policy.buffer_for_playback_after_rebuffer_ms <= policy.max_buffer_ms);
}

// =============================================================================
// Data Source Chain Tests
// =============================================================================

#[tokio::test]
async fn test_read_through_cache_hits_upstream_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.mp3"))
        .respond_with(RangeResponder {
            body: test_body(1024),
            content_type: "audio/mpeg",
        })
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let config = assemble(&settings_for(format!("{}/a.mp3", server.uri())), provider.get_cache()).unwrap();
    let source = config.data_source_factory.create_data_source().unwrap();

    let spec = DataSpec::new(config.media.uri.clone()).with_range(100, Some(200));
    let first = source.read(&spec).await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.bytes.len(), 200);
    assert_eq!(first.total_length, Some(1024));
    assert!(first.range_supported);

    let second = source.read(&spec).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(second.content_type.as_deref(), Some("audio/mpeg"));
    assert_eq!(provider.get_cache().total_bytes(), 200);
}

#[tokio::test]
async fn test_server_ignoring_range_is_skipped_to_position() {
    let server = MockServer::start().await;
    let body = test_body(512);
    Mock::given(method("GET"))
        .and(path("/full.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let config = assemble(&settings_for(format!("{}/full.mp3", server.uri())), provider.get_cache()).unwrap();
    let source = config.data_source_factory.create_data_source().unwrap();

    let chunk = source
        .read(&DataSpec::new(config.media.uri.clone()).with_range(10, Some(20)))
        .await
        .unwrap();
    assert_eq!(&chunk.bytes[..], &body[10..30]);
    assert!(!chunk.range_supported);
}

#[tokio::test]
async fn test_icy_headers_become_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/live"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/mpeg")
                .insert_header("icy-name", "Puls Radio")
                .insert_header("icy-genre", "Pop")
                .set_body_bytes(test_body(64)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let config = assemble(&settings_for(format!("{}/live", server.uri())), provider.get_cache()).unwrap();
    let source = config.data_source_factory.create_data_source().unwrap();

    let chunk = source
        .read(&DataSpec::new(config.media.uri.clone()).with_range(0, Some(32)))
        .await
        .unwrap();
    assert_eq!(chunk.metadata.station.as_deref(), Some("Puls Radio"));
    assert_eq!(chunk.metadata.genre.as_deref(), Some("Pop"));
}

#[tokio::test]
async fn test_http_error_status_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let config = assemble(
        &settings_for(format!("{}/missing.mp3", server.uri())),
        provider.get_cache(),
    )
    .unwrap();
    let source = config.data_source_factory.create_data_source().unwrap();

    let err = source
        .read(&DataSpec::new(config.media.uri.clone()).with_range(0, Some(16)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
    assert!(provider.get_cache().spans().is_empty());
}

#[test]
fn test_assembled_chain_ignores_cache_errors() {
    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let config = assemble(&Settings::default(), provider.get_cache()).unwrap();
    assert_eq!(config.seek_parameters, SeekParameters::CLOSEST_SYNC);

    let factory = tapedeck_core::CacheDataSourceFactory::new()
        .set_cache(provider.get_cache())
        .set_flags(FLAG_IGNORE_CACHE_ON_ERROR);
    assert_eq!(factory.flags(), FLAG_IGNORE_CACHE_ON_ERROR);
}

// =============================================================================
// Event Forwarding Tests
// =============================================================================

fn position(ms: u64) -> PositionInfo {
    PositionInfo {
        window_index: 0,
        media_item: None,
        period_index: 0,
        position_ms: ms,
        content_position_ms: ms,
    }
}

/// One sample event per callback
fn sample_events() -> Vec<PlayerEvent> {
    let media = MediaReference::from_uri("https://sc6.gergosnet.com/puls00HD.mp3").unwrap();
    let format = Format {
        id: Some("0".into()),
        sample_mime_type: Some("audio/mpeg".into()),
        bitrate: Some(128_000),
        ..Default::default()
    };
    let metadata = MediaMetadata {
        station: Some("Puls".into()),
        ..Default::default()
    };

    vec![
        PlayerEvent::LoadingChanged { is_loading: true },
        PlayerEvent::IsLoadingChanged { is_loading: false },
        PlayerEvent::IsPlayingChanged { is_playing: true },
        PlayerEvent::PlaybackStateChanged {
            state: PlaybackState::Buffering,
        },
        PlayerEvent::PlayerStateChanged {
            play_when_ready: true,
            playback_state: PlaybackState::Ready,
        },
        PlayerEvent::PlayWhenReadyChanged {
            play_when_ready: false,
            reason: PlayWhenReadyChangeReason::UserRequest,
        },
        PlayerEvent::PlayerError {
            error: PlaybackError {
                code: "IO_BAD_HTTP_STATUS".into(),
                message: "HTTP 503".into(),
                recoverable: true,
            },
        },
        PlayerEvent::PositionDiscontinuity {
            old_position: position(1_000),
            new_position: position(4_096),
            reason: DiscontinuityReason::Seek,
        },
        PlayerEvent::TracksChanged {
            track_groups: vec![TrackGroup::new(vec![format.clone()])],
            track_selections: vec![TrackSelection {
                group_index: 0,
                format_index: 0,
                format,
            }],
        },
        PlayerEvent::TimelineChanged {
            timeline: Timeline::default(),
            reason: TimelineChangeReason::SourceUpdate,
        },
        PlayerEvent::MediaItemTransition {
            media_item: Some(media),
            reason: MediaItemTransitionReason::PlaylistChanged,
        },
        PlayerEvent::MediaMetadataChanged {
            metadata: metadata.clone(),
        },
        PlayerEvent::StaticMetadataChanged {
            metadata_list: vec![metadata],
        },
        PlayerEvent::AvailableCommandsChanged {
            commands: [Command::PlayPause, Command::SeekInCurrentMediaItem]
                .into_iter()
                .collect::<Commands>(),
        },
        PlayerEvent::ShuffleModeChanged { enabled: false },
        PlayerEvent::RepeatModeChanged {
            mode: RepeatMode::All,
        },
        PlayerEvent::PlaybackSuppressionReasonChanged {
            reason: PlaybackSuppressionReason::TransientAudioFocusLoss,
        },
        PlayerEvent::PlaybackParametersChanged {
            parameters: PlaybackParameters::default(),
        },
        PlayerEvent::SeekProcessed,
        PlayerEvent::SurfaceSizeChanged {
            width: 1920,
            height: 1080,
        },
    ]
}

#[test]
fn test_samples_cover_every_event_kind() {
    let kinds: Vec<EventKind> = sample_events().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, EventKind::ALL.to_vec());
}

#[test]
fn test_each_event_produces_one_log_entry_with_payload() {
    for event in sample_events() {
        let sink = Arc::new(MemorySink::new());
        let logger = EventLogger::new(sink.clone());

        logger.on_event(&event);

        let entries = sink.entries();
        assert_eq!(entries.len(), 1, "{} logged {} entries", event.name(), entries.len());
        assert_eq!(entries[0].tag, LOG_TAG);
        assert!(entries[0].message.starts_with(&format!("{}() called with: ", event.name())));
        assert!(
            entries[0].message.contains(&event.payload()),
            "{} missing payload",
            event.name()
        );
    }
}

// =============================================================================
// Player Host Tests
// =============================================================================

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_host_plays_cached_stream_and_polls_seekability() {
    let server = MockServer::start().await;
    // 16 s of media at 128 kbps
    mount_media(&server, "/puls.mp3", test_body(256 * 1024)).await;

    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let settings = Settings {
        poll_interval_ms: 50,
        ..settings_for(format!("{}/puls.mp3", server.uri()))
    };
    let config = assemble(&settings, provider.get_cache()).unwrap();

    let engine: Arc<dyn MediaEngine> = Arc::new(HeadlessEngine::new(&config));
    let sink = Arc::new(MemorySink::new());
    let host = PlayerHost::create(
        engine.clone(),
        sink.clone(),
        HostOptions {
            media: config.media.clone(),
            seek_parameters: config.seek_parameters,
            track_selector_parameters: TrackSelectorParameters::default(),
            poll_interval: settings.poll_interval(),
        },
    )
    .await
    .unwrap();

    wait_for(|| {
        let engine = engine.clone();
        async move { engine.playback_state().await == PlaybackState::Ready }
    })
    .await;
    assert!(engine.is_current_window_seekable().await);

    host.resume();
    assert_eq!(host.poller_state(), PollerState::Scheduled);
    tokio::time::sleep(Duration::from_millis(200)).await;
    host.pause();
    assert_eq!(host.poller_state(), PollerState::Stopped);

    let messages = sink.messages();
    assert!(messages
        .iter()
        .any(|m| m == "update: player.is_current_window_seekable = true"));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("onMediaItemTransition() called with: mediaItem = MediaItem(uri=")));
    assert!(messages
        .iter()
        .any(|m| m == "onPlaybackStateChanged() called with: state = STATE_READY"));
    // The collector logs timeline changes in addition to the event logger
    assert!(messages.iter().any(|m| m.contains("manifest = null")));

    let records = host.collector().records();
    assert!(!records.is_empty());
    assert!(records.windows(2).all(|w| w[0].sequence < w[1].sequence));

    host.shutdown().await;
    assert!(!provider.get_cache().spans().is_empty());
    assert_eq!(engine.playback_state().await, PlaybackState::Idle);
}

#[tokio::test]
async fn test_host_seek_emits_discontinuity() {
    let server = MockServer::start().await;
    mount_media(&server, "/seek.mp3", test_body(256 * 1024)).await;

    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let config = assemble(&settings_for(format!("{}/seek.mp3", server.uri())), provider.get_cache()).unwrap();

    let engine: Arc<dyn MediaEngine> = Arc::new(HeadlessEngine::new(&config));
    let sink = Arc::new(MemorySink::new());
    let host = PlayerHost::create(
        engine.clone(),
        sink.clone(),
        HostOptions {
            media: config.media.clone(),
            seek_parameters: SeekParameters::PREVIOUS_SYNC,
            track_selector_parameters: TrackSelectorParameters::default(),
            poll_interval: Duration::from_secs(1),
        },
    )
    .await
    .unwrap();

    wait_for(|| {
        let engine = engine.clone();
        async move { engine.is_current_window_seekable().await }
    })
    .await;

    engine.seek_to(10_000).await.unwrap();

    let seeks: Vec<PlayerEvent> = host
        .collector()
        .records()
        .into_iter()
        .map(|r| r.event)
        .filter(|e| e.kind() == EventKind::PositionDiscontinuity)
        .collect();
    assert_eq!(seeks.len(), 1);
    match &seeks[0] {
        PlayerEvent::PositionDiscontinuity { new_position, .. } => {
            // Previous sync point at a 4096 ms boundary
            assert_eq!(new_position.position_ms, 8_192);
        }
        other => panic!("unexpected event {other}"),
    }
    assert!(sink
        .messages()
        .iter()
        .any(|m| m == "onSeekProcessed() called with: "));

    host.shutdown().await;
}

#[tokio::test]
async fn test_host_rejects_unreachable_media_with_player_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down.mp3"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = CacheProvider::open(dir.path(), EvictionPolicy::NoEviction).unwrap();
    let config = assemble(&settings_for(format!("{}/down.mp3", server.uri())), provider.get_cache()).unwrap();

    let engine: Arc<dyn MediaEngine> = Arc::new(HeadlessEngine::new(&config));
    let sink = Arc::new(MemorySink::new());
    let host = PlayerHost::create(
        engine.clone(),
        sink.clone(),
        HostOptions {
            media: config.media.clone(),
            seek_parameters: config.seek_parameters,
            track_selector_parameters: TrackSelectorParameters::default(),
            poll_interval: Duration::from_secs(1),
        },
    )
    .await
    .unwrap();

    wait_for(|| {
        let sink = sink.clone();
        async move {
            sink.messages()
                .iter()
                .any(|m| m.starts_with("onPlayerError() called with: error = PlaybackException: ERROR_CODE_IO_BAD_HTTP_STATUS"))
        }
    })
    .await;
    assert_eq!(engine.playback_state().await, PlaybackState::Idle);
    assert!(!engine.is_current_window_seekable().await);

    host.shutdown().await;
}
