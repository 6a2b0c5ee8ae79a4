//! Media engine
//!
//! Coordinates:
//! - Chunked loading through the data source chain under the buffer policy
//! - Playback clock and state machine transitions
//! - Track selection and seekability of the current window
//! - Event emission to registered listeners

use crate::assembler::EngineConfig;
use crate::buffer::{BufferPolicy, LoadController};
use crate::datasource::{DataChunk, DataSource, DataSourceFactory, DataSpec};
use crate::events::{PlayerEvent, PlayerListener};
use crate::extractor::{Container, ExtractorFlags};
use crate::seek::SeekParameters;
use crate::track::{single_format_group, BandwidthMeter, DefaultTrackSelector, TrackSelectorParameters};
use crate::types::*;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Idle wait between loop iterations when nothing needs loading
const IDLE_TICK: Duration = Duration::from_millis(50);

/// Playback engine driven by the demo
#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn PlayerListener>);

    /// Replace the current media item; the engine returns to idle
    async fn set_media_item(&self, media: MediaReference) -> Result<()>;

    /// Start loading the current media item
    async fn prepare(&self) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn seek_to(&self, position_ms: u64) -> Result<()>;

    async fn set_seek_parameters(&self, parameters: SeekParameters);

    async fn set_track_selector_parameters(&self, parameters: TrackSelectorParameters);

    async fn playback_state(&self) -> PlaybackState;

    async fn is_current_window_seekable(&self) -> bool;

    async fn current_position_ms(&self) -> u64;

    /// Stop loading and drop all listeners; the engine cannot be reused
    async fn release(&self);
}

/// What the first response revealed about the media
#[derive(Debug, Clone)]
struct ContentInfo {
    total_length: Option<u64>,
    range_supported: bool,
    container: Container,
    bitrate: u32,
    seekable: bool,
}

impl ContentInfo {
    fn bytes_to_ms(&self, bytes: u64) -> u64 {
        bytes.saturating_mul(8_000) / u64::from(self.bitrate.max(1))
    }

    fn ms_to_bytes(&self, ms: u64) -> u64 {
        ms.saturating_mul(u64::from(self.bitrate)) / 8_000
    }

    fn duration_ms(&self) -> Option<u64> {
        self.total_length.map(|len| self.bytes_to_ms(len))
    }
}

struct EngineState {
    media: Option<MediaReference>,
    playback_state: PlaybackState,
    play_when_ready: bool,
    is_playing: bool,
    is_loading: bool,
    rebuffering: bool,
    released: bool,
    content: Option<ContentInfo>,
    load: LoadController,
    selector: DefaultTrackSelector,
    seek_parameters: SeekParameters,
    /// Next byte to fetch
    read_position: u64,
    end_of_input: bool,
    position_ms: u64,
    /// When `position_ms` was last advanced, while playing
    clock_anchor: Option<Instant>,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            media: None,
            playback_state: PlaybackState::Idle,
            play_when_ready: false,
            is_playing: false,
            is_loading: false,
            rebuffering: false,
            released: false,
            content: None,
            load: LoadController::new(config.buffer_policy.clone()),
            selector: DefaultTrackSelector::new(config.track_selector_parameters.clone()),
            seek_parameters: config.seek_parameters,
            read_position: 0,
            end_of_input: false,
            position_ms: 0,
            clock_anchor: None,
        }
    }

    fn buffered_until_ms(&self) -> u64 {
        self.content
            .as_ref()
            .map_or(0, |c| c.bytes_to_ms(self.read_position))
    }

    fn buffered_ahead(&self) -> (u64, usize) {
        match &self.content {
            Some(content) => {
                let ms = self.buffered_until_ms().saturating_sub(self.position_ms);
                let played = content.ms_to_bytes(self.position_ms);
                (ms, self.read_position.saturating_sub(played) as usize)
            }
            None => (0, 0),
        }
    }

    /// Position the clock would report now, without moving it
    fn position_at(&self, now: Instant) -> u64 {
        let elapsed = self
            .clock_anchor
            .map_or(0, |anchor| now.saturating_duration_since(anchor).as_millis() as u64);
        (self.position_ms + elapsed).min(self.clock_limit_ms())
    }

    fn clock_limit_ms(&self) -> u64 {
        match &self.content {
            Some(_) => self.buffered_until_ms(),
            None => self.position_ms,
        }
    }

    fn advance_clock(&mut self, now: Instant) {
        if let Some(anchor) = self.clock_anchor {
            let elapsed = now.saturating_duration_since(anchor).as_millis() as u64;
            self.position_ms = (self.position_ms + elapsed).min(self.clock_limit_ms());
            self.clock_anchor = Some(anchor + Duration::from_millis(elapsed));
        }
    }

    fn position_info(&self) -> PositionInfo {
        PositionInfo {
            window_index: 0,
            media_item: self.media.clone(),
            period_index: 0,
            position_ms: self.position_ms,
            content_position_ms: self.position_ms,
        }
    }

    fn transition(&mut self, to: PlaybackState, events: &mut Vec<PlayerEvent>) -> Result<()> {
        let from = self.playback_state;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.playback_state = to;
        info!(from = %from, to = %to, "State transition");
        events.push(PlayerEvent::PlaybackStateChanged { state: to });
        events.push(PlayerEvent::PlayerStateChanged {
            play_when_ready: self.play_when_ready,
            playback_state: to,
        });
        self.update_is_playing(events);
        Ok(())
    }

    fn update_is_playing(&mut self, events: &mut Vec<PlayerEvent>) {
        let playing = self.play_when_ready && self.playback_state == PlaybackState::Ready;
        if playing == self.is_playing {
            return;
        }
        self.advance_clock(Instant::now());
        self.is_playing = playing;
        self.clock_anchor = playing.then(Instant::now);
        events.push(PlayerEvent::IsPlayingChanged { is_playing: playing });
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool, events: &mut Vec<PlayerEvent>) {
        if self.play_when_ready == play_when_ready {
            return;
        }
        self.play_when_ready = play_when_ready;
        events.push(PlayerEvent::PlayWhenReadyChanged {
            play_when_ready,
            reason: PlayWhenReadyChangeReason::UserRequest,
        });
        events.push(PlayerEvent::PlayerStateChanged {
            play_when_ready,
            playback_state: self.playback_state,
        });
        self.update_is_playing(events);
    }

    fn set_loading(&mut self, is_loading: bool, events: &mut Vec<PlayerEvent>) {
        if self.is_loading == is_loading {
            return;
        }
        self.is_loading = is_loading;
        events.push(PlayerEvent::IsLoadingChanged { is_loading });
        events.push(PlayerEvent::LoadingChanged { is_loading });
    }

    fn available_commands(&self) -> Commands {
        let mut commands = vec![
            Command::PlayPause,
            Command::Prepare,
            Command::Stop,
            Command::SetRepeatMode,
            Command::SetShuffleMode,
            Command::SetSpeedAndPitch,
            Command::GetMediaItemsMetadata,
        ];
        if self.content.as_ref().is_some_and(|c| c.seekable) {
            commands.push(Command::SeekInCurrentMediaItem);
        }
        commands.into_iter().collect()
    }

    /// Move the state machine after the clock or the buffer changed
    fn evaluate(&mut self, policy: &BufferPolicy, events: &mut Vec<PlayerEvent>) -> Result<()> {
        let (ahead_ms, ahead_bytes) = self.buffered_ahead();
        let at_end = self.end_of_input && self.position_ms >= self.buffered_until_ms();

        match self.playback_state {
            PlaybackState::Buffering if at_end => self.transition(PlaybackState::Ended, events)?,
            PlaybackState::Buffering => {
                if self.end_of_input
                    || policy.should_start_playback(ahead_ms, ahead_bytes, self.rebuffering)
                {
                    self.rebuffering = false;
                    self.transition(PlaybackState::Ready, events)?;
                }
            }
            PlaybackState::Ready if at_end => self.transition(PlaybackState::Ended, events)?,
            PlaybackState::Ready => {
                if self.is_playing && ahead_ms == 0 && !self.end_of_input {
                    self.rebuffering = true;
                    self.transition(PlaybackState::Buffering, events)?;
                }
            }
            PlaybackState::Idle | PlaybackState::Ended => {}
        }
        Ok(())
    }

    /// Next chunk to fetch, if the buffer wants one
    fn next_load(&mut self, segment_size: usize, events: &mut Vec<PlayerEvent>) -> Option<DataSpec> {
        let active = matches!(
            self.playback_state,
            PlaybackState::Buffering | PlaybackState::Ready
        );
        let (ahead_ms, ahead_bytes) = self.buffered_ahead();
        let wants = active && !self.end_of_input && self.load.should_continue_loading(ahead_ms, ahead_bytes);
        self.set_loading(wants, events);
        if !wants {
            return None;
        }

        let media = self.media.as_ref()?;
        let mut length = segment_size as u64;
        if let Some(total) = self.content.as_ref().and_then(|c| c.total_length) {
            length = length.min(total.saturating_sub(self.read_position));
        }
        Some(
            DataSpec::new(media.uri.clone())
                .with_range(self.read_position, Some(length.max(1)))
                .with_key(media.cache_key()),
        )
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    policy: BufferPolicy,
    factory: Arc<dyn DataSourceFactory>,
    extractor_flags: ExtractorFlags,
    assumed_bitrate: u32,
    bandwidth: BandwidthMeter,
    listeners: Mutex<Vec<Arc<dyn PlayerListener>>>,
    state: RwLock<EngineState>,
    running: Mutex<Option<Running>>,
}

impl Shared {
    fn dispatch(&self, events: Vec<PlayerEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = lock(&self.listeners).clone();
        for event in &events {
            debug!(event = %event.name(), "Dispatching event");
            for listener in &listeners {
                listener.on_event(event);
            }
        }
    }

    fn stop_loop(&self) {
        if let Some(running) = lock(&self.running).take() {
            running.cancel.cancel();
            running.handle.abort();
        }
    }

    /// Apply a fetched chunk to the buffer
    fn on_chunk(&self, state: &mut EngineState, chunk: DataChunk, events: &mut Vec<PlayerEvent>) {
        if state.content.is_none() {
            self.on_first_chunk(state, &chunk, events);
        }

        state.read_position += chunk.len() as u64;
        let total = state.content.as_ref().and_then(|c| c.total_length);
        if chunk.is_end_of_input() || total.is_some_and(|t| state.read_position >= t) {
            debug!(read_position = state.read_position, "End of input");
            state.end_of_input = true;
        }
    }

    fn on_first_chunk(&self, state: &mut EngineState, chunk: &DataChunk, events: &mut Vec<PlayerEvent>) {
        let Some(media) = state.media.clone() else {
            return;
        };

        let container = Container::detect(chunk.content_type.as_deref(), media.uri.path());
        let format = Format {
            id: Some("0".to_string()),
            container_mime_type: chunk.content_type.clone(),
            sample_mime_type: container.sample_mime_type().map(String::from),
            bitrate: Some(self.assumed_bitrate),
            ..Default::default()
        };
        let groups = vec![single_format_group(format)];
        let selections = state.selector.select(&groups, self.bandwidth.bitrate_estimate());
        let bitrate = selections
            .first()
            .and_then(|s| s.format.bitrate)
            .unwrap_or(self.assumed_bitrate);

        let seekable = self
            .extractor_flags
            .is_seekable(container, chunk.total_length, chunk.range_supported);
        let content = ContentInfo {
            total_length: chunk.total_length,
            range_supported: chunk.range_supported,
            container,
            bitrate,
            seekable,
        };

        info!(
            container = ?content.container,
            total_length = ?content.total_length,
            range_supported = content.range_supported,
            seekable,
            from_cache = chunk.from_cache,
            "Media prepared"
        );

        let window = Window {
            media_item: media,
            duration_ms: content.duration_ms(),
            is_seekable: seekable,
            is_dynamic: content.total_length.is_none(),
            is_live: content.total_length.is_none(),
        };
        state.content = Some(content);

        events.push(PlayerEvent::TimelineChanged {
            timeline: Timeline::single(window),
            reason: TimelineChangeReason::SourceUpdate,
        });
        events.push(PlayerEvent::TracksChanged {
            track_groups: groups,
            track_selections: selections,
        });
        if !chunk.metadata.is_empty() {
            events.push(PlayerEvent::StaticMetadataChanged {
                metadata_list: vec![chunk.metadata.clone()],
            });
            events.push(PlayerEvent::MediaMetadataChanged {
                metadata: chunk.metadata.clone(),
            });
        }
        events.push(PlayerEvent::AvailableCommandsChanged {
            commands: state.available_commands(),
        });
    }

    /// Surface `err` once and drop back to idle
    fn on_load_error(&self, state: &mut EngineState, err: Error, events: &mut Vec<PlayerEvent>) {
        warn!(error = %err, code = err.error_code(), "Playback failed");
        state.set_loading(false, events);
        events.push(PlayerEvent::PlayerError {
            error: PlaybackError::from(&err),
        });
        if let Err(e) = state.transition(PlaybackState::Idle, events) {
            warn!(error = %e, "Could not return to idle");
        }
    }
}

/// Load and clock loop; runs until cancelled or playback fails
async fn run(shared: Arc<Shared>, source: Arc<dyn DataSource>, cancel: CancellationToken) {
    let segment_size = shared.policy.allocator.segment_size;

    loop {
        let mut events = Vec::new();
        let request = {
            let mut state = shared.state.write().await;
            state.advance_clock(Instant::now());
            if let Err(e) = state.evaluate(&shared.policy, &mut events) {
                warn!(error = %e, "State evaluation failed");
            }
            state.next_load(segment_size, &mut events)
        };
        shared.dispatch(events);

        let Some(spec) = request else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(IDLE_TICK) => {}
            }
            continue;
        };

        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.read(&spec) => result,
        };

        let mut events = Vec::new();
        let failed = {
            let mut state = shared.state.write().await;
            // A seek or new media item moved the read position while this chunk was in flight
            if cancel.is_cancelled() || state.read_position != spec.position {
                false
            } else {
                match result {
                    Ok(chunk) => {
                        if !chunk.from_cache {
                            shared.bandwidth.record(chunk.len(), started.elapsed());
                        }
                        shared.on_chunk(&mut state, chunk, &mut events);
                        false
                    }
                    Err(Error::RangeNotSatisfiable { .. }) => {
                        state.end_of_input = true;
                        false
                    }
                    Err(err) => {
                        shared.on_load_error(&mut state, err, &mut events);
                        true
                    }
                }
            }
        };
        shared.dispatch(events);

        if failed {
            break;
        }
        tokio::task::yield_now().await;
    }

    debug!("Engine loop finished");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reference engine without a decoder
///
/// Bytes are pulled through the configured data source and converted to
/// media time with a constant bitrate. The playback clock advances in real
/// time while the engine is ready and playing.
pub struct HeadlessEngine {
    shared: Arc<Shared>,
}

impl HeadlessEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let state = EngineState::new(config);
        Self {
            shared: Arc::new(Shared {
                policy: config.buffer_policy.clone(),
                factory: config.data_source_factory.clone(),
                extractor_flags: config.extractor_flags,
                assumed_bitrate: config.assumed_bitrate.max(1),
                bandwidth: BandwidthMeter::default(),
                listeners: Mutex::new(Vec::new()),
                state: RwLock::new(state),
                running: Mutex::new(None),
            }),
        }
    }

    /// Current bandwidth estimate in bits per second
    pub fn bitrate_estimate(&self) -> u64 {
        self.shared.bandwidth.bitrate_estimate()
    }

    pub async fn is_loading(&self) -> bool {
        self.shared.state.read().await.is_loading
    }

    pub async fn is_playing(&self) -> bool {
        self.shared.state.read().await.is_playing
    }

    pub async fn duration_ms(&self) -> Option<u64> {
        self.shared
            .state
            .read()
            .await
            .content
            .as_ref()
            .and_then(|c| c.duration_ms())
    }
}

#[async_trait]
impl MediaEngine for HeadlessEngine {
    fn add_listener(&self, listener: Arc<dyn PlayerListener>) {
        lock(&self.shared.listeners).push(listener);
    }

    #[instrument(skip(self, media), fields(media = %media))]
    async fn set_media_item(&self, media: MediaReference) -> Result<()> {
        self.shared.stop_loop();

        let mut events = Vec::new();
        {
            let mut state = self.shared.state.write().await;
            if state.released {
                return Err(Error::Released);
            }
            state.set_loading(false, &mut events);
            state.transition(PlaybackState::Idle, &mut events)?;

            state.media = Some(media.clone());
            state.content = None;
            state.load.reset();
            state.read_position = 0;
            state.end_of_input = false;
            state.rebuffering = false;
            state.position_ms = 0;
            state.clock_anchor = None;

            let placeholder = Window {
                media_item: media.clone(),
                duration_ms: None,
                is_seekable: false,
                is_dynamic: true,
                is_live: false,
            };
            events.push(PlayerEvent::TimelineChanged {
                timeline: Timeline::single(placeholder),
                reason: TimelineChangeReason::PlaylistChanged,
            });
            events.push(PlayerEvent::MediaItemTransition {
                media_item: Some(media),
                reason: MediaItemTransitionReason::PlaylistChanged,
            });
        }
        self.shared.dispatch(events);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn prepare(&self) -> Result<()> {
        let mut events = Vec::new();
        let source = {
            let mut state = self.shared.state.write().await;
            if state.released {
                return Err(Error::Released);
            }
            if state.media.is_none() {
                return Err(Error::NoMediaItem);
            }
            if state.playback_state != PlaybackState::Idle {
                debug!("Already prepared");
                return Ok(());
            }

            let source = self.shared.factory.create_data_source()?;
            state.transition(PlaybackState::Buffering, &mut events)?;
            events.push(PlayerEvent::AvailableCommandsChanged {
                commands: state.available_commands(),
            });
            source
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(self.shared.clone(), source, cancel.clone()));
        *lock(&self.shared.running) = Some(Running { cancel, handle });

        info!("Engine prepared");
        self.shared.dispatch(events);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.shared.state.write().await;
            if state.released {
                return Err(Error::Released);
            }
            state.set_play_when_ready(true, &mut events);
        }
        self.shared.dispatch(events);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.shared.state.write().await;
            if state.released {
                return Err(Error::Released);
            }
            state.set_play_when_ready(false, &mut events);
        }
        self.shared.dispatch(events);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn seek_to(&self, position_ms: u64) -> Result<()> {
        let segment_size = self.shared.policy.allocator.segment_size as u64;
        let mut events = Vec::new();
        {
            let mut state = self.shared.state.write().await;
            if state.released {
                return Err(Error::Released);
            }
            let Some(content) = state.content.clone().filter(|c| c.seekable) else {
                debug!("Current window is not seekable, ignoring seek");
                return Ok(());
            };

            state.advance_clock(Instant::now());
            let old_position = state.position_info();

            let duration = content.duration_ms().unwrap_or(u64::MAX);
            let requested = position_ms.min(duration);
            let sync_interval = content.bytes_to_ms(segment_size).max(1);
            let first_sync = requested / sync_interval * sync_interval;
            let second_sync = (first_sync + sync_interval).min(duration);
            let target = state
                .seek_parameters
                .resolve_seek_position(requested, first_sync, second_sync);

            state.position_ms = target;
            state.read_position = content.ms_to_bytes(target);
            state.end_of_input = false;
            state.rebuffering = false;
            state.load.reset();
            if state.is_playing {
                state.clock_anchor = Some(Instant::now());
            }
            info!(requested, target, "Seek");

            events.push(PlayerEvent::PositionDiscontinuity {
                old_position,
                new_position: state.position_info(),
                reason: DiscontinuityReason::Seek,
            });
            if matches!(state.playback_state, PlaybackState::Ready | PlaybackState::Ended) {
                state.transition(PlaybackState::Buffering, &mut events)?;
            }
            events.push(PlayerEvent::SeekProcessed);
        }
        self.shared.dispatch(events);
        Ok(())
    }

    async fn set_seek_parameters(&self, parameters: SeekParameters) {
        debug!(parameters = %parameters, "Seek parameters set");
        self.shared.state.write().await.seek_parameters = parameters;
    }

    async fn set_track_selector_parameters(&self, parameters: TrackSelectorParameters) {
        debug!(?parameters, "Track selector parameters set");
        self.shared.state.write().await.selector.set_parameters(parameters);
    }

    async fn playback_state(&self) -> PlaybackState {
        self.shared.state.read().await.playback_state
    }

    async fn is_current_window_seekable(&self) -> bool {
        self.shared
            .state
            .read()
            .await
            .content
            .as_ref()
            .is_some_and(|c| c.seekable)
    }

    async fn current_position_ms(&self) -> u64 {
        self.shared.state.read().await.position_at(Instant::now())
    }

    #[instrument(skip(self))]
    async fn release(&self) {
        self.shared.stop_loop();
        {
            let mut state = self.shared.state.write().await;
            if state.released {
                return;
            }
            state.released = true;
            state.advance_clock(Instant::now());
            state.is_loading = false;
            state.is_playing = false;
            state.clock_anchor = None;
            state.playback_state = PlaybackState::Idle;
        }
        lock(&self.shared.listeners).clear();
        info!("Engine released");
    }
}

impl Drop for HeadlessEngine {
    fn drop(&mut self) {
        self.shared.stop_loop();
    }
}
