//! Engine events
//!
//! Every engine callback is one [`PlayerEvent`] variant. Listeners receive
//! all of them through [`PlayerListener::on_event`] and match the kinds they
//! care about.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event emitted by a media engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// Legacy loading callback, emitted alongside [`PlayerEvent::IsLoadingChanged`]
    LoadingChanged { is_loading: bool },

    IsLoadingChanged { is_loading: bool },

    IsPlayingChanged { is_playing: bool },

    PlaybackStateChanged { state: PlaybackState },

    /// Legacy combined state callback
    PlayerStateChanged {
        play_when_ready: bool,
        playback_state: PlaybackState,
    },

    PlayWhenReadyChanged {
        play_when_ready: bool,
        reason: PlayWhenReadyChangeReason,
    },

    PlayerError { error: PlaybackError },

    PositionDiscontinuity {
        old_position: PositionInfo,
        new_position: PositionInfo,
        reason: DiscontinuityReason,
    },

    TracksChanged {
        track_groups: Vec<TrackGroup>,
        track_selections: Vec<TrackSelection>,
    },

    TimelineChanged {
        timeline: Timeline,
        reason: TimelineChangeReason,
    },

    MediaItemTransition {
        media_item: Option<MediaReference>,
        reason: MediaItemTransitionReason,
    },

    MediaMetadataChanged { metadata: MediaMetadata },

    StaticMetadataChanged { metadata_list: Vec<MediaMetadata> },

    AvailableCommandsChanged { commands: Commands },

    ShuffleModeChanged { enabled: bool },

    RepeatModeChanged { mode: RepeatMode },

    PlaybackSuppressionReasonChanged { reason: PlaybackSuppressionReason },

    PlaybackParametersChanged { parameters: PlaybackParameters },

    SeekProcessed,

    SurfaceSizeChanged { width: u32, height: u32 },
}

/// Discriminant of a [`PlayerEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LoadingChanged,
    IsLoadingChanged,
    IsPlayingChanged,
    PlaybackStateChanged,
    PlayerStateChanged,
    PlayWhenReadyChanged,
    PlayerError,
    PositionDiscontinuity,
    TracksChanged,
    TimelineChanged,
    MediaItemTransition,
    MediaMetadataChanged,
    StaticMetadataChanged,
    AvailableCommandsChanged,
    ShuffleModeChanged,
    RepeatModeChanged,
    PlaybackSuppressionReasonChanged,
    PlaybackParametersChanged,
    SeekProcessed,
    SurfaceSizeChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 20] = [
        EventKind::LoadingChanged,
        EventKind::IsLoadingChanged,
        EventKind::IsPlayingChanged,
        EventKind::PlaybackStateChanged,
        EventKind::PlayerStateChanged,
        EventKind::PlayWhenReadyChanged,
        EventKind::PlayerError,
        EventKind::PositionDiscontinuity,
        EventKind::TracksChanged,
        EventKind::TimelineChanged,
        EventKind::MediaItemTransition,
        EventKind::MediaMetadataChanged,
        EventKind::StaticMetadataChanged,
        EventKind::AvailableCommandsChanged,
        EventKind::ShuffleModeChanged,
        EventKind::RepeatModeChanged,
        EventKind::PlaybackSuppressionReasonChanged,
        EventKind::PlaybackParametersChanged,
        EventKind::SeekProcessed,
        EventKind::SurfaceSizeChanged,
    ];

    /// Callback name, as it appears in event log lines
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::LoadingChanged => "onLoadingChanged",
            EventKind::IsLoadingChanged => "onIsLoadingChanged",
            EventKind::IsPlayingChanged => "onIsPlayingChanged",
            EventKind::PlaybackStateChanged => "onPlaybackStateChanged",
            EventKind::PlayerStateChanged => "onPlayerStateChanged",
            EventKind::PlayWhenReadyChanged => "onPlayWhenReadyChanged",
            EventKind::PlayerError => "onPlayerError",
            EventKind::PositionDiscontinuity => "onPositionDiscontinuity",
            EventKind::TracksChanged => "onTracksChanged",
            EventKind::TimelineChanged => "onTimelineChanged",
            EventKind::MediaItemTransition => "onMediaItemTransition",
            EventKind::MediaMetadataChanged => "onMediaMetadataChanged",
            EventKind::StaticMetadataChanged => "onStaticMetadataChanged",
            EventKind::AvailableCommandsChanged => "onAvailableCommandsChanged",
            EventKind::ShuffleModeChanged => "onShuffleModeEnabledChanged",
            EventKind::RepeatModeChanged => "onRepeatModeChanged",
            EventKind::PlaybackSuppressionReasonChanged => "onPlaybackSuppressionReasonChanged",
            EventKind::PlaybackParametersChanged => "onPlaybackParametersChanged",
            EventKind::SeekProcessed => "onSeekProcessed",
            EventKind::SurfaceSizeChanged => "onSurfaceSizeChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PlayerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlayerEvent::LoadingChanged { .. } => EventKind::LoadingChanged,
            PlayerEvent::IsLoadingChanged { .. } => EventKind::IsLoadingChanged,
            PlayerEvent::IsPlayingChanged { .. } => EventKind::IsPlayingChanged,
            PlayerEvent::PlaybackStateChanged { .. } => EventKind::PlaybackStateChanged,
            PlayerEvent::PlayerStateChanged { .. } => EventKind::PlayerStateChanged,
            PlayerEvent::PlayWhenReadyChanged { .. } => EventKind::PlayWhenReadyChanged,
            PlayerEvent::PlayerError { .. } => EventKind::PlayerError,
            PlayerEvent::PositionDiscontinuity { .. } => EventKind::PositionDiscontinuity,
            PlayerEvent::TracksChanged { .. } => EventKind::TracksChanged,
            PlayerEvent::TimelineChanged { .. } => EventKind::TimelineChanged,
            PlayerEvent::MediaItemTransition { .. } => EventKind::MediaItemTransition,
            PlayerEvent::MediaMetadataChanged { .. } => EventKind::MediaMetadataChanged,
            PlayerEvent::StaticMetadataChanged { .. } => EventKind::StaticMetadataChanged,
            PlayerEvent::AvailableCommandsChanged { .. } => EventKind::AvailableCommandsChanged,
            PlayerEvent::ShuffleModeChanged { .. } => EventKind::ShuffleModeChanged,
            PlayerEvent::RepeatModeChanged { .. } => EventKind::RepeatModeChanged,
            PlayerEvent::PlaybackSuppressionReasonChanged { .. } => {
                EventKind::PlaybackSuppressionReasonChanged
            }
            PlayerEvent::PlaybackParametersChanged { .. } => EventKind::PlaybackParametersChanged,
            PlayerEvent::SeekProcessed => EventKind::SeekProcessed,
            PlayerEvent::SurfaceSizeChanged { .. } => EventKind::SurfaceSizeChanged,
        }
    }

    /// Callback name, e.g. `onIsPlayingChanged`
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Payload rendered as `field = value` pairs
    pub fn payload(&self) -> String {
        match self {
            PlayerEvent::LoadingChanged { is_loading } | PlayerEvent::IsLoadingChanged { is_loading } => {
                format!("isLoading = {is_loading}")
            }
            PlayerEvent::IsPlayingChanged { is_playing } => format!("isPlaying = {is_playing}"),
            PlayerEvent::PlaybackStateChanged { state } => format!("state = {state}"),
            PlayerEvent::PlayerStateChanged {
                play_when_ready,
                playback_state,
            } => format!("playWhenReady = {play_when_ready}, playbackState = {playback_state}"),
            PlayerEvent::PlayWhenReadyChanged {
                play_when_ready,
                reason,
            } => format!("playWhenReady = {play_when_ready}, reason = {reason}"),
            PlayerEvent::PlayerError { error } => format!("error = {error}"),
            PlayerEvent::PositionDiscontinuity {
                old_position,
                new_position,
                reason,
            } => format!("oldPosition = {old_position}, newPosition = {new_position}, reason = {reason}"),
            PlayerEvent::TracksChanged {
                track_groups,
                track_selections,
            } => format!(
                "trackGroups = {}, trackSelections = {}",
                list(track_groups),
                list(track_selections)
            ),
            PlayerEvent::TimelineChanged { timeline, reason } => {
                format!("timeline = {timeline}, reason = {reason}")
            }
            PlayerEvent::MediaItemTransition { media_item, reason } => match media_item {
                Some(item) => format!("mediaItem = {item}, reason = {reason}"),
                None => format!("mediaItem = null, reason = {reason}"),
            },
            PlayerEvent::MediaMetadataChanged { metadata } => format!("mediaMetadata = {metadata}"),
            PlayerEvent::StaticMetadataChanged { metadata_list } => {
                format!("metadataList = {}", list(metadata_list))
            }
            PlayerEvent::AvailableCommandsChanged { commands } => {
                format!("availableCommands = {commands}")
            }
            PlayerEvent::ShuffleModeChanged { enabled } => format!("shuffleModeEnabled = {enabled}"),
            PlayerEvent::RepeatModeChanged { mode } => format!("repeatMode = {mode}"),
            PlayerEvent::PlaybackSuppressionReasonChanged { reason } => {
                format!("playbackSuppressionReason = {reason}")
            }
            PlayerEvent::PlaybackParametersChanged { parameters } => {
                format!("playbackParameters = {parameters}")
            }
            PlayerEvent::SeekProcessed => String::new(),
            PlayerEvent::SurfaceSizeChanged { width, height } => {
                format!("width = {width}, height = {height}")
            }
        }
    }
}

impl fmt::Display for PlayerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.payload())
    }
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    let rendered: Vec<String> = items.iter().map(|item| item.to_string()).collect();
    format!("[{}]", rendered.join(", "))
}

/// Receives engine events
pub trait PlayerListener: Send + Sync {
    fn on_event(&self, event: &PlayerEvent);
}

impl<F> PlayerListener for F
where
    F: Fn(&PlayerEvent) + Send + Sync,
{
    fn on_event(&self, event: &PlayerEvent) {
        self(event)
    }
}
