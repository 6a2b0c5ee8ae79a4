//! Core types for Tapedeck

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;
use uuid::Uuid;

use crate::{Error, Result};

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable reference to the media the engine should play
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    pub uri: Url,
}

impl MediaReference {
    /// Parse a media reference from a URI literal.
    ///
    /// Only `http`, `https` and `file` schemes are accepted.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = Url::parse(uri).map_err(|e| Error::InvalidMediaUri(format!("{uri}: {e}")))?;
        match uri.scheme() {
            "http" | "https" | "file" => Ok(Self { uri }),
            other => Err(Error::InvalidMediaUri(format!(
                "unsupported scheme '{other}' in {uri}"
            ))),
        }
    }

    /// Cache key for this media, the URI string
    pub fn cache_key(&self) -> String {
        self.uri.to_string()
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MediaItem(uri={})", self.uri)
    }
}

/// Engine playback state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No media prepared, or playback failed
    Idle,
    /// Waiting for enough buffered media to play
    Buffering,
    /// Able to play from the current position
    Ready,
    /// Reached the end of the media
    Ended,
}

impl PlaybackState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, target),
            (Idle, Buffering)
                | (Buffering, Ready)
                | (Buffering, Ended)
                | (Ready, Buffering)
                | (Ready, Ended)
                | (Ended, Buffering)
                | (Buffering, Idle)
                | (Ready, Idle)
                | (Ended, Idle)
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "STATE_IDLE"),
            PlaybackState::Buffering => write!(f, "STATE_BUFFERING"),
            PlaybackState::Ready => write!(f, "STATE_READY"),
            PlaybackState::Ended => write!(f, "STATE_ENDED"),
        }
    }
}

/// Reason for a position discontinuity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscontinuityReason {
    AutoTransition,
    Seek,
    SeekAdjustment,
    Skip,
    Remove,
    Internal,
}

impl fmt::Display for DiscontinuityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscontinuityReason::AutoTransition => write!(f, "AUTO_TRANSITION"),
            DiscontinuityReason::Seek => write!(f, "SEEK"),
            DiscontinuityReason::SeekAdjustment => write!(f, "SEEK_ADJUSTMENT"),
            DiscontinuityReason::Skip => write!(f, "SKIP"),
            DiscontinuityReason::Remove => write!(f, "REMOVE"),
            DiscontinuityReason::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Reason for a timeline change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineChangeReason {
    PlaylistChanged,
    SourceUpdate,
}

impl fmt::Display for TimelineChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineChangeReason::PlaylistChanged => write!(f, "PLAYLIST_CHANGED"),
            TimelineChangeReason::SourceUpdate => write!(f, "SOURCE_UPDATE"),
        }
    }
}

/// Reason for a media item transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaItemTransitionReason {
    Repeat,
    Auto,
    Seek,
    PlaylistChanged,
}

impl fmt::Display for MediaItemTransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaItemTransitionReason::Repeat => write!(f, "REPEAT"),
            MediaItemTransitionReason::Auto => write!(f, "AUTO"),
            MediaItemTransitionReason::Seek => write!(f, "SEEK"),
            MediaItemTransitionReason::PlaylistChanged => write!(f, "PLAYLIST_CHANGED"),
        }
    }
}

/// Reason for a play-when-ready change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayWhenReadyChangeReason {
    UserRequest,
    AudioFocusLoss,
    AudioBecomingNoisy,
    Remote,
    EndOfMediaItem,
}

impl fmt::Display for PlayWhenReadyChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayWhenReadyChangeReason::UserRequest => write!(f, "USER_REQUEST"),
            PlayWhenReadyChangeReason::AudioFocusLoss => write!(f, "AUDIO_FOCUS_LOSS"),
            PlayWhenReadyChangeReason::AudioBecomingNoisy => write!(f, "AUDIO_BECOMING_NOISY"),
            PlayWhenReadyChangeReason::Remote => write!(f, "REMOTE"),
            PlayWhenReadyChangeReason::EndOfMediaItem => write!(f, "END_OF_MEDIA_ITEM"),
        }
    }
}

/// Reason playback is suppressed while play-when-ready is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackSuppressionReason {
    None,
    TransientAudioFocusLoss,
}

impl fmt::Display for PlaybackSuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackSuppressionReason::None => write!(f, "NONE"),
            PlaybackSuppressionReason::TransientAudioFocusLoss => {
                write!(f, "TRANSIENT_AUDIO_FOCUS_LOSS")
            }
        }
    }
}

/// Repeat mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatMode::Off => write!(f, "OFF"),
            RepeatMode::One => write!(f, "ONE"),
            RepeatMode::All => write!(f, "ALL"),
        }
    }
}

/// Playback position snapshot carried by discontinuity events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub window_index: usize,
    pub media_item: Option<MediaReference>,
    pub period_index: usize,
    pub position_ms: u64,
    pub content_position_ms: u64,
}

impl fmt::Display for PositionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PositionInfo(window={}, period={}, position_ms={}, content_position_ms={})",
            self.window_index, self.period_index, self.position_ms, self.content_position_ms
        )
    }
}

/// Description of one encoded representation of a track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub id: Option<String>,
    pub container_mime_type: Option<String>,
    pub sample_mime_type: Option<String>,
    /// Bitrate in bits per second
    pub bitrate: Option<u32>,
    pub channel_count: Option<u8>,
    pub sample_rate: Option<u32>,
    pub language: Option<String>,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "null".to_string())
        }
        write!(
            f,
            "Format({}, {}, {}, {}, {}, [{}, {}])",
            opt(&self.id),
            opt(&self.container_mime_type),
            opt(&self.sample_mime_type),
            opt(&self.bitrate),
            opt(&self.language),
            opt(&self.channel_count),
            opt(&self.sample_rate),
        )
    }
}

/// Group of formats carrying the same content at different qualities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackGroup {
    pub formats: Vec<Format>,
}

impl TrackGroup {
    pub fn new(formats: Vec<Format>) -> Self {
        Self { formats }
    }

    pub fn is_adaptive(&self) -> bool {
        self.formats.len() > 1
    }
}

impl fmt::Display for TrackGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackGroup[")?;
        for (i, format) in self.formats.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{format}")?;
        }
        write!(f, "]")
    }
}

/// The format chosen for one track group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSelection {
    pub group_index: usize,
    pub format_index: usize,
    pub format: Format,
}

impl fmt::Display for TrackSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrackSelection(group={}, track={}, {})",
            self.group_index, self.format_index, self.format
        )
    }
}

/// Window of the timeline, one per media item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub media_item: MediaReference,
    pub duration_ms: Option<u64>,
    pub is_seekable: bool,
    pub is_dynamic: bool,
    pub is_live: bool,
}

/// Playable structure of the prepared media
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub windows: Vec<Window>,
}

impl Timeline {
    pub fn single(window: Window) -> Self {
        Self {
            windows: vec![window],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl fmt::Display for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timeline[")?;
        for (i, w) in self.windows.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let duration = w
                .duration_ms
                .map(|d| d.to_string())
                .unwrap_or_else(|| "TIME_UNSET".to_string());
            write!(
                f,
                "Window(uri={}, duration_ms={}, seekable={}, dynamic={}, live={})",
                w.media_item.uri, duration, w.is_seekable, w.is_dynamic, w.is_live
            )?;
        }
        write!(f, "]")
    }
}

/// Descriptive metadata for the current media item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub station: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
}

impl MediaMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.station.is_none()
            && self.genre.is_none()
            && self.description.is_none()
    }
}

impl fmt::Display for MediaMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        write!(f, "MediaMetadata(")?;
        for (name, value) in [
            ("title", &self.title),
            ("station", &self.station),
            ("genre", &self.genre),
            ("description", &self.description),
        ] {
            if let Some(value) = value {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{name}={value}")?;
                first = false;
            }
        }
        write!(f, ")")
    }
}

/// A single player command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Command {
    PlayPause,
    Prepare,
    Stop,
    SeekInCurrentMediaItem,
    SetRepeatMode,
    SetShuffleMode,
    SetSpeedAndPitch,
    GetMediaItemsMetadata,
}

/// Set of commands the engine currently accepts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commands(pub BTreeSet<Command>);

impl Commands {
    pub fn contains(&self, command: Command) -> bool {
        self.0.contains(&command)
    }
}

impl FromIterator<Command> for Commands {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commands{:?}", self.0)
    }
}

/// Playback speed and pitch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackParameters {
    pub speed: f32,
    pub pitch: f32,
}

impl Default for PlaybackParameters {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
        }
    }
}

impl fmt::Display for PlaybackParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlaybackParameters(speed={:.2}, pitch={:.2})", self.speed, self.pitch)
    }
}

/// Playback failure surfaced through the player-error event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackError {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

impl From<&Error> for PlaybackError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlaybackException: ERROR_CODE_{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_reference_parses_http() {
        let media = MediaReference::from_uri("https://sc6.gergosnet.com/puls00HD.mp3").unwrap();
        assert_eq!(media.uri.host_str(), Some("sc6.gergosnet.com"));
        assert_eq!(media.cache_key(), "https://sc6.gergosnet.com/puls00HD.mp3");
    }

    #[test]
    fn test_media_reference_rejects_other_schemes() {
        assert!(matches!(
            MediaReference::from_uri("rtsp://example.com/live"),
            Err(Error::InvalidMediaUri(_))
        ));
        assert!(MediaReference::from_uri("not a uri").is_err());
    }

    #[test]
    fn test_playback_state_transitions() {
        assert!(PlaybackState::Idle.can_transition_to(PlaybackState::Buffering));
        assert!(PlaybackState::Buffering.can_transition_to(PlaybackState::Ready));
        assert!(PlaybackState::Ready.can_transition_to(PlaybackState::Ended));
        assert!(PlaybackState::Ended.can_transition_to(PlaybackState::Buffering));

        assert!(!PlaybackState::Idle.can_transition_to(PlaybackState::Ready));
        assert!(!PlaybackState::Idle.can_transition_to(PlaybackState::Ended));
    }

    #[test]
    fn test_metadata_display_skips_missing_fields() {
        let metadata = MediaMetadata {
            station: Some("Puls".into()),
            genre: Some("Pop".into()),
            ..Default::default()
        };
        assert_eq!(metadata.to_string(), "MediaMetadata(station=Puls, genre=Pop)");
        assert!(MediaMetadata::default().is_empty());
    }

    #[test]
    fn test_playback_error_from_error() {
        let err = Error::HttpStatus {
            url: "https://example.com/a.mp3".into(),
            status: 503,
        };
        let playback_error = PlaybackError::from(&err);
        assert_eq!(playback_error.code, "IO_BAD_HTTP_STATUS");
        assert!(playback_error.to_string().contains("503"));
    }
}
