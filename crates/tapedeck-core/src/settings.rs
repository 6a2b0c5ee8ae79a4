//! Player settings
//!
//! Defaults reproduce the demo configuration. Settings load from an optional
//! JSON file; the CLI then overrides individual fields.

use crate::buffer::{BufferPolicy, DEFAULT_BUFFER_SEGMENT_SIZE};
use crate::cache::EvictionPolicy;
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::types::MediaReference;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stream played when no URI is given
pub const DEFAULT_MEDIA_URI: &str = "https://sc6.gergosnet.com/puls00HD.mp3";

/// Bitrate assumed for progressive streams, 128 kbps
pub const DEFAULT_ASSUMED_BITRATE: u32 = 128_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub media_uri: String,
    /// Cache root, `<data dir>/tapedeck/downloads` when unset
    pub cache_dir: Option<PathBuf>,
    pub eviction: EvictionPolicy,
    pub min_buffer_ms: u64,
    pub max_buffer_ms: u64,
    pub buffer_for_playback_ms: u64,
    pub buffer_for_playback_after_rebuffer_ms: u64,
    pub back_buffer_ms: u64,
    pub target_buffer_bytes: usize,
    pub buffer_segment_size: usize,
    pub poll_interval_ms: u64,
    /// Overrides the default `TapedeckDemo/...` agent
    pub user_agent: Option<String>,
    /// Bitrate used to convert bytes to media time
    pub assumed_bitrate: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let buffer = BufferPolicy::default();
        Self {
            media_uri: DEFAULT_MEDIA_URI.to_string(),
            cache_dir: None,
            eviction: EvictionPolicy::NoEviction,
            min_buffer_ms: buffer.min_buffer_ms,
            max_buffer_ms: buffer.max_buffer_ms,
            buffer_for_playback_ms: buffer.buffer_for_playback_ms,
            buffer_for_playback_after_rebuffer_ms: buffer.buffer_for_playback_after_rebuffer_ms,
            back_buffer_ms: buffer.back_buffer_ms,
            target_buffer_bytes: buffer.target_buffer_bytes,
            buffer_segment_size: DEFAULT_BUFFER_SEGMENT_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            user_agent: None,
            assumed_bitrate: DEFAULT_ASSUMED_BITRATE,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn media_reference(&self) -> Result<MediaReference> {
        MediaReference::from_uri(&self.media_uri)
    }

    /// Buffer policy described by these settings
    pub fn buffer_policy(&self) -> Result<BufferPolicy> {
        BufferPolicy::builder()
            .set_allocator(crate::buffer::AllocatorConfig {
                trim_on_reset: true,
                segment_size: self.buffer_segment_size,
            })
            .set_buffer_durations_ms(
                self.min_buffer_ms,
                self.max_buffer_ms,
                self.buffer_for_playback_ms,
                self.buffer_for_playback_after_rebuffer_ms,
            )
            .set_back_buffer(self.back_buffer_ms, false)
            .set_target_buffer_bytes(self.target_buffer_bytes)
            .set_prioritize_time_over_size_thresholds(true)
            .build()
    }

    /// Check every field the player depends on
    pub fn validate(&self) -> Result<()> {
        self.media_reference()?;
        self.buffer_policy()?;
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.assumed_bitrate == 0 {
            return Err(Error::InvalidConfig(
                "assumed_bitrate must be greater than zero".to_string(),
            ));
        }
        if let EvictionPolicy::LeastRecentlyUsed { max_bytes: 0 } = self.eviction {
            return Err(Error::InvalidConfig(
                "LRU eviction needs a non-zero max_bytes".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.buffer_policy().unwrap(), BufferPolicy::default());
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"media_uri": "http://localhost/a.mp3", "eviction": {{"kind": "least_recently_used", "max_bytes": 1024}}}}"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.media_uri, "http://localhost/a.mp3");
        assert_eq!(settings.eviction, EvictionPolicy::LeastRecentlyUsed { max_bytes: 1024 });
        assert_eq!(settings.min_buffer_ms, 5_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let settings = Settings {
            min_buffer_ms: 10_000,
            max_buffer_ms: 1_000,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::InvalidConfig(_))));

        let settings = Settings {
            media_uri: "ftp://example.com/a.mp3".to_string(),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::InvalidMediaUri(_))));

        let settings = Settings {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(Error::InvalidConfig(_))
        ));
    }
}
