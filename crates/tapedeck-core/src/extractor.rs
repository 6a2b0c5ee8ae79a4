//! Extractor flags for progressive audio containers

use serde::{Deserialize, Serialize};

/// Seek by assuming a constant bitrate when the stream has no seek table
pub const FLAG_ENABLE_CONSTANT_BITRATE_SEEKING: u32 = 1;
/// Seek using an index built while reading (mp3 only)
pub const FLAG_ENABLE_INDEX_SEEKING: u32 = 1 << 2;

/// Audio container recognised from a MIME type or file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Container {
    Mp3,
    Adts,
    Amr,
    Other,
}

impl Container {
    pub fn from_mime_type(mime: &str) -> Self {
        let mime = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match mime.as_str() {
            "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Container::Mp3,
            "audio/aac" | "audio/aacp" | "audio/x-aac" => Container::Adts,
            "audio/amr" | "audio/amr-wb" | "audio/3gpp" => Container::Amr,
            _ => Container::Other,
        }
    }

    pub fn from_path(path: &str) -> Self {
        let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("mp3") => Container::Mp3,
            Some("aac") | Some("adts") => Container::Adts,
            Some("amr") => Container::Amr,
            _ => Container::Other,
        }
    }

    /// Prefer the server's MIME type, fall back to the URI extension
    pub fn detect(content_type: Option<&str>, path: &str) -> Self {
        match content_type.map(Container::from_mime_type) {
            Some(container) if container != Container::Other => container,
            _ => Container::from_path(path),
        }
    }

    pub fn sample_mime_type(&self) -> Option<&'static str> {
        match self {
            Container::Mp3 => Some("audio/mpeg"),
            Container::Adts => Some("audio/mp4a-latm"),
            Container::Amr => Some("audio/3gpp"),
            Container::Other => None,
        }
    }
}

/// Per-container extractor flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorFlags {
    /// Applies [`FLAG_ENABLE_CONSTANT_BITRATE_SEEKING`] to every container
    pub constant_bitrate_seeking: bool,
    pub amr_flags: u32,
    pub adts_flags: u32,
    pub mp3_flags: u32,
}

impl ExtractorFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_amr_extractor_flags(mut self, flags: u32) -> Self {
        self.amr_flags = flags;
        self
    }

    pub fn set_adts_extractor_flags(mut self, flags: u32) -> Self {
        self.adts_flags = flags;
        self
    }

    pub fn set_mp3_extractor_flags(mut self, flags: u32) -> Self {
        self.mp3_flags = flags;
        self
    }

    pub fn set_constant_bitrate_seeking_enabled(mut self, enabled: bool) -> Self {
        self.constant_bitrate_seeking = enabled;
        self
    }

    /// Flags in effect for `container`, including the global toggle
    pub fn effective_flags(&self, container: Container) -> u32 {
        let base = match container {
            Container::Mp3 => self.mp3_flags,
            Container::Adts => self.adts_flags,
            Container::Amr => self.amr_flags,
            Container::Other => 0,
        };
        if self.constant_bitrate_seeking && container != Container::Other {
            base | FLAG_ENABLE_CONSTANT_BITRATE_SEEKING
        } else {
            base
        }
    }

    /// Whether a stream in `container` can be seeked
    ///
    /// Seeking needs a known length, a source that serves byte ranges, and a
    /// seek strategy enabled for the container.
    pub fn is_seekable(&self, container: Container, total_length: Option<u64>, range_supported: bool) -> bool {
        let flags = self.effective_flags(container);
        let strategy = flags & (FLAG_ENABLE_CONSTANT_BITRATE_SEEKING | FLAG_ENABLE_INDEX_SEEKING) != 0;
        strategy && range_supported && total_length.is_some()
    }

    /// The demo configuration.
    ///
    /// The mp3 setter is called twice; the second call replaces the first, so
    /// mp3 keeps index seeking and gets constant-bitrate seeking back through
    /// the global toggle.
    pub fn demo() -> Self {
        Self::new()
            .set_amr_extractor_flags(FLAG_ENABLE_CONSTANT_BITRATE_SEEKING)
            .set_adts_extractor_flags(FLAG_ENABLE_CONSTANT_BITRATE_SEEKING)
            .set_mp3_extractor_flags(FLAG_ENABLE_CONSTANT_BITRATE_SEEKING)
            .set_mp3_extractor_flags(FLAG_ENABLE_INDEX_SEEKING)
            .set_constant_bitrate_seeking_enabled(true)
    }
}
