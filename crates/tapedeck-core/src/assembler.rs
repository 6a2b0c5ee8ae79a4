//! Engine configuration assembly

use crate::buffer::BufferPolicy;
use crate::cache::Cache;
use crate::datasource::{
    CacheDataSink, CacheDataSourceFactory, DataSourceFactory, DefaultDataSourceFactory,
    HttpDataSourceFactory, FLAG_IGNORE_CACHE_ON_ERROR,
};
use crate::extractor::ExtractorFlags;
use crate::seek::SeekParameters;
use crate::settings::Settings;
use crate::track::TrackSelectorParameters;
use crate::types::MediaReference;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Everything an engine needs to play one media item
#[derive(Clone)]
pub struct EngineConfig {
    pub buffer_policy: BufferPolicy,
    pub data_source_factory: Arc<dyn DataSourceFactory>,
    pub extractor_flags: ExtractorFlags,
    pub track_selector_parameters: TrackSelectorParameters,
    pub seek_parameters: SeekParameters,
    /// Bitrate used to convert bytes to media time
    pub assumed_bitrate: u32,
    pub media: MediaReference,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("buffer_policy", &self.buffer_policy)
            .field("extractor_flags", &self.extractor_flags)
            .field("track_selector_parameters", &self.track_selector_parameters)
            .field("seek_parameters", &self.seek_parameters)
            .field("assumed_bitrate", &self.assumed_bitrate)
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}

/// Build the demo engine configuration over `cache`
///
/// The data source chain reads through the cache, writes misses back into
/// it, and falls back to the upstream when the cache fails. The upstream
/// reads `file://` media from disk and everything else over HTTP.
pub fn assemble(settings: &Settings, cache: Arc<Cache>) -> Result<EngineConfig> {
    let buffer_policy = settings.buffer_policy()?;
    let media = settings.media_reference()?;

    let mut http = HttpDataSourceFactory::new().set_accept_cookies(true);
    if let Some(agent) = &settings.user_agent {
        http = http.set_user_agent(agent.clone());
    }
    let http = http.build()?;
    let user_agent = http.user_agent().to_string();

    let data_source_factory = CacheDataSourceFactory::new()
        .set_cache(cache.clone())
        .set_upstream_data_source_factory(Arc::new(DefaultDataSourceFactory::new(Arc::new(http))))
        .set_cache_write_data_sink(Some(CacheDataSink::new(cache)))
        .set_flags(FLAG_IGNORE_CACHE_ON_ERROR);

    info!(
        media = %media,
        user_agent = %user_agent,
        min_buffer_ms = buffer_policy.min_buffer_ms,
        max_buffer_ms = buffer_policy.max_buffer_ms,
        "Engine configuration assembled"
    );

    Ok(EngineConfig {
        buffer_policy,
        data_source_factory: Arc::new(data_source_factory),
        extractor_flags: ExtractorFlags::demo(),
        track_selector_parameters: TrackSelectorParameters::default(),
        seek_parameters: SeekParameters::CLOSEST_SYNC,
        assumed_bitrate: settings.assumed_bitrate,
        media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;
    use crate::Error;

    fn cache() -> (tempfile::TempDir, Arc<Cache>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(Cache::open(dir.path(), EvictionPolicy::NoEviction).unwrap());
        (dir, cache)
    }

    #[test]
    fn test_assemble_demo_configuration() {
        let (_dir, cache) = cache();
        let config = assemble(&Settings::default(), cache).unwrap();

        assert_eq!(config.buffer_policy, BufferPolicy::default());
        assert_eq!(config.seek_parameters, SeekParameters::CLOSEST_SYNC);
        assert_eq!(config.extractor_flags, ExtractorFlags::demo());
        assert_eq!(config.track_selector_parameters, TrackSelectorParameters::default());
        assert_eq!(config.media.uri.as_str(), crate::settings::DEFAULT_MEDIA_URI);
        assert!(config.data_source_factory.create_data_source().is_ok());
    }

    #[test]
    fn test_assemble_rejects_invalid_buffer_policy() {
        let (_dir, cache) = cache();
        let settings = Settings {
            buffer_for_playback_ms: 60_000,
            buffer_for_playback_after_rebuffer_ms: 1_000,
            ..Default::default()
        };
        assert!(matches!(assemble(&settings, cache), Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_assembled_chain_reads_local_files() {
        let (dir, cache) = cache();
        let path = dir.path().join("local.mp3");
        std::fs::write(&path, b"local media").unwrap();
        let uri = url::Url::from_file_path(&path).unwrap();
        let settings = Settings {
            media_uri: uri.to_string(),
            ..Default::default()
        };

        let config = assemble(&settings, cache.clone()).unwrap();
        let source = config.data_source_factory.create_data_source().unwrap();
        let spec = crate::datasource::DataSpec::new(uri).with_range(0, Some(5));
        let chunk = source.read(&spec).await.unwrap();

        assert_eq!(&chunk.bytes[..], b"local");
        assert_eq!(chunk.total_length, Some(11));
        assert_eq!(cache.cached_length(&config.media.cache_key(), 0), 5);
    }

    #[test]
    fn test_assemble_rejects_invalid_uri() {
        let (_dir, cache) = cache();
        let settings = Settings {
            media_uri: "::".to_string(),
            ..Default::default()
        };
        assert!(matches!(assemble(&settings, cache), Err(Error::InvalidMediaUri(_))));
    }
}
