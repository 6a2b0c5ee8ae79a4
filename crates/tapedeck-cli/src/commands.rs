//! CLI command implementations

use crate::output::{format_spans, human_bytes, to_json, OutputFormat};
use crate::Eviction;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tapedeck_core::cache::{default_cache_dir, MAX_CACHE_BYTES};
use tapedeck_core::{
    assemble, CacheProvider, EvictionPolicy, HeadlessEngine, HostOptions, LogSink, MediaEngine,
    PlayerHost, Settings, TracingSink,
};
use tracing::{info, warn};

/// Command-line values that take precedence over the settings file
#[derive(Debug, Default)]
pub struct PlayOverrides {
    pub uri: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub eviction: Option<Eviction>,
    pub max_cache_bytes: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// Load settings from `path` (or defaults) and apply the overrides
pub fn load_settings(path: Option<&Path>, overrides: PlayOverrides) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    if let Some(uri) = overrides.uri {
        settings.media_uri = uri;
    }
    if let Some(dir) = overrides.cache_dir {
        settings.cache_dir = Some(dir);
    }
    if let Some(ms) = overrides.poll_interval_ms {
        settings.poll_interval_ms = ms;
    }

    settings.eviction = match (overrides.eviction, overrides.max_cache_bytes, settings.eviction) {
        (Some(Eviction::None), Some(_), _) => {
            warn!("--max-cache-bytes has no effect without LRU eviction");
            EvictionPolicy::NoEviction
        }
        (Some(Eviction::None), None, _) => EvictionPolicy::NoEviction,
        (Some(Eviction::Lru), max_bytes, _) => EvictionPolicy::LeastRecentlyUsed {
            max_bytes: max_bytes.unwrap_or(MAX_CACHE_BYTES),
        },
        (None, Some(max_bytes), EvictionPolicy::LeastRecentlyUsed { .. }) => {
            EvictionPolicy::LeastRecentlyUsed { max_bytes }
        }
        (None, Some(_), policy) => {
            warn!("--max-cache-bytes has no effect without LRU eviction");
            policy
        }
        (None, None, policy) => policy,
    };

    settings.validate()?;
    Ok(settings)
}

fn cache_dir(settings: &Settings) -> PathBuf {
    settings.cache_dir.clone().unwrap_or_else(default_cache_dir)
}

/// What a playback session did, printed on exit
#[derive(Debug, Serialize)]
struct PlaybackSummary {
    media_uri: String,
    session_id: String,
    events: BTreeMap<&'static str, usize>,
    cache_spans: usize,
    cache_bytes: u64,
}

/// Play the configured stream until Ctrl-C or `duration` seconds elapse
pub async fn play(settings: Settings, duration: Option<u64>, format: &str) -> anyhow::Result<()> {
    tapedeck_core::init();

    let dir = cache_dir(&settings);
    let provider = CacheProvider::open(&dir, settings.eviction)?;
    let cache = provider.get_cache();
    info!(cache_dir = %dir.display(), eviction = %settings.eviction, "Cache ready");

    let config = assemble(&settings, cache.clone())?;
    let engine: Arc<dyn MediaEngine> = Arc::new(HeadlessEngine::new(&config));
    let sink: Arc<dyn LogSink> = Arc::new(TracingSink);

    let options = HostOptions {
        media: config.media.clone(),
        seek_parameters: config.seek_parameters,
        track_selector_parameters: config.track_selector_parameters.clone(),
        poll_interval: settings.poll_interval(),
    };
    let host = PlayerHost::create(engine, sink, options).await?;
    host.resume();

    match duration {
        Some(secs) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    host.pause();
    let collector = host.collector().clone();
    let mut events = BTreeMap::new();
    for record in collector.records() {
        *events.entry(record.kind().name()).or_insert(0) += 1;
    }
    host.shutdown().await;
    cache.flush()?;

    let summary = PlaybackSummary {
        media_uri: settings.media_uri.clone(),
        session_id: collector.session_id().to_string(),
        events,
        cache_spans: cache.spans().len(),
        cache_bytes: cache.total_bytes(),
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", to_json(&summary)),
        OutputFormat::Text | OutputFormat::Table => {
            println!("\nPlayback Summary:");
            println!("  Media: {}", summary.media_uri);
            println!("  Session: {}", summary.session_id);
            println!(
                "  Cache: {} spans, {}",
                summary.cache_spans,
                human_bytes(summary.cache_bytes)
            );
            println!("\nEvents:");
            for (name, count) in &summary.events {
                println!("  {name}: {count}");
            }
        }
    }

    Ok(())
}

/// List cached spans
pub fn cache_list(settings: &Settings, format: &str) -> anyhow::Result<()> {
    let dir = cache_dir(settings);
    let provider = CacheProvider::open(&dir, settings.eviction)?;
    let cache = provider.get_cache();
    let spans = cache.spans();
    let format = OutputFormat::from(format);

    if format == OutputFormat::Json {
        println!("{}", format_spans(&spans, format));
        return Ok(());
    }

    println!("Cache: {}", dir.display());
    println!(
        "  Spans: {}  Total: {}",
        spans.len(),
        human_bytes(cache.total_bytes())
    );
    if !spans.is_empty() {
        println!("{}", format_spans(&spans, format));
    }

    Ok(())
}

/// Remove every cached span
pub fn cache_clear(settings: &Settings) -> anyhow::Result<()> {
    let dir = cache_dir(settings);
    let provider = CacheProvider::open(&dir, settings.eviction)?;
    let removed = provider.get_cache().clear()?;
    println!("Removed {} spans from {}", removed, dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_defaults() {
        let overrides = PlayOverrides {
            uri: Some("http://localhost/stream.mp3".to_string()),
            cache_dir: Some(PathBuf::from("/tmp/tapedeck")),
            poll_interval_ms: Some(250),
            ..Default::default()
        };
        let settings = load_settings(None, overrides).unwrap();
        assert_eq!(settings.media_uri, "http://localhost/stream.mp3");
        assert_eq!(settings.cache_dir, Some(PathBuf::from("/tmp/tapedeck")));
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));
        assert_eq!(settings.eviction, EvictionPolicy::NoEviction);
    }

    #[test]
    fn test_lru_defaults_to_max_cache_bytes() {
        let overrides = PlayOverrides {
            eviction: Some(Eviction::Lru),
            ..Default::default()
        };
        let settings = load_settings(None, overrides).unwrap();
        assert_eq!(
            settings.eviction,
            EvictionPolicy::LeastRecentlyUsed { max_bytes: MAX_CACHE_BYTES }
        );
    }

    #[test]
    fn test_max_cache_bytes_ignored_without_lru() {
        let overrides = PlayOverrides {
            max_cache_bytes: Some(1024),
            ..Default::default()
        };
        let settings = load_settings(None, overrides).unwrap();
        assert_eq!(settings.eviction, EvictionPolicy::NoEviction);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let overrides = PlayOverrides {
            eviction: Some(Eviction::Lru),
            max_cache_bytes: Some(0),
            ..Default::default()
        };
        assert!(load_settings(None, overrides).is_err());
    }
}
