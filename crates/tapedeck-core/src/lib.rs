//! Tapedeck Core - headless streaming-audio player harness
//!
//! This crate provides the pieces the `tapedeck` demo wires together:
//! - Buffer policy and load control
//! - On-disk media cache with pluggable eviction
//! - Layered data sources (read-through cache over HTTP)
//! - Extractor flags, track selection and seek parameters
//! - A headless reference engine emitting player events
//! - Event logging, analytics collection and a periodic status poll
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Tapedeck Core                         │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐         │
//! │  │   Settings   │  │    Cache     │  │  HTTP data   │         │
//! │  │              │  │   Provider   │  │    source    │         │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘         │
//! │         │                 │                 │                 │
//! │         └─────────────────┼─────────────────┘                 │
//! │                           │                                   │
//! │                    ┌──────┴──────┐                            │
//! │                    │  Assembler  │                            │
//! │                    └──────┬──────┘                            │
//! │                           │                                   │
//! │                    ┌──────┴──────┐                            │
//! │                    │   Engine    │                            │
//! │                    └──────┬──────┘                            │
//! │                           │ events                            │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐          │
//! │  │    Event     │  │  Analytics  │  │    Status    │          │
//! │  │    Logger    │  │  Collector  │  │    Poller    │          │
//! │  └──────────────┘  └─────────────┘  └──────────────┘          │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod buffer;
pub mod cache;
pub mod datasource;
pub mod extractor;
pub mod track;
pub mod seek;
pub mod settings;
pub mod assembler;
pub mod events;
pub mod observer;
pub mod poller;
pub mod engine;
pub mod host;

pub use error::{Error, Result};
pub use types::*;
pub use buffer::{AllocatorConfig, BufferPolicy, LoadController};
pub use cache::{Cache, CacheProvider, EvictionPolicy};
pub use datasource::{
    CacheDataSourceFactory, DataSource, DataSourceFactory, DataSpec, DefaultDataSourceFactory,
    HttpDataSourceFactory,
};
pub use extractor::ExtractorFlags;
pub use track::{BandwidthMeter, DefaultTrackSelector, TrackSelectorParameters};
pub use seek::SeekParameters;
pub use settings::Settings;
pub use assembler::{assemble, EngineConfig};
pub use events::{EventKind, PlayerEvent, PlayerListener};
pub use observer::{AnalyticsCollector, EventLogger, LogSink, MemorySink, TracingSink};
pub use poller::{PollerState, StatusPoller};
pub use engine::{HeadlessEngine, MediaEngine};
pub use host::{HostOptions, PlayerHost};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log library startup
pub fn init() {
    tracing::info!(version = VERSION, "Tapedeck Core initialized");
}
