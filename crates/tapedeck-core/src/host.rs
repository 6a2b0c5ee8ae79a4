//! Application lifecycle
//!
//! [`PlayerHost`] owns the engine, the analytics collector and the status
//! poller, and exposes the lifecycle transitions the application drives
//! explicitly.

use crate::engine::MediaEngine;
use crate::events::PlayerListener;
use crate::observer::{AnalyticsCollector, EventLogger, LogSink};
use crate::poller::{EngineProbe, PollerState, StatusPoller};
use crate::seek::SeekParameters;
use crate::track::TrackSelectorParameters;
use crate::types::MediaReference;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// What the host needs besides the engine
pub struct HostOptions {
    pub media: MediaReference,
    pub seek_parameters: SeekParameters,
    pub track_selector_parameters: TrackSelectorParameters,
    pub poll_interval: Duration,
}

pub struct PlayerHost {
    engine: Arc<dyn MediaEngine>,
    collector: Arc<AnalyticsCollector>,
    poller: StatusPoller,
}

impl PlayerHost {
    /// Wire listeners, set the media item, prepare and start playing.
    ///
    /// The event logger and the collector are both registered with the
    /// engine; the poller is created stopped and starts on [`resume`](Self::resume).
    pub async fn create(
        engine: Arc<dyn MediaEngine>,
        sink: Arc<dyn LogSink>,
        options: HostOptions,
    ) -> Result<Self> {
        let collector = Arc::new(AnalyticsCollector::new(sink.clone()));
        engine.add_listener(Arc::new(EventLogger::new(sink.clone())));
        engine.add_listener(collector.clone());

        engine
            .set_track_selector_parameters(options.track_selector_parameters)
            .await;
        engine.set_seek_parameters(options.seek_parameters).await;

        info!(media = %options.media, session_id = %collector.session_id(), "Starting playback");
        engine.set_media_item(options.media).await?;
        engine.prepare().await?;
        engine.play().await?;

        let poller = StatusPoller::with_period(
            Arc::new(EngineProbe(engine.clone())),
            sink,
            options.poll_interval,
        );

        Ok(Self {
            engine,
            collector,
            poller,
        })
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub fn collector(&self) -> &Arc<AnalyticsCollector> {
        &self.collector
    }

    pub fn poller_state(&self) -> PollerState {
        self.poller.state()
    }

    /// Register an extra analytics listener
    pub fn add_analytics_listener(&self, listener: Arc<dyn PlayerListener>) {
        self.collector.add_listener(listener);
    }

    /// Start the status poll
    pub fn resume(&self) {
        self.poller.start();
    }

    /// Stop the status poll
    pub fn pause(&self) {
        self.poller.stop();
    }

    /// Stop polling and release the engine
    pub async fn shutdown(self) {
        self.poller.stop();
        self.engine.release().await;
        self.collector.release();
        info!("Player host shut down");
    }
}
