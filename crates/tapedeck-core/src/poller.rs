//! Periodic status poll
//!
//! [`StatusPoller`] reads one engine property every period and logs it. It
//! has two states: [`PollerState::Scheduled`] while a tick is pending and
//! [`PollerState::Stopped`] otherwise.

use crate::engine::MediaEngine;
use crate::observer::{LogSink, LOG_TAG};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Property read on every tick
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn is_current_window_seekable(&self) -> bool;
}

/// Probes a [`MediaEngine`]
pub struct EngineProbe(pub Arc<dyn MediaEngine>);

#[async_trait]
impl StatusProbe for EngineProbe {
    async fn is_current_window_seekable(&self) -> bool {
        self.0.is_current_window_seekable().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Scheduled,
    Stopped,
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerState::Scheduled => write!(f, "scheduled"),
            PollerState::Stopped => write!(f, "stopped"),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    /// Cleared by `stop()`; a tick writes only while holding it set
    live: Arc<Mutex<bool>>,
    handle: JoinHandle<()>,
}

/// Logs `update: player.is_current_window_seekable = <value>` once per period
pub struct StatusPoller {
    probe: Arc<dyn StatusProbe>,
    sink: Arc<dyn LogSink>,
    period: Duration,
    running: Mutex<Option<Running>>,
}

impl StatusPoller {
    pub fn new(probe: Arc<dyn StatusProbe>, sink: Arc<dyn LogSink>) -> Self {
        Self::with_period(probe, sink, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_period(probe: Arc<dyn StatusProbe>, sink: Arc<dyn LogSink>, period: Duration) -> Self {
        Self {
            probe,
            sink,
            period,
            running: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> PollerState {
        if self.lock().is_some() {
            PollerState::Scheduled
        } else {
            PollerState::Stopped
        }
    }

    /// Schedule the first tick one period from now. Must be called inside a
    /// tokio runtime; does nothing while already scheduled.
    pub fn start(&self) {
        let mut running = self.lock();
        if running.is_some() {
            debug!("Poller already scheduled");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let live = Arc::new(Mutex::new(true));
        let gate = live.clone();
        let probe = self.probe.clone();
        let sink = self.sink.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                let seekable = probe.is_current_window_seekable().await;
                let logged = {
                    let live = lock(&gate);
                    if *live {
                        sink.write(
                            LOG_TAG,
                            &format!("update: player.is_current_window_seekable = {seekable}"),
                        );
                    }
                    *live
                };
                if !logged {
                    break;
                }
            }
        });

        *running = Some(Running {
            cancel,
            live,
            handle,
        });
        debug!(period_ms = period.as_millis() as u64, "Poller scheduled");
    }

    /// Cancel the pending tick; no tick is logged after this returns.
    /// Does nothing while stopped.
    pub fn stop(&self) {
        if let Some(running) = self.lock().take() {
            // Waits out a tick that is mid-write
            *lock(&running.live) = false;
            running.cancel.cancel();
            running.handle.abort();
            debug!("Poller stopped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        lock(&self.running)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::MemorySink;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedProbe(AtomicBool);

    #[async_trait]
    impl StatusProbe for FixedProbe {
        async fn is_current_window_seekable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn poller(seekable: bool) -> (Arc<MemorySink>, StatusPoller) {
        let sink = Arc::new(MemorySink::new());
        let poller = StatusPoller::new(Arc::new(FixedProbe(AtomicBool::new(seekable))), sink.clone());
        (sink, poller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_second_until_stopped() {
        let (sink, poller) = poller(true);
        poller.start();
        assert_eq!(poller.state(), PollerState::Scheduled);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(sink.len(), 0);

        // Ticks at 1 s, 2 s and 3 s
        tokio::time::sleep(Duration::from_millis(2501)).await;
        assert_eq!(sink.len(), 3);

        poller.stop();
        assert_eq!(poller.state(), PollerState::Stopped);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.len(), 3);
        assert!(sink
            .messages()
            .iter()
            .all(|m| m == "update: player.is_current_window_seekable = true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_scheduled_is_noop() {
        let (sink, poller) = poller(false);
        poller.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        poller.start();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.messages()[0], "update: player.is_current_window_seekable = false");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_stopped_is_noop() {
        let (sink, poller) = poller(true);
        poller.stop();
        assert_eq!(poller.state(), PollerState::Stopped);

        poller.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        poller.stop();
        poller.stop();

        // Restart posts a fresh first tick one period later
        poller.start();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(sink.len(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_tick_after_stop_on_worker_threads() {
        let sink = Arc::new(MemorySink::new());
        let poller = StatusPoller::with_period(
            Arc::new(FixedProbe(AtomicBool::new(true))),
            sink.clone(),
            Duration::from_millis(1),
        );

        for _ in 0..50 {
            poller.start();
            tokio::time::sleep(Duration::from_millis(3)).await;
            poller.stop();

            let logged = sink.len();
            tokio::time::sleep(Duration::from_millis(3)).await;
            assert_eq!(sink.len(), logged);
        }
    }
}
