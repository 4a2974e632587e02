//! The periodic inference loop.
//!
//! Once a session's first frame is decoded, a timer fires every tick period.
//! Each tick grabs the sink's current frame and hands it to the detector on
//! the blocking pool without waiting for the result, so a slow detection
//! never delays the next tick. Results are applied to the overlay target in
//! the order they complete, and only while the target still belongs to the
//! session that produced them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::capture::SessionId;
use crate::detection::{DetectOptions, Detector};
use crate::error::{Error, Result};
use crate::overlay::OverlayTarget;
use crate::sink::VideoSink;
use crate::types::Frame;

/// Default tick period.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Counters shared by every tick of every session.
#[derive(Debug, Default)]
pub struct TickStats {
    ticks: AtomicU64,
    submitted: AtomicU64,
    failed: AtomicU64,
    stale: AtomicU64,
}

impl TickStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Frames handed to the detector.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Detections that returned an error or panicked.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Results discarded because their session had ended.
    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }
}

/// Handle to a running tick timer. Cancelling (or dropping) stops the timer
/// immediately; detections already in flight finish on the blocking pool but
/// their results are discarded by the liveness check.
#[derive(Debug)]
pub struct TickHandle {
    session: SessionId,
    task: JoinHandle<()>,
}

impl TickHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct InferenceLoop {
    detector: Arc<dyn Detector>,
    options: DetectOptions,
    interval: Duration,
    stats: Arc<TickStats>,
}

impl InferenceLoop {
    /// Fails on a zero `interval`, which no timer can honour.
    pub fn new(detector: Arc<dyn Detector>, options: DetectOptions, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("tick interval must be positive".to_string()));
        }
        Ok(Self {
            detector,
            options,
            interval,
            stats: Arc::new(TickStats::default()),
        })
    }

    pub fn stats(&self) -> &Arc<TickStats> {
        &self.stats
    }

    /// Start ticking for `session`. Must be called from within a tokio runtime.
    pub fn start(
        &self,
        session: SessionId,
        sink: Arc<VideoSink>,
        target: Arc<OverlayTarget>,
    ) -> TickHandle {
        log::info!(
            "Starting inference for session {} every {:?} with {}",
            session,
            self.interval,
            self.detector.name()
        );
        let ticker = Ticker {
            session,
            sink,
            target,
            detector: Arc::clone(&self.detector),
            options: self.options,
            stats: Arc::clone(&self.stats),
        };
        let interval = self.interval;
        let task = tokio::spawn(async move { ticker.run(interval).await });
        TickHandle { session, task }
    }
}

struct Ticker {
    session: SessionId,
    sink: Arc<VideoSink>,
    target: Arc<OverlayTarget>,
    detector: Arc<dyn Detector>,
    options: DetectOptions,
    stats: Arc<TickStats>,
}

impl Ticker {
    async fn run(self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        // Keep the wall-clock cadence; do not burst to catch up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let tick = self.stats.ticks.fetch_add(1, Ordering::Relaxed) + 1;

            if !(self.sink.is_live(self.session) && self.target.is_live(self.session)) {
                log::trace!("Tick {} skipped: session {} not live", tick, self.session);
                continue;
            }
            let Some(frame) = self.sink.current_frame(self.session) else {
                continue;
            };

            self.stats.submitted.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(detect_and_apply(
                tick,
                self.session,
                frame,
                Arc::clone(&self.detector),
                self.options,
                Arc::clone(&self.target),
                Arc::clone(&self.stats),
            ));
        }
    }
}

async fn detect_and_apply(
    tick: u64,
    session: SessionId,
    frame: Frame,
    detector: Arc<dyn Detector>,
    options: DetectOptions,
    target: Arc<OverlayTarget>,
    stats: Arc<TickStats>,
) {
    let native = frame.size();
    let result = tokio::task::spawn_blocking(move || detector.detect(&frame, options)).await;

    let batch = match result {
        Ok(Ok(batch)) => batch,
        Ok(Err(e)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("Tick {} detection failed: {}", tick, e);
            return;
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("Tick {} detector task aborted: {}", tick, e);
            return;
        }
    };

    match target.apply(session, native, &batch) {
        Some(happy) => {
            log::debug!("Tick {}: {} face(s), happy={}", tick, batch.len(), happy);
        }
        None => {
            stats.stale.fetch_add(1, Ordering::Relaxed);
            log::debug!("Tick {} result dropped: session {} closed", tick, session);
        }
    }
}
