//! `FaceMonitor`: capture, inference and overlay composed behind one handle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::{CaptureController, CaptureState, Camera, FirstFrame, SessionId};
use crate::config::MonitorConfig;
use crate::detection::Detector;
use crate::error::{Error, Result};
use crate::inference::{InferenceLoop, TickHandle, TickStats};
use crate::models::{self, ModelLoader};
use crate::overlay::{OverlayRenderer, OverlayTarget};
use crate::shell::ViewState;
use crate::sink::VideoSink;

#[derive(Default)]
struct SessionTasks {
    /// Waits for the session's first frame, then starts the ticks.
    waiter: Option<JoinHandle<()>>,
    ticks: Option<TickHandle>,
}

struct Inner {
    config: MonitorConfig,
    controller: Arc<CaptureController>,
    inference: InferenceLoop,
    target: Arc<OverlayTarget>,
    models_ready: watch::Sender<bool>,
    tasks: Mutex<SessionTasks>,
    last_error: Mutex<Option<String>>,
}

/// The happiness monitor.
///
/// `open` and `load_models` spawn tokio tasks and must be called from within
/// a runtime. Dropping the monitor closes any open session.
pub struct FaceMonitor {
    inner: Arc<Inner>,
}

impl FaceMonitor {
    /// Build a monitor; fails if `config` does not validate.
    pub fn new(
        config: MonitorConfig,
        camera: Arc<dyn Camera>,
        detector: Arc<dyn Detector>,
    ) -> Result<Self> {
        config.validate()?;
        let sink = Arc::new(VideoSink::new());
        let controller = Arc::new(CaptureController::new(camera, sink, config.constraints()));
        let renderer = OverlayRenderer::new(config.display, config.render_mode);
        let target = Arc::new(OverlayTarget::new(renderer, config.fade()));
        let inference = InferenceLoop::new(detector, config.detect, config.tick_interval())?;
        let (models_ready, _) = watch::channel(false);

        log::debug!(
            "Monitor configured: display {}, {:?} mode, tick {:?}",
            config.display,
            config.render_mode,
            config.tick_interval()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                controller,
                inference,
                target,
                models_ready,
                tasks: Mutex::new(SessionTasks::default()),
                last_error: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Load every asset of the configured manifest.
    ///
    /// Readiness flips to true exactly once, after all loads succeed. On
    /// failure the monitor stays in the loading state and the error is kept
    /// for display; calling again retries.
    pub async fn load_models(&self, loader: Arc<dyn ModelLoader>) -> Result<()> {
        if self.models_ready() {
            return Ok(());
        }
        match models::load_all(loader, &self.inner.config.models).await {
            Ok(count) => {
                log::info!("{} model asset(s) loaded, monitor ready", count);
                *self.inner.last_error.lock() = None;
                self.inner.models_ready.send_replace(true);
                Ok(())
            }
            Err(e) => {
                log::error!("Model loading failed: {}", e);
                *self.inner.last_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn models_ready(&self) -> bool {
        *self.inner.models_ready.borrow()
    }

    pub fn subscribe_models_ready(&self) -> watch::Receiver<bool> {
        self.inner.models_ready.subscribe()
    }

    /// Request the camera. Inference starts by itself once frames flow.
    pub fn open(&self) -> Result<()> {
        if !self.models_ready() {
            return Err(Error::ModelsNotReady);
        }
        let mut tasks = self.inner.tasks.lock();
        let Some(first) = self.inner.controller.open()? else {
            return Ok(());
        };
        *self.inner.last_error.lock() = None;

        // A waiter left over from a failed session must not report into
        // this one.
        if let Some(stale) = tasks.waiter.take() {
            stale.abort();
        }
        let inner = Arc::clone(&self.inner);
        tasks.waiter = Some(tokio::spawn(inner.await_first_frame(first)));
        Ok(())
    }

    /// Stop ticking, release the camera and clear the overlay. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn capture_state(&self) -> CaptureState {
        self.inner.controller.state()
    }

    pub fn view_state(&self) -> ViewState {
        ViewState::resolve(self.models_ready(), self.capture_state())
    }

    pub fn session(&self) -> Option<SessionId> {
        self.inner.controller.session()
    }

    pub fn is_happy(&self) -> bool {
        self.inner.target.is_happy()
    }

    pub fn subscribe_happiness(&self) -> watch::Receiver<bool> {
        self.inner.target.subscribe()
    }

    pub fn overlay(&self) -> &Arc<OverlayTarget> {
        &self.inner.target
    }

    pub fn sink(&self) -> &Arc<VideoSink> {
        self.inner.controller.sink()
    }

    pub fn stats(&self) -> &Arc<TickStats> {
        self.inner.inference.stats()
    }

    /// Most recent user-facing failure (model load or camera acquisition).
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }
}

impl Drop for FaceMonitor {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Inner {
    async fn await_first_frame(self: Arc<Self>, first: FirstFrame) {
        let session = first.session();
        match first.wait().await {
            Some(Ok(native)) => {
                let mut tasks = self.tasks.lock();
                if !self.controller.is_current(session) {
                    return;
                }
                log::info!("Session {} is live at {}, starting inference", session, native);
                self.target.attach(session);
                tasks.ticks = Some(self.inference.start(
                    session,
                    Arc::clone(self.controller.sink()),
                    Arc::clone(&self.target),
                ));
                tasks.waiter = None;
            }
            Some(Err(e)) => {
                let _tasks = self.tasks.lock();
                if self.controller.session().is_none() {
                    *self.last_error.lock() = Some(e.to_string());
                } else {
                    log::debug!("Dropping failure of session {}: {}", session, e);
                }
            }
            None => {
                log::debug!("Session {} closed before its first frame", session);
            }
        }
    }

    fn close(&self) {
        let mut tasks = self.tasks.lock();
        if let Some(ticks) = tasks.ticks.take() {
            ticks.cancel();
        }
        if let Some(waiter) = tasks.waiter.take() {
            waiter.abort();
        }
        self.controller.close();
        self.target.detach();
    }
}
