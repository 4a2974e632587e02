//! Camera lifecycle: acquiring a stream, pumping frames into the video sink
//! and tearing the stream down again.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::sink::VideoSink;
use crate::types::{Frame, FrameSize};

/// Identity of one open → close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the caller asks of the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConstraints {
    pub video: bool,
    pub audio: bool,
    /// Preferred frame width; the camera picks the closest mode it has.
    pub width_hint: Option<u32>,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: false,
            width_hint: Some(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// A hardware track of a media stream. Stopping releases the device.
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Stop the track. Must be idempotent and must not block on the device.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// A granted media stream. Lives on the capture thread that requested it.
pub trait MediaStream {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    /// Block until the next frame is decoded. `Ok(None)` once the stream has
    /// ended, e.g. because its tracks were stopped.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Platform media-capture capability.
pub trait Camera: Send + Sync + 'static {
    /// Request a stream. May block while the user or the OS grants access.
    fn request_stream(&self, constraints: &StreamConstraints) -> Result<Box<dyn MediaStream>>;

    /// Camera name (for logging/debugging).
    fn name(&self) -> &str;
}

/// Capture flags as seen by the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureState {
    pub is_open: bool,
    pub has_frame_data: bool,
}

/// One-shot subscription to the first decoded frame of a session.
pub struct FirstFrame {
    session: SessionId,
    rx: oneshot::Receiver<Result<FrameSize>>,
}

impl FirstFrame {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Wait for the first frame. `None` when the session was closed before
    /// a frame arrived; `Some(Err(_))` when the camera could not be acquired.
    pub async fn wait(self) -> Option<Result<FrameSize>> {
        self.rx.await.ok()
    }
}

struct ControllerState {
    session: Option<SessionId>,
    next_id: u64,
    tracks: Vec<Arc<dyn MediaTrack>>,
    /// Capture thread of the current session.
    pump: Option<JoinHandle<()>>,
}

/// Owns the camera lifecycle for a single video sink.
pub struct CaptureController {
    camera: Arc<dyn Camera>,
    sink: Arc<VideoSink>,
    constraints: StreamConstraints,
    state: Mutex<ControllerState>,
}

impl CaptureController {
    pub fn new(camera: Arc<dyn Camera>, sink: Arc<VideoSink>, constraints: StreamConstraints) -> Self {
        Self {
            camera,
            sink,
            constraints,
            state: Mutex::new(ControllerState {
                session: None,
                next_id: 1,
                tracks: Vec::new(),
                pump: None,
            }),
        }
    }

    /// Start a capture session.
    ///
    /// The session is open as soon as this returns; the grant and the frame
    /// pump run on a dedicated thread. Returns `None` if a session is
    /// already open.
    pub fn open(self: &Arc<Self>) -> Result<Option<FirstFrame>> {
        let mut state = self.state.lock();
        if state.session.is_some() {
            return Ok(None);
        }
        let session = SessionId::new(state.next_id);
        state.next_id += 1;
        state.session = Some(session);

        let (tx, rx) = oneshot::channel();
        self.sink.bind(session, tx);

        // The thread blocks on the state lock in `attach`, so the handle is
        // stored before any stream can be bound.
        let controller = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("capture-{}", session.get()))
            .spawn(move || controller.run_session(session));
        match spawned {
            Ok(pump) => state.pump = Some(pump),
            Err(e) => {
                drop(state);
                let err = Error::camera(format!("failed to start capture thread: {}", e));
                self.fail(session, err);
                return Err(Error::camera("capture thread unavailable"));
            }
        }
        drop(state);

        log::info!(
            "Opening capture session {} on {} (width hint {:?})",
            session,
            self.camera.name(),
            self.constraints.width_hint
        );

        Ok(Some(FirstFrame { session, rx }))
    }

    /// Stop the active session: pause the sink, stop every track and unbind
    /// the stream. Returns false when nothing was open.
    ///
    /// When a stream was granted, this waits for the capture thread to drop
    /// it, so the device is released on return. A grant still pending is
    /// released by the capture thread whenever it resolves.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        let Some(session) = state.session.take() else {
            return false;
        };
        self.sink.pause();
        let granted = !state.tracks.is_empty();
        for track in state.tracks.drain(..) {
            track.stop();
        }
        self.sink.clear();
        let pump = state.pump.take();
        drop(state);

        if let Some(pump) = pump.filter(|_| granted) {
            if pump.join().is_err() {
                log::warn!("Capture thread of session {} panicked", session);
            }
        }
        log::info!("Closed capture session {}", session);
        true
    }

    pub fn state(&self) -> CaptureState {
        let state = self.state.lock();
        match state.session {
            Some(session) => CaptureState {
                is_open: true,
                has_frame_data: self.sink.has_frame(session),
            },
            None => CaptureState::default(),
        }
    }

    pub fn session(&self) -> Option<SessionId> {
        self.state.lock().session
    }

    pub fn is_current(&self, session: SessionId) -> bool {
        self.state.lock().session == Some(session)
    }

    pub fn sink(&self) -> &Arc<VideoSink> {
        &self.sink
    }

    fn run_session(&self, session: SessionId) {
        let mut stream = match self.camera.request_stream(&self.constraints) {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(session, e);
                return;
            }
        };

        if !self.attach(session, stream.as_ref()) {
            log::debug!("Session {} closed before the stream was granted", session);
            return;
        }

        loop {
            match stream.next_frame() {
                Ok(Some(frame)) => {
                    if !self.sink.present(session, frame) {
                        break;
                    }
                }
                Ok(None) => {
                    log::debug!("Session {} stream ended", session);
                    break;
                }
                Err(e) => {
                    log::warn!("Session {} stream error: {}", session, e);
                    break;
                }
            }
        }

        for track in stream.tracks() {
            track.stop();
        }
    }

    /// Bind a granted stream if its session is still current; otherwise
    /// release it on the spot.
    fn attach(&self, session: SessionId, stream: &dyn MediaStream) -> bool {
        let tracks = stream.tracks();
        let mut state = self.state.lock();
        if state.session != Some(session) {
            drop(state);
            for track in &tracks {
                track.stop();
            }
            return false;
        }
        state.tracks = tracks;
        self.sink.play(session)
    }

    fn fail(&self, session: SessionId, err: Error) {
        log::error!("Capture session {} failed: {}", session, err);
        let mut state = self.state.lock();
        if state.session != Some(session) {
            return;
        }
        state.session = None;
        state.tracks.clear();
        state.pump = None;
        let tx = self.sink.take_first_frame(session);
        self.sink.clear();
        drop(state);

        if let Some(tx) = tx {
            let _ = tx.send(Err(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::{FlagTrack, StillCamera};
    use image::RgbImage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Hands out one shared track after `grant_delay`, and records when the
    /// stream holding the device is dropped.
    struct DeviceCamera {
        grant_delay: Duration,
        track: Arc<FlagTrack>,
        released: Arc<AtomicBool>,
    }

    impl DeviceCamera {
        fn new(grant_delay: Duration) -> Self {
            Self {
                grant_delay,
                track: Arc::new(FlagTrack::new()),
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct DeviceStream {
        track: Arc<FlagTrack>,
        released: Arc<AtomicBool>,
    }

    impl Camera for DeviceCamera {
        fn request_stream(&self, _: &StreamConstraints) -> Result<Box<dyn MediaStream>> {
            thread::sleep(self.grant_delay);
            Ok(Box::new(DeviceStream {
                track: Arc::clone(&self.track),
                released: Arc::clone(&self.released),
            }))
        }

        fn name(&self) -> &str {
            "device"
        }
    }

    impl MediaStream for DeviceStream {
        fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
            vec![self.track.clone()]
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if !self.track.is_live() {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(5));
            Ok(Some(Frame::new(RgbImage::new(8, 6))))
        }
    }

    impl Drop for DeviceStream {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn device_controller(camera: DeviceCamera) -> Arc<CaptureController> {
        Arc::new(CaptureController::new(
            Arc::new(camera),
            Arc::new(VideoSink::new()),
            StreamConstraints::default(),
        ))
    }

    struct DeniedCamera;

    impl Camera for DeniedCamera {
        fn request_stream(&self, _: &StreamConstraints) -> Result<Box<dyn MediaStream>> {
            Err(Error::camera("permission denied"))
        }

        fn name(&self) -> &str {
            "denied"
        }
    }

    fn still_controller() -> Arc<CaptureController> {
        let camera = StillCamera::new(RgbImage::new(64, 48)).with_frame_interval(Duration::from_millis(5));
        Arc::new(CaptureController::new(
            Arc::new(camera),
            Arc::new(VideoSink::new()),
            StreamConstraints::default(),
        ))
    }

    #[tokio::test]
    async fn open_reports_first_frame() {
        let controller = still_controller();
        let first = controller.open().unwrap().expect("session opened");
        assert!(controller.state().is_open);

        let size = first.wait().await.expect("not closed").expect("granted");
        // Frames are resized to the width hint.
        assert_eq!(size, FrameSize::new(300, 225));
        assert!(controller.state().has_frame_data);

        assert!(controller.close());
        assert_eq!(controller.state(), CaptureState::default());
    }

    #[tokio::test]
    async fn second_open_is_a_no_op() {
        let controller = still_controller();
        let first = controller.open().unwrap().unwrap();
        assert!(controller.open().unwrap().is_none());
        assert_eq!(controller.session(), Some(first.session()));
        controller.close();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let controller = still_controller();
        assert!(!controller.close());
        let _first = controller.open().unwrap();
        assert!(controller.close());
        assert!(!controller.close());
    }

    #[tokio::test]
    async fn denied_camera_reverts_to_closed() {
        let controller = Arc::new(CaptureController::new(
            Arc::new(DeniedCamera),
            Arc::new(VideoSink::new()),
            StreamConstraints::default(),
        ));
        let first = controller.open().unwrap().unwrap();
        let outcome = first.wait().await.expect("failure is reported");
        assert!(matches!(outcome, Err(Error::CameraAcquisition(_))));
        assert!(!controller.state().is_open);

        // Retry is allowed.
        assert!(controller.open().unwrap().is_some());
    }

    #[tokio::test]
    async fn close_releases_the_device_before_returning() {
        let camera = DeviceCamera::new(Duration::ZERO);
        let (track, released) = (camera.track.clone(), camera.released.clone());
        let controller = device_controller(camera);

        let first = controller.open().unwrap().unwrap();
        first.wait().await.expect("not closed").expect("granted");
        assert!(track.is_live());
        assert!(!released.load(Ordering::SeqCst));

        assert!(controller.close());
        assert!(!track.is_live());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn grant_after_close_is_stopped() {
        let camera = DeviceCamera::new(Duration::from_millis(50));
        let (track, released) = (camera.track.clone(), camera.released.clone());
        let controller = device_controller(camera);

        let first = controller.open().unwrap().unwrap();
        let session = first.session();
        // Closing during the grant does not wait for it.
        assert!(controller.close());
        assert!(track.is_live());
        assert!(first.wait().await.is_none());

        for _ in 0..100 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(released.load(Ordering::SeqCst));
        assert!(!track.is_live());
        assert!(!controller.sink().has_frame(session));
    }

    #[tokio::test]
    async fn close_before_first_frame_unsubscribes() {
        let camera = StillCamera::new(RgbImage::new(64, 48))
            .with_grant_delay(Duration::from_millis(50));
        let controller = Arc::new(CaptureController::new(
            Arc::new(camera),
            Arc::new(VideoSink::new()),
            StreamConstraints::default(),
        ));
        let first = controller.open().unwrap().unwrap();
        controller.close();
        assert!(first.wait().await.is_none());
    }
}
