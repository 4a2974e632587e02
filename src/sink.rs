//! The video sink: the latest decoded frame of the active capture session.

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::capture::SessionId;
use crate::error::Result;
use crate::types::{Frame, FrameSize};

/// Sender half of the once-per-session "first frame decoded" event.
///
/// Resolves with the native frame size, or with the acquisition error when
/// the camera could not be opened.
pub(crate) type FirstFrameTx = oneshot::Sender<Result<FrameSize>>;

#[derive(Default)]
struct SinkState {
    session: Option<SessionId>,
    playing: bool,
    frame: Option<Frame>,
    first_frame: Option<FirstFrameTx>,
}

/// Shared between the capture pump (writer), the inference loop and the UI
/// (readers). Every accessor is scoped to a session so that writers and
/// readers from a closed session see nothing.
#[derive(Default)]
pub struct VideoSink {
    state: Mutex<SinkState>,
}

impl VideoSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&self, session: SessionId, first_frame: FirstFrameTx) {
        let mut state = self.state.lock();
        *state = SinkState {
            session: Some(session),
            playing: false,
            frame: None,
            first_frame: Some(first_frame),
        };
    }

    /// Start playback for the bound session. Returns false if the sink has
    /// been rebound or cleared since.
    pub(crate) fn play(&self, session: SessionId) -> bool {
        let mut state = self.state.lock();
        if state.session != Some(session) {
            return false;
        }
        state.playing = true;
        true
    }

    pub fn pause(&self) {
        self.state.lock().playing = false;
    }

    /// Store a decoded frame. Fires the first-frame event on the first frame
    /// of the session. Returns false when the session is no longer bound, in
    /// which case the pump should stop.
    pub(crate) fn present(&self, session: SessionId, frame: Frame) -> bool {
        let mut state = self.state.lock();
        if state.session != Some(session) {
            return false;
        }
        if !state.playing {
            return true;
        }
        let size = frame.size();
        state.frame = Some(frame);
        if let Some(tx) = state.first_frame.take() {
            log::debug!("Session {} decoded its first frame ({})", session, size);
            // The waiter may already be gone; nothing to do then.
            let _ = tx.send(Ok(size));
        }
        true
    }

    /// Hand the pending first-frame sender to the caller, e.g. to report an
    /// acquisition failure through it.
    pub(crate) fn take_first_frame(&self, session: SessionId) -> Option<FirstFrameTx> {
        let mut state = self.state.lock();
        if state.session != Some(session) {
            return None;
        }
        state.first_frame.take()
    }

    /// Unbind the session. Drops the pending first-frame sender, which
    /// unsubscribes any waiter.
    pub(crate) fn clear(&self) {
        *self.state.lock() = SinkState::default();
    }

    pub fn is_live(&self, session: SessionId) -> bool {
        let state = self.state.lock();
        state.session == Some(session) && state.playing
    }

    pub fn has_frame(&self, session: SessionId) -> bool {
        let state = self.state.lock();
        state.session == Some(session) && state.frame.is_some()
    }

    pub fn current_frame(&self, session: SessionId) -> Option<Frame> {
        let state = self.state.lock();
        if state.session != Some(session) || !state.playing {
            return None;
        }
        state.frame.clone()
    }

    /// Latest frame of whatever session is bound, for display.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.state.lock().frame.clone()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.state.lock().session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame() -> Frame {
        Frame::new(RgbImage::new(8, 6))
    }

    #[test]
    fn first_frame_fires_once() {
        let sink = VideoSink::new();
        let session = SessionId::new(1);
        let (tx, mut rx) = oneshot::channel();
        sink.bind(session, tx);
        assert!(sink.play(session));

        assert!(sink.present(session, frame()));
        assert_eq!(rx.try_recv().unwrap().unwrap(), FrameSize::new(8, 6));
        assert!(sink.present(session, frame()));
        assert!(sink.take_first_frame(session).is_none());
        assert!(sink.has_frame(session));
    }

    #[test]
    fn paused_sink_drops_frames() {
        let sink = VideoSink::new();
        let session = SessionId::new(1);
        let (tx, mut rx) = oneshot::channel();
        sink.bind(session, tx);

        assert!(sink.present(session, frame()));
        assert!(rx.try_recv().is_err());
        assert!(sink.current_frame(session).is_none());
    }

    #[test]
    fn stale_session_is_rejected() {
        let sink = VideoSink::new();
        let old = SessionId::new(1);
        let new = SessionId::new(2);
        let (tx, _rx) = oneshot::channel();
        sink.bind(new, tx);
        sink.play(new);

        assert!(!sink.play(old));
        assert!(!sink.present(old, frame()));
        assert!(!sink.is_live(old));
        assert!(sink.is_live(new));
    }

    #[test]
    fn clear_unsubscribes_waiter() {
        let sink = VideoSink::new();
        let session = SessionId::new(3);
        let (tx, mut rx) = oneshot::channel();
        sink.bind(session, tx);
        sink.clear();

        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(sink.session().is_none());
        assert!(sink.latest_frame().is_none());
    }
}
