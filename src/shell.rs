//! View-state resolution for the UI shell.

use std::f32::consts::TAU;
use std::time::Duration;

use serde::Serialize;

use crate::capture::CaptureState;

/// Time for the eye's pupil to sweep left, right and back.
pub const PUPIL_SWEEP_PERIOD: Duration = Duration::from_secs(3);

/// Largest pupil displacement, as a fraction of the eye's width.
const PUPIL_TRAVEL: f32 = 0.25;

/// The four mutually exclusive things the shell can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    /// Models still loading: loading indicator, open control disabled.
    LoadingModels,
    /// Ready and closed: open control.
    Idle,
    /// Capture requested, no frame yet: loading indicator.
    AwaitingFrame,
    /// Frames flowing: video, overlay, glyph and close control.
    Live,
}

/// The single button the shell shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Open { enabled: bool },
    Close,
}

impl ViewState {
    pub fn resolve(models_ready: bool, capture: CaptureState) -> Self {
        if !models_ready {
            return ViewState::LoadingModels;
        }
        match (capture.is_open, capture.has_frame_data) {
            (false, _) => ViewState::Idle,
            (true, false) => ViewState::AwaitingFrame,
            (true, true) => ViewState::Live,
        }
    }

    pub fn shows_loading(&self) -> bool {
        matches!(self, ViewState::LoadingModels | ViewState::AwaitingFrame)
    }

    pub fn shows_video(&self) -> bool {
        matches!(self, ViewState::Live)
    }

    pub fn control(&self) -> Control {
        match self {
            ViewState::LoadingModels => Control::Open { enabled: false },
            ViewState::Idle => Control::Open { enabled: true },
            ViewState::AwaitingFrame | ViewState::Live => Control::Close,
        }
    }

    pub fn eye(&self) -> EyeIcon {
        if self.shows_video() {
            EyeIcon::Open
        } else {
            EyeIcon::Closed
        }
    }
}

/// Eye icon: open while a live frame is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeIcon {
    Open,
    Closed,
}

impl EyeIcon {
    /// Horizontal pupil offset as a fraction of the eye's width. The open eye
    /// looks slowly from side to side; the closed eye has no pupil motion.
    pub fn pupil_offset(&self, elapsed: Duration) -> f32 {
        match self {
            EyeIcon::Closed => 0.0,
            EyeIcon::Open => {
                let phase = elapsed.as_secs_f32() / PUPIL_SWEEP_PERIOD.as_secs_f32();
                (phase * TAU).sin() * PUPIL_TRAVEL
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(is_open: bool, has_frame_data: bool) -> CaptureState {
        CaptureState {
            is_open,
            has_frame_data,
        }
    }

    #[test]
    fn resolves_all_four_states() {
        assert_eq!(ViewState::resolve(false, capture(false, false)), ViewState::LoadingModels);
        assert_eq!(ViewState::resolve(true, capture(false, false)), ViewState::Idle);
        assert_eq!(ViewState::resolve(true, capture(true, false)), ViewState::AwaitingFrame);
        assert_eq!(ViewState::resolve(true, capture(true, true)), ViewState::Live);
    }

    #[test]
    fn loading_models_disables_open() {
        let state = ViewState::resolve(false, capture(false, false));
        assert_eq!(state.control(), Control::Open { enabled: false });
        assert!(state.shows_loading());
        assert_eq!(state.eye(), EyeIcon::Closed);
    }

    #[test]
    fn awaiting_frame_looks_like_loading_but_can_close() {
        let state = ViewState::AwaitingFrame;
        assert!(state.shows_loading());
        assert!(!state.shows_video());
        assert_eq!(state.control(), Control::Close);
    }

    #[test]
    fn live_opens_the_eye() {
        let state = ViewState::Live;
        assert!(state.shows_video());
        assert!(!state.shows_loading());
        assert_eq!(state.eye(), EyeIcon::Open);
    }

    #[test]
    fn pupil_sweeps_only_when_open() {
        let quarter = PUPIL_SWEEP_PERIOD / 4;
        assert!((EyeIcon::Open.pupil_offset(quarter) - PUPIL_TRAVEL).abs() < 1e-4);
        assert!(EyeIcon::Open.pupil_offset(Duration::ZERO).abs() < 1e-6);
        assert_eq!(EyeIcon::Closed.pupil_offset(quarter), 0.0);
    }
}
