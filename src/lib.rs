//! # happy-face
//!
//! A webcam happiness monitor: capture frames, run face and expression
//! detection on a fixed tick, and show whether anyone in view is smiling.
//!
//! This crate provides:
//! - **Capture**: camera lifecycle with session-scoped frame delivery
//!   ([`CaptureController`], [`VideoSink`])
//! - **Inference**: a cancellable fixed-period detection loop
//!   ([`InferenceLoop`], [`TickHandle`]) over any [`Detector`]
//! - **Detection**: SeetaFace face boxes, dlib ERT landmarks and expression
//!   scores derived from them ([`SeetaDetector`], [`ShapePredictor`],
//!   [`ExpressionEstimator`])
//! - **Overlay**: debug geometry or a fading happy glyph, scaled from camera
//!   resolution to the display ([`OverlayRenderer`], [`OverlayTarget`])
//! - **Shell**: the four view states the UI can be in ([`ViewState`])
//!
//! [`FaceMonitor`] wires all of it together.
//!
//! ## Session model
//!
//! Every `open` starts a new [`SessionId`]. Frames, ticks and detection
//! results carry the session they belong to, and are dropped once that
//! session is closed:
//!
//! 1. `open` marks capture open and requests the stream on a capture thread
//! 2. the first decoded frame fires a one-shot event that starts the ticks
//! 3. each tick submits the current frame to the detector without waiting
//! 4. results are drawn only if their session is still attached
//! 5. `close` cancels the ticks, stops the tracks and detaches the overlay
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use happy_face::{FaceMonitor, MonitorConfig, SeetaDetector, SeetaSettings, StillCamera};
//!
//! # async fn run() -> happy_face::Result<()> {
//! let detector = Arc::new(SeetaDetector::spawn(SeetaSettings::default())?);
//! let camera = Arc::new(StillCamera::open("faces/")?);
//!
//! let monitor = FaceMonitor::new(MonitorConfig::default(), camera, detector.clone())?;
//! monitor.load_models(detector).await?;
//! monitor.open()?;
//!
//! let mut happy = monitor.subscribe_happiness();
//! happy.changed().await.ok();
//! println!("happy: {}", *happy.borrow());
//! monitor.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Detectors
//!
//! Implement [`Detector`] to plug in any face/expression model:
//!
//! ```rust
//! use happy_face::{BoundingBox, DetectOptions, Detection, Detector, Frame};
//!
//! struct CenterFace;
//!
//! impl Detector for CenterFace {
//!     fn detect(&self, frame: &Frame, _options: DetectOptions) -> happy_face::Result<Vec<Detection>> {
//!         let size = frame.size();
//!         let (w, h) = (size.width as f32, size.height as f32);
//!         Ok(vec![Detection::new(BoundingBox::new(w / 4.0, h / 4.0, w / 2.0, h / 2.0))])
//!     }
//!
//!     fn name(&self) -> &str {
//!         "center"
//!     }
//! }
//! ```

mod affect;
pub mod cameras;
mod capture;
mod config;
mod detection;
pub mod dlib;
mod error;
mod expressions;
mod inference;
mod landmarks;
pub mod models;
mod monitor;
mod overlay;
mod seeta;
mod shell;
mod sink;
pub mod surface;
mod tree;
mod types;

pub use affect::{ActionUnits, ExpressionEstimator};

pub use cameras::StillCamera;
#[cfg(feature = "webcam")]
pub use cameras::Webcam;
pub use capture::{
    Camera, CaptureController, CaptureState, FirstFrame, MediaStream, MediaTrack, SessionId,
    StreamConstraints, TrackKind,
};
pub use config::MonitorConfig;
pub use detection::{resize_detections, DetectOptions, Detection, Detector};
pub use error::{Error, Result};
pub use expressions::{happiness_flag, Expression, Expressions, HAPPY_THRESHOLD};
pub use inference::{InferenceLoop, TickHandle, TickStats, TICK_INTERVAL};
pub use landmarks::{ShapePredictor, IBUG_LANDMARKS};
pub use models::{ModelAsset, ModelLoader, ModelManifest};
pub use monitor::FaceMonitor;
pub use overlay::{
    GlyphLayout, HappyGlyph, OverlayRenderer, OverlayTarget, RenderMode, Smiley, GLYPH_FACE,
    GLYPH_FEATURES,
};
pub use seeta::{SeetaDetector, SeetaSettings};
pub use shell::{Control, EyeIcon, ViewState};
pub use sink::VideoSink;
pub use surface::{DrawingSurface, RasterSurface};
pub use types::{BoundingBox, DisplaySize, Frame, FrameSize, Point, Size};
