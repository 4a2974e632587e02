//! Detection results and the detector capability.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::expressions::Expressions;
use crate::types::{BoundingBox, DisplaySize, Frame, FrameSize, Point};

/// One detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// Detector confidence, in whatever scale the detector reports.
    #[serde(default)]
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Expressions>,
}

impl Detection {
    pub fn new(bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            score: 0.0,
            landmarks: None,
            expressions: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn with_landmarks(mut self, landmarks: Vec<Point>) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    pub fn with_expressions(mut self, expressions: Expressions) -> Self {
        self.expressions = Some(expressions);
        self
    }

    /// Map geometry from native frame coordinates onto the display.
    ///
    /// Expressions and score are resolution-independent and carried over.
    pub fn resized(&self, native: FrameSize, display: DisplaySize) -> Self {
        let (sx, sy) = native.scale_factors(display);
        Self {
            bounding_box: self.bounding_box.scale(sx, sy),
            score: self.score,
            landmarks: self
                .landmarks
                .as_ref()
                .map(|points| points.iter().map(|p| p.scale(sx, sy)).collect()),
            expressions: self.expressions.clone(),
        }
    }
}

/// Resize a whole batch; see [`Detection::resized`].
pub fn resize_detections(
    batch: &[Detection],
    native: FrameSize,
    display: DisplaySize,
) -> Vec<Detection> {
    batch.iter().map(|d| d.resized(native, display)).collect()
}

/// What the detector should compute besides face boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectOptions {
    pub landmarks: bool,
    pub expressions: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            landmarks: true,
            expressions: true,
        }
    }
}

/// External face detection capability.
///
/// Called from a blocking worker once per tick; overlapping calls may happen
/// when a detection outlives the tick period, hence `&self` and `Sync`.
/// Detectors that cannot produce landmarks or expressions leave those fields
/// `None` regardless of the options.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame, options: DetectOptions) -> Result<Vec<Detection>>;

    /// Detector name (for logging/debugging).
    fn name(&self) -> &str;
}
