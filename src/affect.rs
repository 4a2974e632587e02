//! Expression estimates from 68-point landmarks.
//!
//! A face is reduced to a few scale- and roll-invariant measurements (brow
//! height, eye opening, mouth width, mouth opening, lip corner height, nose
//! to lip distance). Their change against a relaxed baseline face scores a
//! subset of FACS action units, and fixed blends of those units give one
//! probability per [`Expression`].
//!
//! Landmark indices follow the iBUG 300-W layout: jaw 0-16, brows 17-26,
//! nose 27-35, eyes 36-47, outer lip 48-59, inner lip 60-67.

use std::ops::Range;

use crate::expressions::{Expression, Expressions};
use crate::landmarks::IBUG_LANDMARKS;
use crate::types::Point;

const BROWS: Range<usize> = 17..27;
const RIGHT_EYE: Range<usize> = 36..42;
const LEFT_EYE: Range<usize> = 42..48;
const NOSE_TIP: usize = 33;
const UPPER_LIP_TOP: usize = 51;
const MOUTH_LEFT: usize = 48;
const MOUTH_RIGHT: usize = 54;
const INNER_LIP_TOP: usize = 62;
const INNER_LIP_BOTTOM: usize = 66;

/// Share kept by `neutral` even when another expression saturates.
const NEUTRAL_FLOOR: f32 = 0.05;

/// Action unit intensities in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActionUnits {
    pub au1_inner_brow_raise: f32,
    pub au4_brow_lowerer: f32,
    pub au5_upper_lid_raise: f32,
    pub au9_nose_wrinkle: f32,
    pub au12_lip_corner_pull: f32,
    pub au15_lip_corner_depress: f32,
    pub au20_lip_stretch: f32,
    pub au23_lip_tightener: f32,
    pub au26_jaw_drop: f32,
}

impl ActionUnits {
    /// Blend the units into a distribution over all expression labels.
    pub fn expressions(&self) -> Expressions {
        let scores = [
            (Expression::Happy, self.au12_lip_corner_pull),
            (
                Expression::Sad,
                0.6 * self.au15_lip_corner_depress
                    + 0.2 * self.au1_inner_brow_raise
                    + 0.2 * self.au4_brow_lowerer,
            ),
            (
                Expression::Angry,
                0.6 * self.au4_brow_lowerer + 0.4 * self.au23_lip_tightener,
            ),
            (
                Expression::Fearful,
                0.3 * self.au1_inner_brow_raise
                    + 0.3 * self.au5_upper_lid_raise
                    + 0.4 * self.au20_lip_stretch,
            ),
            (
                Expression::Disgusted,
                0.7 * self.au9_nose_wrinkle + 0.3 * self.au15_lip_corner_depress,
            ),
            (
                Expression::Surprised,
                0.4 * self.au1_inner_brow_raise
                    + 0.2 * self.au5_upper_lid_raise
                    + 0.4 * self.au26_jaw_drop,
            ),
        ];

        let strongest = scores.iter().map(|(_, s)| *s).fold(0.0, f32::max);
        let neutral = (1.0 - strongest).max(NEUTRAL_FLOOR);
        let total = neutral + scores.iter().map(|(_, s)| *s).sum::<f32>();

        std::iter::once((Expression::Neutral, neutral))
            .chain(scores)
            .map(|(e, s)| (e, s / total))
            .collect()
    }
}

/// Measurements in units of the inter-ocular distance.
///
/// Vertical quantities are taken perpendicular to the eye line, so head
/// roll does not register as brow or lip movement.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FaceGeometry {
    brow_height: f32,
    eye_opening: f32,
    mouth_width: f32,
    mouth_opening: f32,
    /// Lip corners above the upper lip center; negative when below.
    corner_lift: f32,
    nose_to_lip: f32,
}

impl FaceGeometry {
    fn measure(points: &[Point]) -> Option<Self> {
        if points.len() != IBUG_LANDMARKS {
            return None;
        }
        let mean = |range: Range<usize>| {
            let n = range.len() as f32;
            points[range].iter().fold(Point::zero(), |acc, p| acc + *p) * (1.0 / n)
        };
        let (right_eye, left_eye) = (mean(RIGHT_EYE), mean(LEFT_EYE));
        let iod = right_eye.distance(&left_eye);
        if !iod.is_finite() || iod <= f32::EPSILON {
            return None;
        }

        // Unit vector pointing down the face, perpendicular to the eye line.
        let across = (left_eye - right_eye) * (1.0 / iod);
        let down = Point::new(-across.y, across.x);
        let depth = |p: Point| ((p - right_eye).x * down.x + (p - right_eye).y * down.y) / iod;
        let at = |i: usize| depth(points[i]);
        let eye_line = depth((right_eye + left_eye) * 0.5);

        let lid_gap = |top: [usize; 2], bottom: [usize; 2]| {
            (at(bottom[0]) + at(bottom[1]) - at(top[0]) - at(top[1])) * 0.5
        };
        let corners = (at(MOUTH_LEFT) + at(MOUTH_RIGHT)) * 0.5;

        Some(Self {
            brow_height: eye_line - depth(mean(BROWS)),
            eye_opening: (lid_gap([37, 38], [41, 40]) + lid_gap([43, 44], [47, 46])) * 0.5,
            mouth_width: points[MOUTH_LEFT].distance(&points[MOUTH_RIGHT]) / iod,
            mouth_opening: points[INNER_LIP_TOP].distance(&points[INNER_LIP_BOTTOM]) / iod,
            corner_lift: at(INNER_LIP_TOP) - corners,
            nose_to_lip: at(UPPER_LIP_TOP) - at(NOSE_TIP),
        })
    }
}

/// Relative change, guarded against a degenerate baseline.
fn relative(value: f32, baseline: f32) -> f32 {
    (value - baseline) / baseline.abs().max(0.01)
}

fn unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Scores expressions relative to a calibrated relaxed face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpressionEstimator {
    baseline: FaceGeometry,
}

impl ExpressionEstimator {
    /// Calibrate against a relaxed face, typically the landmark model's
    /// mean shape. Returns `None` unless it has 68 usable points.
    pub fn calibrated(neutral: &[Point]) -> Option<Self> {
        FaceGeometry::measure(neutral).map(|baseline| Self { baseline })
    }

    pub fn action_units(&self, landmarks: &[Point]) -> Option<ActionUnits> {
        let face = FaceGeometry::measure(landmarks)?;
        let base = &self.baseline;

        let brow = relative(face.brow_height, base.brow_height);
        let eyes = relative(face.eye_opening, base.eye_opening);
        let width = relative(face.mouth_width, base.mouth_width);
        let nose = relative(face.nose_to_lip, base.nose_to_lip);
        let lift = face.corner_lift - base.corner_lift;
        let opening = face.mouth_opening - base.mouth_opening;

        let pull = unit(lift / 0.10);
        Some(ActionUnits {
            au1_inner_brow_raise: unit(brow / 0.25),
            au4_brow_lowerer: unit(-brow / 0.2),
            au5_upper_lid_raise: unit(eyes / 0.4),
            au9_nose_wrinkle: unit(-nose / 0.3),
            au12_lip_corner_pull: pull * (0.7 + 0.3 * unit(width / 0.15)),
            au15_lip_corner_depress: unit(-lift / 0.06),
            au20_lip_stretch: unit(width / 0.15) * (1.0 - pull),
            au23_lip_tightener: unit(-width / 0.12),
            au26_jaw_drop: unit(opening / 0.25),
        })
    }

    /// Expression distribution for one face, or `None` if the landmarks
    /// are not a usable 68-point set.
    pub fn estimate(&self, landmarks: &[Point]) -> Option<Expressions> {
        self.action_units(landmarks).map(|aus| aus.expressions())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A relaxed frontal face in box-relative coordinates.
    #[rustfmt::skip]
    pub(crate) const RELAXED_FACE: [(f32, f32); 68] = [
        (0.10, 0.35), (0.11, 0.45), (0.12, 0.55), (0.14, 0.65), (0.18, 0.73),
        (0.24, 0.80), (0.32, 0.85), (0.41, 0.88), (0.50, 0.89), (0.59, 0.88),
        (0.68, 0.85), (0.76, 0.80), (0.82, 0.73), (0.86, 0.65), (0.88, 0.55),
        (0.89, 0.45), (0.90, 0.35),
        (0.20, 0.26), (0.25, 0.22), (0.32, 0.21), (0.38, 0.23), (0.43, 0.27),
        (0.57, 0.27), (0.62, 0.23), (0.68, 0.21), (0.75, 0.22), (0.80, 0.26),
        (0.50, 0.32), (0.50, 0.40), (0.50, 0.48), (0.50, 0.55),
        (0.40, 0.58), (0.45, 0.60), (0.50, 0.62), (0.55, 0.60), (0.60, 0.58),
        (0.24, 0.32), (0.28, 0.29), (0.34, 0.29), (0.38, 0.33), (0.34, 0.35), (0.28, 0.35),
        (0.62, 0.33), (0.66, 0.29), (0.72, 0.29), (0.76, 0.32), (0.72, 0.35), (0.66, 0.35),
        (0.32, 0.72), (0.38, 0.68), (0.44, 0.66), (0.50, 0.67), (0.56, 0.66), (0.62, 0.68),
        (0.68, 0.72), (0.62, 0.78), (0.56, 0.80), (0.50, 0.81), (0.44, 0.80), (0.38, 0.78),
        (0.36, 0.72), (0.44, 0.70), (0.50, 0.70), (0.56, 0.70), (0.64, 0.72), (0.56, 0.74),
        (0.50, 0.75), (0.44, 0.74),
    ];

    pub(crate) fn relaxed_face() -> Vec<Point> {
        RELAXED_FACE.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    /// Corners pulled up and out, as box-relative displacements.
    pub(crate) fn smile_delta() -> Vec<Point> {
        let mut delta = vec![Point::zero(); 68];
        delta[MOUTH_LEFT] = Point::new(-0.04, -0.06);
        delta[MOUTH_RIGHT] = Point::new(0.04, -0.06);
        delta
    }

    fn displaced(delta: &[Point]) -> Vec<Point> {
        relaxed_face().iter().zip(delta).map(|(p, d)| *p + *d).collect()
    }

    /// Place a box-relative face in an image: scale, rotate, then shift.
    fn placed(face: &[Point], scale: f32, degrees: f32) -> Vec<Point> {
        let (sin, cos) = degrees.to_radians().sin_cos();
        face.iter()
            .map(|p| {
                let p = *p * scale;
                Point::new(cos * p.x - sin * p.y + 40.0, sin * p.x + cos * p.y + 25.0)
            })
            .collect()
    }

    fn estimator() -> ExpressionEstimator {
        ExpressionEstimator::calibrated(&relaxed_face()).unwrap()
    }

    #[test]
    fn relaxed_face_is_neutral() {
        let expressions = estimator().estimate(&placed(&relaxed_face(), 180.0, 0.0)).unwrap();
        assert_eq!(expressions.len(), Expression::ALL.len());
        assert_eq!(expressions.top().map(|(e, _)| e), Some(Expression::Neutral));
        assert!(expressions.get(Expression::Happy).unwrap() < 0.01);
        assert!(!expressions.is_happy());

        let total: f32 = expressions.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn lip_corner_pull_reads_as_happy() {
        let smile = displaced(&smile_delta());
        let aus = estimator().action_units(&placed(&smile, 150.0, 0.0)).unwrap();
        assert!(aus.au12_lip_corner_pull > 0.9);
        assert_eq!(aus.au15_lip_corner_depress, 0.0);

        let expressions = aus.expressions();
        assert!(expressions.is_happy());
        assert!(expressions.get(Expression::Happy).unwrap() > 0.8);
    }

    #[test]
    fn smile_survives_head_roll_and_scale() {
        let smile = displaced(&smile_delta());
        for (scale, degrees) in [(60.0, 20.0), (300.0, -25.0)] {
            let expressions = estimator().estimate(&placed(&smile, scale, degrees)).unwrap();
            assert!(expressions.is_happy(), "scale {} roll {}", scale, degrees);
        }
        let relaxed = estimator()
            .estimate(&placed(&relaxed_face(), 60.0, 20.0))
            .unwrap();
        assert!(!relaxed.is_happy());
    }

    #[test]
    fn lowered_corners_read_as_sad() {
        let mut delta = vec![Point::zero(); 68];
        delta[MOUTH_LEFT] = Point::new(0.0, 0.05);
        delta[MOUTH_RIGHT] = Point::new(0.0, 0.05);
        let expressions = estimator().estimate(&displaced(&delta)).unwrap();
        assert_eq!(expressions.top().map(|(e, _)| e), Some(Expression::Sad));
        assert!(!expressions.is_happy());
    }

    #[test]
    fn raised_brows_and_open_mouth_read_as_surprise() {
        let mut delta = vec![Point::zero(); 68];
        for i in BROWS {
            delta[i] = Point::new(0.0, -0.05);
        }
        for i in 65..68 {
            delta[i] = Point::new(0.0, 0.10);
        }
        for i in 55..60 {
            delta[i] = Point::new(0.0, 0.10);
        }
        let aus = estimator().action_units(&displaced(&delta)).unwrap();
        assert!(aus.au12_lip_corner_pull < 0.01);
        assert!(aus.au26_jaw_drop > 0.9);

        let expressions = aus.expressions();
        assert_eq!(expressions.top().map(|(e, _)| e), Some(Expression::Surprised));
    }

    #[test]
    fn needs_a_full_68_point_set() {
        assert!(ExpressionEstimator::calibrated(&relaxed_face()[..5]).is_none());
        assert!(estimator().estimate(&[Point::zero(); 5]).is_none());
        // Both eyes collapsed onto one point.
        assert!(estimator().estimate(&[Point::zero(); 68]).is_none());
    }
}
