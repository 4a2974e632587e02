//! Facial landmark prediction with an ensemble of regression trees (ERT).
//!
//! The predictor starts from the mean face shape placed in the detector's
//! box and refines it through a cascade of stages. Each stage samples pixel
//! intensities at points anchored to the current shape estimate, feeds their
//! pairwise differences to a forest of regression trees and adds the summed
//! leaf deltas to the shape.
//!
//! Shapes are kept in box-relative coordinates until the end, so a model
//! trained on one face size works for any box.

use image::GrayImage;

use crate::error::{Error, Result};
use crate::tree::Forest;
use crate::types::{BoundingBox, Point, Shape};

/// Number of points in the iBUG 300-W annotation used by the expression rules.
pub const IBUG_LANDMARKS: usize = 68;

/// One cascade stage: where to sample, and the forest reading the samples.
#[derive(Debug, Clone)]
pub(crate) struct CascadeStage {
    /// Landmark each feature point is anchored to.
    anchors: Vec<usize>,
    /// Feature point offset from its anchor, in mean-shape coordinates.
    offsets: Vec<Point>,
    forest: Forest,
}

impl CascadeStage {
    pub fn new(
        anchors: Vec<usize>,
        offsets: Vec<Point>,
        forest: Forest,
        num_landmarks: usize,
    ) -> Result<Self> {
        if anchors.len() != offsets.len() {
            return Err(Error::InvalidModel(format!(
                "{} anchors but {} offsets",
                anchors.len(),
                offsets.len()
            )));
        }
        if let Some(bad) = anchors.iter().find(|&&a| a >= num_landmarks) {
            return Err(Error::InvalidModel(format!(
                "anchor landmark {} out of range for {} landmarks",
                bad, num_landmarks
            )));
        }
        if let Some(max) = forest.max_feature() {
            if max >= anchors.len() {
                return Err(Error::InvalidModel(format!(
                    "split reads feature {} but the stage samples {}",
                    max,
                    anchors.len()
                )));
            }
        }
        Ok(Self {
            anchors,
            offsets,
            forest,
        })
    }

    /// Intensity at every feature point for the current shape estimate.
    fn sample(
        &self,
        image: &GrayImage,
        face: &BoundingBox,
        shape: &Shape,
        tform: &Similarity,
    ) -> Vec<f32> {
        self.anchors
            .iter()
            .zip(&self.offsets)
            .map(|(&anchor, &offset)| {
                let p = face.denormalize(shape[anchor] + tform.apply(offset));
                sample_bilinear(image, p.x, p.y)
            })
            .collect()
    }
}

/// A loaded landmark model.
#[derive(Debug, Clone)]
pub struct ShapePredictor {
    mean_shape: Shape,
    cascade: Vec<CascadeStage>,
}

impl ShapePredictor {
    pub(crate) fn new(mean_shape: Shape, cascade: Vec<CascadeStage>) -> Self {
        Self {
            mean_shape,
            cascade,
        }
    }

    pub fn num_landmarks(&self) -> usize {
        self.mean_shape.len()
    }

    pub fn num_stages(&self) -> usize {
        self.cascade.len()
    }

    /// The starting shape in box-relative `[0, 1]` coordinates.
    pub fn mean_shape(&self) -> &[Point] {
        &self.mean_shape.points
    }

    /// Locate the landmarks of the face inside `face`, in image coordinates.
    pub fn predict(&self, image: &GrayImage, face: &BoundingBox) -> Vec<Point> {
        let n = self.num_landmarks();
        let mut shape = self.mean_shape.clone();
        for stage in &self.cascade {
            let tform = Similarity::between(&self.mean_shape, &shape);
            let pixels = stage.sample(image, face, &shape, &tform);
            shape.add_delta(&stage.forest.predict(&pixels, n));
        }
        shape.points.into_iter().map(|p| face.denormalize(p)).collect()
    }
}

/// Rotation and uniform scale, without translation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    cos: f32,
    sin: f32,
}

impl Similarity {
    const IDENTITY: Self = Self { cos: 1.0, sin: 0.0 };

    /// Least-squares similarity mapping the centered `from` shape onto `to`.
    fn between(from: &Shape, to: &Shape) -> Self {
        let n = from.len().min(to.len());
        if n == 0 {
            return Self::IDENTITY;
        }
        let centroid = |s: &Shape| {
            s.points[..n].iter().fold(Point::zero(), |acc, p| acc + *p) * (1.0 / n as f32)
        };
        let (cf, ct) = (centroid(from), centroid(to));

        let (mut dot, mut cross, mut norm) = (0.0, 0.0, 0.0);
        for (f, t) in from.points[..n].iter().zip(&to.points[..n]) {
            let (f, t) = (*f - cf, *t - ct);
            dot += f.x * t.x + f.y * t.y;
            cross += f.x * t.y - f.y * t.x;
            norm += f.x * f.x + f.y * f.y;
        }
        if norm <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self {
            cos: dot / norm,
            sin: cross / norm,
        }
    }

    fn apply(&self, p: Point) -> Point {
        Point::new(
            self.cos * p.x - self.sin * p.y,
            self.sin * p.x + self.cos * p.y,
        )
    }
}

/// Intensity at a sub-pixel position; outside the image reads as black.
fn sample_bilinear(image: &GrayImage, x: f32, y: f32) -> f32 {
    let pixel = |x: i64, y: i64| -> f32 {
        if x < 0 || y < 0 || x >= image.width() as i64 || y >= image.height() as i64 {
            return 0.0;
        }
        image.get_pixel(x as u32, y as u32).0[0] as f32
    };

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let top = pixel(x0, y0) * (1.0 - fx) + pixel(x0 + 1, y0) * fx;
    let bottom = pixel(x0, y0 + 1) * (1.0 - fx) + pixel(x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}
