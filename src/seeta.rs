//! SeetaFace frontal face detection (via `rustface`) with dlib landmarks,
//! as a [`Detector`].
//!
//! rustface detectors are neither `Send` nor reentrant, so the models live
//! on a dedicated worker thread and requests are passed to it over a channel.
//!
//! Two kinds of model file are loaded through [`ModelLoader`], told apart by
//! file name (either may be bzip2-compressed with a further `.bz2`):
//! - `.bin`: SeetaFace detector weights, producing face boxes
//! - `.dat`: a dlib shape predictor, adding landmarks to every box
//!
//! With a 68-point shape predictor, expressions are derived from the
//! landmarks as well (see [`ExpressionEstimator`]).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use bzip2::read::BzDecoder;
use image::GrayImage;
use rustface::{FaceInfo, ImageData};

use crate::affect::ExpressionEstimator;
use crate::detection::{DetectOptions, Detection, Detector};
use crate::dlib::load_shape_predictor;
use crate::error::{Error, Result};
use crate::landmarks::ShapePredictor;
use crate::models::{ModelAsset, ModelLoader};
use crate::types::{BoundingBox, Frame};

/// Tuning knobs passed through to rustface.
#[derive(Debug, Clone)]
pub struct SeetaSettings {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: (u32, u32),
}

impl Default for SeetaSettings {
    fn default() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: (4, 4),
        }
    }
}

/// What a model file is loaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelRole {
    FaceDetector,
    Landmarks,
}

impl ModelRole {
    fn of(file_name: &str) -> Option<Self> {
        let name = file_name.strip_suffix(".bz2").unwrap_or(file_name);
        if name.ends_with(".bin") {
            Some(Self::FaceDetector)
        } else if name.ends_with(".dat") {
            Some(Self::Landmarks)
        } else {
            None
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::FaceDetector => "face detector",
            Self::Landmarks => "landmark model",
        }
    }
}

enum Command {
    Load {
        role: ModelRole,
        name: String,
        path: PathBuf,
        reply: Sender<Result<()>>,
    },
    Detect {
        image: GrayImage,
        options: DetectOptions,
        reply: Sender<Result<Vec<Detection>>>,
    },
}

pub struct SeetaDetector {
    commands: Sender<Command>,
}

impl SeetaDetector {
    /// Spawn the worker thread. No model is loaded yet; see [`ModelLoader`].
    pub fn spawn(settings: SeetaSettings) -> Result<Self> {
        let (commands, rx) = channel();
        thread::Builder::new()
            .name("seeta-detector".to_string())
            .spawn(move || Worker::new(settings).run(rx))?;
        Ok(Self { commands })
    }

    fn request<T>(&self, make: impl FnOnce(Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply, response) = channel();
        self.commands
            .send(make(reply))
            .map_err(|_| Error::detection("detector worker stopped"))?;
        response
            .recv()
            .map_err(|_| Error::detection("detector worker stopped"))?
    }
}

impl Detector for SeetaDetector {
    fn detect(&self, frame: &Frame, options: DetectOptions) -> Result<Vec<Detection>> {
        let image = frame.to_luma();
        self.request(|reply| Command::Detect {
            image,
            options,
            reply,
        })
    }

    fn name(&self) -> &str {
        "SeetaFace"
    }
}

impl ModelLoader for SeetaDetector {
    fn load(&self, asset: &ModelAsset) -> Result<()> {
        let role = ModelRole::of(&asset.name).ok_or_else(|| {
            Error::model_load(
                &asset.name,
                "unrecognized model file; expected SeetaFace weights (.bin) or a dlib shape predictor (.dat)",
            )
        })?;
        let name = asset.name.clone();
        let path = asset.path.clone();
        self.request(|reply| Command::Load {
            role,
            name,
            path,
            reply,
        })
        .map_err(|e| match e {
            Error::ModelLoad { .. } => e,
            other => Error::model_load(&asset.name, other.to_string()),
        })
    }
}

/// Landmark model plus the expression rules calibrated on its mean shape.
struct Landmarker {
    predictor: ShapePredictor,
    expressions: Option<ExpressionEstimator>,
}

impl Landmarker {
    fn new(predictor: ShapePredictor) -> Self {
        let expressions = ExpressionEstimator::calibrated(predictor.mean_shape());
        if expressions.is_none() {
            log::warn!(
                "Landmark model has {} points; expressions need the 68-point layout",
                predictor.num_landmarks()
            );
        }
        Self {
            predictor,
            expressions,
        }
    }

    fn annotate(&self, image: &GrayImage, face: Detection, options: DetectOptions) -> Detection {
        let points = self.predictor.predict(image, &face.bounding_box);
        let face = match (&self.expressions, options.expressions) {
            (Some(estimator), true) => match estimator.estimate(&points) {
                Some(expressions) => face.with_expressions(expressions),
                None => face,
            },
            _ => face,
        };
        if options.landmarks {
            face.with_landmarks(points)
        } else {
            face
        }
    }
}

/// Models owned by the worker thread, each with the file it came from.
struct Worker {
    settings: SeetaSettings,
    detector: Option<(String, Box<dyn rustface::Detector>)>,
    landmarker: Option<(String, Landmarker)>,
    warned_boxes_only: bool,
}

impl Worker {
    fn new(settings: SeetaSettings) -> Self {
        Self {
            settings,
            detector: None,
            landmarker: None,
            warned_boxes_only: false,
        }
    }

    fn run(mut self, rx: Receiver<Command>) {
        // Ends when the owning SeetaDetector drops its sender.
        for command in rx {
            match command {
                Command::Load {
                    role,
                    name,
                    path,
                    reply,
                } => {
                    let _ = reply.send(self.load(role, name, &path));
                }
                Command::Detect {
                    image,
                    options,
                    reply,
                } => {
                    let _ = reply.send(self.detect(&image, options));
                }
            }
        }
        log::debug!("SeetaFace worker stopped");
    }

    /// Each role holds one model. Reloading the same file replaces it; a
    /// different file for an occupied role is refused.
    fn load(&mut self, role: ModelRole, name: String, path: &Path) -> Result<()> {
        let current = match role {
            ModelRole::FaceDetector => self.detector.as_ref().map(|(n, _)| n),
            ModelRole::Landmarks => self.landmarker.as_ref().map(|(n, _)| n),
        };
        if let Some(current) = current.filter(|current| **current != name) {
            return Err(Error::model_load(
                &name,
                format!("a {} is already loaded from {}", role.describe(), current),
            ));
        }

        match role {
            ModelRole::FaceDetector => {
                let detector = open_detector(&name, path, &self.settings)?;
                self.detector = Some((name, detector));
            }
            ModelRole::Landmarks => {
                let predictor = load_shape_predictor(path)
                    .map_err(|e| Error::model_load(&name, e.to_string()))?;
                log::debug!(
                    "{}: {} landmarks, {} cascade stages",
                    name,
                    predictor.num_landmarks(),
                    predictor.num_stages()
                );
                self.landmarker = Some((name, Landmarker::new(predictor)));
            }
        }
        Ok(())
    }

    fn detect(&mut self, image: &GrayImage, options: DetectOptions) -> Result<Vec<Detection>> {
        let Some((_, detector)) = self.detector.as_mut() else {
            return Err(Error::detection("no face detector model loaded"));
        };
        let (width, height) = image.dimensions();
        let faces = detector.detect(&ImageData::new(image.as_raw(), width, height));

        let wants_landmarks = options.landmarks || options.expressions;
        let landmarker = match &self.landmarker {
            Some((_, landmarker)) if wants_landmarks => Some(landmarker),
            None if wants_landmarks && !self.warned_boxes_only => {
                log::warn!("No landmark model loaded; reporting face boxes only");
                self.warned_boxes_only = true;
                None
            }
            _ => None,
        };

        Ok(faces
            .iter()
            .map(to_detection)
            .map(|face| match landmarker {
                Some(landmarker) => landmarker.annotate(image, face, options),
                None => face,
            })
            .collect())
    }
}

fn to_detection(face: &FaceInfo) -> Detection {
    let bbox = face.bbox();
    Detection::new(BoundingBox::new(
        bbox.x() as f32,
        bbox.y() as f32,
        bbox.width() as f32,
        bbox.height() as f32,
    ))
    .with_score(face.score() as f32)
}

fn open_detector(
    name: &str,
    path: &Path,
    settings: &SeetaSettings,
) -> Result<Box<dyn rustface::Detector>> {
    let load_error = |reason: String| Error::model_load(name, reason);

    let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
    let reader = BufReader::new(file);

    let is_bz2 = path.extension().is_some_and(|ext| ext == "bz2");
    let model = if is_bz2 {
        rustface::read_model(BzDecoder::new(reader))
    } else {
        rustface::read_model(reader)
    }
    .map_err(|e| load_error(e.to_string()))?;

    let mut detector = rustface::create_detector_with_model(model);
    detector.set_min_face_size(settings.min_face_size);
    detector.set_score_thresh(settings.score_thresh);
    detector.set_pyramid_scale_factor(settings.pyramid_scale_factor);
    detector.set_slide_window_step(settings.slide_window_step.0, settings.slide_window_step.1);
    Ok(detector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affect::tests::{relaxed_face, smile_delta};
    use crate::dlib::{encode, read_shape_predictor};
    use crate::expressions::happiness_flag;
    use crate::types::Point;
    use image::{Luma, RgbImage};
    use std::io::Cursor;

    fn asset(name: &str, dir: &Path) -> ModelAsset {
        ModelAsset {
            name: name.into(),
            path: dir.join(name),
        }
    }

    fn landmarker(delta: &[Point]) -> Landmarker {
        let model = encode::single_leaf_model(&relaxed_face(), delta);
        Landmarker::new(read_shape_predictor(Cursor::new(model)).unwrap())
    }

    #[test]
    fn detect_without_model_fails() {
        let detector = SeetaDetector::spawn(SeetaSettings::default()).unwrap();
        let frame = Frame::new(RgbImage::new(16, 16));
        let err = detector
            .detect(&frame, DetectOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Detection(_)));
    }

    #[test]
    fn missing_model_file_is_a_load_error() {
        let detector = SeetaDetector::spawn(SeetaSettings::default()).unwrap();
        let err = detector
            .load(&asset("seeta_fd_frontal_v1.0.bin", Path::new("/nonexistent")))
            .unwrap_err();
        assert!(matches!(err, Error::ModelLoad { .. }));
    }

    #[test]
    fn model_role_follows_the_file_name() {
        assert_eq!(ModelRole::of("seeta_fd_frontal_v1.0.bin"), Some(ModelRole::FaceDetector));
        assert_eq!(ModelRole::of("seeta_fd_frontal_v1.0.bin.bz2"), Some(ModelRole::FaceDetector));
        assert_eq!(
            ModelRole::of("shape_predictor_68_face_landmarks.dat.bz2"),
            Some(ModelRole::Landmarks)
        );
        assert_eq!(ModelRole::of("shape_predictor_5_face_landmarks.dat"), Some(ModelRole::Landmarks));
        assert_eq!(ModelRole::of("expressions.onnx"), None);
        assert_eq!(ModelRole::of("weights.bz2"), None);
    }

    #[test]
    fn unrecognized_model_file_is_refused() {
        let detector = SeetaDetector::spawn(SeetaSettings::default()).unwrap();
        let err = detector
            .load(&asset("face_expression_model.onnx", Path::new("/models")))
            .unwrap_err();
        assert!(
            matches!(err, Error::ModelLoad { ref asset, ref reason }
                if asset == "face_expression_model.onnx" && reason.contains("unrecognized"))
        );
    }

    #[test]
    fn landmark_model_loads_alongside_the_face_detector() {
        let dir = std::env::temp_dir().join(format!("happy-face-seeta-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let model = encode::single_leaf_model(&relaxed_face(), &[Point::zero(); 68]);
        std::fs::write(dir.join("first.dat"), &model).unwrap();
        std::fs::write(dir.join("second.dat"), &model).unwrap();

        let detector = SeetaDetector::spawn(SeetaSettings::default()).unwrap();
        detector.load(&asset("first.dat", &dir)).unwrap();
        // Reloading the same file is a retry, not a second model.
        detector.load(&asset("first.dat", &dir)).unwrap();

        let err = detector.load(&asset("second.dat", &dir)).unwrap_err();
        std::fs::remove_dir_all(&dir).ok();
        assert!(
            matches!(err, Error::ModelLoad { ref asset, ref reason }
                if asset == "second.dat" && reason.contains("first.dat"))
        );

        // The face detector slot is still empty.
        let frame = Frame::new(RgbImage::new(16, 16));
        let err = detector
            .detect(&frame, DetectOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Detection(ref msg) if msg.contains("face detector")));
    }

    #[test]
    fn landmarks_drive_the_happy_flag() {
        let image = GrayImage::from_pixel(200, 200, Luma([120]));
        let face = Detection::new(BoundingBox::new(40.0, 30.0, 120.0, 120.0)).with_score(5.0);

        let smiling = landmarker(&smile_delta()).annotate(&image, face.clone(), DetectOptions::default());
        assert_eq!(smiling.landmarks.as_ref().map(Vec::len), Some(68));
        assert!(smiling.expressions.as_ref().is_some_and(|e| e.is_happy()));
        assert!(happiness_flag(&[smiling]));

        let relaxed = landmarker(&[Point::zero(); 68]).annotate(&image, face, DetectOptions::default());
        assert_eq!(relaxed.score, 5.0);
        assert!(relaxed.expressions.is_some());
        assert!(!happiness_flag(&[relaxed]));
    }

    #[test]
    fn options_select_what_is_attached() {
        let image = GrayImage::from_pixel(64, 64, Luma([0]));
        let face = Detection::new(BoundingBox::new(0.0, 0.0, 64.0, 64.0));
        let landmarker = landmarker(&smile_delta());

        let only_expressions = DetectOptions {
            landmarks: false,
            expressions: true,
        };
        let d = landmarker.annotate(&image, face.clone(), only_expressions);
        assert!(d.landmarks.is_none());
        assert!(d.expressions.is_some());

        let only_landmarks = DetectOptions {
            landmarks: true,
            expressions: false,
        };
        let d = landmarker.annotate(&image, face, only_landmarks);
        assert!(d.landmarks.is_some());
        assert!(d.expressions.is_none());
    }

    #[test]
    fn five_point_model_gives_landmarks_without_expressions() {
        let mean: Vec<Point> = relaxed_face().into_iter().take(5).collect();
        let model = encode::single_leaf_model(&mean, &[Point::zero(); 5]);
        let landmarker = Landmarker::new(read_shape_predictor(Cursor::new(model)).unwrap());

        let image = GrayImage::from_pixel(64, 64, Luma([0]));
        let face = Detection::new(BoundingBox::new(0.0, 0.0, 64.0, 64.0));
        let d = landmarker.annotate(&image, face, DetectOptions::default());
        assert_eq!(d.landmarks.map(|l| l.len()), Some(5));
        assert!(d.expressions.is_none());
    }
}
