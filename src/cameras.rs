//! Camera backends.
//!
//! [`StillCamera`] replays one image, or every image in a directory, as a
//! looping video feed. With the `webcam` feature, [`Webcam`] captures from a
//! physical device through nokhwa.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::imageops::FilterType;
use image::RgbImage;

use crate::capture::{Camera, MediaStream, MediaTrack, StreamConstraints, TrackKind};
use crate::error::{Error, Result};
use crate::types::Frame;

#[cfg(feature = "webcam")]
pub use webcam::Webcam;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// A video track whose liveness is a flag shared with its stream.
#[derive(Debug)]
pub struct FlagTrack {
    live: AtomicBool,
}

impl FlagTrack {
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
        }
    }
}

impl Default for FlagTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaTrack for FlagTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&self) {
        self.live.store(false, Ordering::Release);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// Replays still images as a camera feed.
pub struct StillCamera {
    images: Vec<RgbImage>,
    frame_interval: Duration,
    grant_delay: Duration,
    name: String,
}

impl StillCamera {
    pub fn new(image: RgbImage) -> Self {
        Self {
            images: vec![image],
            frame_interval: Duration::from_millis(33),
            grant_delay: Duration::ZERO,
            name: "still".to_string(),
        }
    }

    /// Load an image file, or every image file in a directory (sorted by name).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let images = if path.is_dir() {
            let mut files: Vec<_> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                })
                .collect();
            files.sort();
            files
                .iter()
                .map(|p| image::open(p).map(|img| img.to_rgb8()))
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            vec![image::open(path)?.to_rgb8()]
        };

        if images.is_empty() {
            return Err(Error::camera(format!("no images found in {}", path.display())));
        }

        Ok(Self {
            images,
            frame_interval: Duration::from_millis(33),
            grant_delay: Duration::ZERO,
            name: path.display().to_string(),
        })
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Simulate the time a user takes to grant camera access.
    pub fn with_grant_delay(mut self, delay: Duration) -> Self {
        self.grant_delay = delay;
        self
    }
}

impl Camera for StillCamera {
    fn request_stream(&self, constraints: &StreamConstraints) -> Result<Box<dyn MediaStream>> {
        if !constraints.video {
            return Err(Error::camera("no video track requested"));
        }
        if !self.grant_delay.is_zero() {
            thread::sleep(self.grant_delay);
        }

        let frames = self
            .images
            .iter()
            .map(|img| Frame::new(fit_width(img, constraints.width_hint)))
            .collect();

        Ok(Box::new(StillStream {
            frames,
            next: 0,
            interval: self.frame_interval,
            track: Arc::new(FlagTrack::new()),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Resize to the requested width, keeping the aspect ratio.
fn fit_width(img: &RgbImage, width_hint: Option<u32>) -> RgbImage {
    match width_hint {
        Some(width) if width > 0 && width != img.width() && img.width() > 0 => {
            let height = ((img.height() as u64 * width as u64) / img.width() as u64).max(1) as u32;
            image::imageops::resize(img, width, height, FilterType::Triangle)
        }
        _ => img.clone(),
    }
}

struct StillStream {
    frames: Vec<Frame>,
    next: usize,
    interval: Duration,
    track: Arc<FlagTrack>,
}

impl MediaStream for StillStream {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        vec![self.track.clone() as Arc<dyn MediaTrack>]
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.track.is_live() {
            return Ok(None);
        }
        thread::sleep(self.interval);
        if !self.track.is_live() {
            return Ok(None);
        }
        let frame = self.frames[self.next % self.frames.len()].clone();
        self.next += 1;
        Ok(Some(frame))
    }
}

#[cfg(feature = "webcam")]
mod webcam {
    use std::sync::Arc;

    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
    };

    use super::FlagTrack;
    use crate::capture::{Camera, MediaStream, MediaTrack, StreamConstraints};
    use crate::error::{Error, Result};
    use crate::types::Frame;

    /// A physical camera, addressed by device index.
    pub struct Webcam {
        index: u32,
        name: String,
    }

    impl Webcam {
        pub fn new(index: u32) -> Self {
            Self {
                index,
                name: format!("webcam {}", index),
            }
        }
    }

    impl Camera for Webcam {
        fn request_stream(&self, constraints: &StreamConstraints) -> Result<Box<dyn MediaStream>> {
            if !constraints.video {
                return Err(Error::camera("no video track requested"));
            }
            let format = match constraints.width_hint {
                Some(width) => RequestedFormatType::Closest(CameraFormat::new(
                    Resolution::new(width, width * 3 / 4),
                    FrameFormat::MJPEG,
                    30,
                )),
                None => RequestedFormatType::AbsoluteHighestFrameRate,
            };
            let requested = RequestedFormat::new::<RgbFormat>(format);
            let mut camera = nokhwa::Camera::new(CameraIndex::Index(self.index), requested)
                .map_err(|e| Error::camera(e.to_string()))?;
            camera
                .open_stream()
                .map_err(|e| Error::camera(e.to_string()))?;
            log::info!("{} streaming at {:?}", self.name, camera.resolution());

            Ok(Box::new(WebcamStream {
                camera,
                track: Arc::new(FlagTrack::new()),
            }))
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct WebcamStream {
        camera: nokhwa::Camera,
        track: Arc<FlagTrack>,
    }

    impl MediaStream for WebcamStream {
        fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
            vec![self.track.clone() as Arc<dyn MediaTrack>]
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if !self.track.is_live() {
                if let Err(e) = self.camera.stop_stream() {
                    log::warn!("Failed to stop camera stream: {}", e);
                }
                return Ok(None);
            }
            let buffer = self
                .camera
                .frame()
                .map_err(|e| Error::Stream(e.to_string()))?;
            let decoded = buffer
                .decode_image::<RgbFormat>()
                .map_err(|e| Error::Stream(e.to_string()))?;
            let (width, height) = (decoded.width(), decoded.height());
            let image = image::RgbImage::from_raw(width, height, decoded.into_raw())
                .ok_or_else(|| Error::Stream("decoded frame has the wrong length".into()))?;
            Ok(Some(Frame::new(image)))
        }
    }

    impl Drop for WebcamStream {
        fn drop(&mut self) {
            if self.camera.is_stream_open() {
                let _ = self.camera.stop_stream();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_follow_width_hint() {
        let camera = StillCamera::new(RgbImage::new(640, 480)).with_frame_interval(Duration::ZERO);
        let mut stream = camera
            .request_stream(&StreamConstraints::default())
            .unwrap();
        let frame = stream.next_frame().unwrap().unwrap();
        assert_eq!(frame.size().width, 300);
        assert_eq!(frame.size().height, 225);
    }

    #[test]
    fn no_width_hint_keeps_native_size() {
        let camera = StillCamera::new(RgbImage::new(64, 48)).with_frame_interval(Duration::ZERO);
        let constraints = StreamConstraints {
            width_hint: None,
            ..Default::default()
        };
        let mut stream = camera.request_stream(&constraints).unwrap();
        assert_eq!(stream.next_frame().unwrap().unwrap().size().width, 64);
    }

    #[test]
    fn stopped_track_ends_stream() {
        let camera = StillCamera::new(RgbImage::new(8, 8)).with_frame_interval(Duration::ZERO);
        let mut stream = camera
            .request_stream(&StreamConstraints::default())
            .unwrap();
        assert!(stream.next_frame().unwrap().is_some());
        for track in stream.tracks() {
            assert_eq!(track.kind(), TrackKind::Video);
            track.stop();
            assert!(!track.is_live());
        }
        assert!(stream.next_frame().unwrap().is_none());
    }

    #[test]
    fn audio_only_request_is_refused() {
        let camera = StillCamera::new(RgbImage::new(8, 8));
        let constraints = StreamConstraints {
            video: false,
            audio: true,
            width_hint: None,
        };
        assert!(matches!(
            camera.request_stream(&constraints),
            Err(Error::CameraAcquisition(_))
        ));
    }
}
