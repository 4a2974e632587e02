//! Overlay rendering: debug geometry, the happy glyph and the shared render
//! target the inference loop draws into.
//!
//! Detections arrive in native camera coordinates and are scaled to the
//! display size before drawing. In [`RenderMode::Normal`] nothing is drawn
//! over the video; only the happy glyph's visibility changes. In
//! [`RenderMode::Debug`] boxes, landmark points and expression bars are drawn
//! and the glyph shrinks into the top-right corner.

use std::time::Duration;

use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::capture::SessionId;
use crate::detection::{resize_detections, Detection};
use crate::expressions::{happiness_flag, Expression};
use crate::surface::{Color, DrawingSurface, RasterSurface};
use crate::types::{BoundingBox, DisplaySize, Frame, FrameSize, Point};

const BOX_COLOR: Color = Rgba([0, 0, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const LANDMARK_COLOR: Color = Rgba([255, 0, 0, 255]);
const LANDMARK_RADIUS: f32 = 2.0;
const BAR_TRACK_COLOR: Color = Rgba([0, 0, 0, 96]);
const BAR_HEIGHT: f32 = 6.0;
const BAR_GAP: f32 = 2.0;

/// Fill color of the happy glyph's face.
pub const GLYPH_FACE: [u8; 3] = [255, 204, 0];
/// Color of the glyph's eyes and smile.
pub const GLYPH_FEATURES: [u8; 3] = [64, 40, 0];
const GLYPH_MARGIN: f32 = 8.0;
const SMILE_SEGMENTS: usize = 16;

fn expression_color(expression: Expression) -> Color {
    match expression {
        Expression::Neutral => Rgba([160, 160, 160, 255]),
        Expression::Happy => Rgba([255, 204, 0, 255]),
        Expression::Sad => Rgba([40, 90, 200, 255]),
        Expression::Angry => Rgba([220, 30, 30, 255]),
        Expression::Fearful => Rgba([140, 60, 200, 255]),
        Expression::Disgusted => Rgba([60, 160, 60, 255]),
        Expression::Surprised => Rgba([255, 120, 0, 255]),
    }
}

fn with_alpha(rgb: [u8; 3], opacity: f32) -> Color {
    let a = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([rgb[0], rgb[1], rgb[2], a])
}

/// How detections are presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Normal,
    Debug,
}

impl RenderMode {
    /// Debug mode iff a `debug` key is present in the query string.
    ///
    /// Accepts a bare query (`debug&x=1`), a leading `?`, or a whole URL.
    /// Only presence matters; `debug=0` still selects debug mode.
    pub fn from_query(query: &str) -> Self {
        let query = match query.split_once('?') {
            Some((_, q)) => q,
            None => query,
        };
        let query = query.split('#').next().unwrap_or_default();
        let has_debug = query
            .split('&')
            .map(|pair| pair.split('=').next().unwrap_or_default())
            .any(|key| key == "debug");
        if has_debug {
            RenderMode::Debug
        } else {
            RenderMode::Normal
        }
    }

    pub fn is_debug(&self) -> bool {
        matches!(self, RenderMode::Debug)
    }
}

/// Where the happy glyph sits on the display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphLayout {
    pub center: Point,
    pub radius: f32,
}

impl GlyphLayout {
    /// The smiley's parts at this position, in display coordinates.
    pub fn smiley(&self) -> Smiley {
        let GlyphLayout { center, radius } = *self;
        let eyes = [-1.0, 1.0].map(|side| center + Point::new(side * radius * 0.35, -radius * 0.3));

        // Lower half-arc approximated by short segments.
        let smile_radius = radius * 0.55;
        let smile = (0..=SMILE_SEGMENTS)
            .map(|i| {
                let t = std::f32::consts::PI * (0.15 + 0.7 * i as f32 / SMILE_SEGMENTS as f32);
                center + Point::new(t.cos(), t.sin()) * smile_radius
            })
            .collect();

        Smiley {
            center,
            radius,
            eyes,
            eye_radius: (radius / 8.0).max(1.0),
            smile,
            stroke_width: (radius / 12.0).max(1.0),
        }
    }
}

/// Geometry of the happy glyph, shared by every painter.
#[derive(Debug, Clone, PartialEq)]
pub struct Smiley {
    pub center: Point,
    pub radius: f32,
    pub eyes: [Point; 2],
    pub eye_radius: f32,
    /// Polyline of the smile, left to right.
    pub smile: Vec<Point>,
    /// Suggested smile line width for painters with stroke support.
    pub stroke_width: f32,
}

/// Visibility of the happy glyph with a linear fade between states.
#[derive(Debug, Clone)]
pub struct HappyGlyph {
    visible: bool,
    opacity: f32,
    fade: Duration,
}

impl HappyGlyph {
    pub fn new(fade: Duration) -> Self {
        Self {
            visible: false,
            opacity: 0.0,
            fade,
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Move the opacity toward the target by `dt`; returns the new opacity.
    pub fn advance(&mut self, dt: Duration) -> f32 {
        let target = if self.visible { 1.0 } else { 0.0 };
        if self.fade.is_zero() {
            self.opacity = target;
        } else {
            let step = dt.as_secs_f32() / self.fade.as_secs_f32();
            self.opacity = if target > self.opacity {
                (self.opacity + step).min(target)
            } else {
                (self.opacity - step).max(target)
            };
        }
        self.opacity
    }

    pub fn reset(&mut self) {
        self.visible = false;
        self.opacity = 0.0;
    }
}

/// Draws detection batches onto a surface sized to the display.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    display: DisplaySize,
    mode: RenderMode,
}

impl OverlayRenderer {
    pub fn new(display: DisplaySize, mode: RenderMode) -> Self {
        Self { display, mode }
    }

    pub fn display(&self) -> DisplaySize {
        self.display
    }

    /// Clear the surface and paint `batch`, given in `native` coordinates.
    /// Returns the batch's happiness flag.
    pub fn render(
        &self,
        surface: &mut dyn DrawingSurface,
        batch: &[Detection],
        native: FrameSize,
    ) -> bool {
        surface.clear();
        if self.mode.is_debug() {
            for detection in resize_detections(batch, native, self.display) {
                self.draw_debug(surface, &detection);
            }
        }
        happiness_flag(batch)
    }

    fn draw_debug(&self, surface: &mut dyn DrawingSurface, detection: &Detection) {
        let bbox = detection.bounding_box;
        surface.stroke_rect(&bbox, BOX_COLOR, BOX_THICKNESS);

        if let Some(ref landmarks) = detection.landmarks {
            for point in landmarks {
                surface.fill_circle(*point, LANDMARK_RADIUS, LANDMARK_COLOR);
            }
        }

        // One bar per expression under the box, most likely first.
        if let Some(ref expressions) = detection.expressions {
            let mut y = bbox.bottom() + BAR_GAP;
            for (expression, probability) in expressions.ranked() {
                let track = BoundingBox::new(bbox.x, y, bbox.width, BAR_HEIGHT);
                surface.fill_rect(&track, BAR_TRACK_COLOR);
                let filled = BoundingBox::new(
                    bbox.x,
                    y,
                    bbox.width * probability.clamp(0.0, 1.0),
                    BAR_HEIGHT,
                );
                surface.fill_rect(&filled, expression_color(expression));
                y += BAR_HEIGHT + BAR_GAP;
            }
        }
    }

    pub fn glyph_layout(&self) -> GlyphLayout {
        let w = self.display.width as f32;
        let h = self.display.height as f32;
        let short = w.min(h);
        match self.mode {
            RenderMode::Normal => {
                let radius = short / 8.0;
                GlyphLayout {
                    center: Point::new(w / 2.0, h - radius - GLYPH_MARGIN),
                    radius,
                }
            }
            RenderMode::Debug => {
                let radius = short / 16.0;
                GlyphLayout {
                    center: Point::new(w - radius - GLYPH_MARGIN, radius + GLYPH_MARGIN),
                    radius,
                }
            }
        }
    }

    /// Paint the smiley glyph at its layout position.
    pub fn paint_glyph(&self, surface: &mut dyn DrawingSurface, opacity: f32) {
        if opacity <= 0.0 {
            return;
        }
        let smiley = self.glyph_layout().smiley();
        let features = with_alpha(GLYPH_FEATURES, opacity);

        surface.fill_circle(smiley.center, smiley.radius, with_alpha(GLYPH_FACE, opacity));
        for eye in smiley.eyes {
            surface.fill_circle(eye, smiley.eye_radius, features);
        }
        for segment in smiley.smile.windows(2) {
            surface.draw_line(segment[0], segment[1], features);
        }
    }
}

struct TargetState {
    session: Option<SessionId>,
    surface: RasterSurface,
    glyph: HappyGlyph,
    frames_rendered: u64,
    faces: usize,
}

/// The render target shared by the inference loop and the UI.
///
/// Results are only applied while the target is attached to their session;
/// the check and the draw happen under one lock, so a result that resolves
/// after [`OverlayTarget::detach`] can never reach the surface.
pub struct OverlayTarget {
    renderer: OverlayRenderer,
    state: Mutex<TargetState>,
    happiness: watch::Sender<bool>,
}

impl OverlayTarget {
    pub fn new(renderer: OverlayRenderer, fade: Duration) -> Self {
        let (happiness, _) = watch::channel(false);
        Self {
            state: Mutex::new(TargetState {
                session: None,
                surface: RasterSurface::new(renderer.display()),
                glyph: HappyGlyph::new(fade),
                frames_rendered: 0,
                faces: 0,
            }),
            renderer,
            happiness,
        }
    }

    pub fn renderer(&self) -> &OverlayRenderer {
        &self.renderer
    }

    /// Receiver for the happiness flag, updated on every applied batch.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.happiness.subscribe()
    }

    pub fn is_happy(&self) -> bool {
        *self.happiness.borrow()
    }

    pub(crate) fn attach(&self, session: SessionId) {
        let mut state = self.state.lock();
        state.session = Some(session);
        state.surface.clear();
        state.glyph.reset();
        state.faces = 0;
    }

    pub(crate) fn detach(&self) {
        let mut state = self.state.lock();
        state.session = None;
        state.surface.clear();
        state.glyph.reset();
        state.faces = 0;
        self.happiness.send_replace(false);
    }

    pub fn is_live(&self, session: SessionId) -> bool {
        self.state.lock().session == Some(session)
    }

    /// Render `batch` if the target still belongs to `session`.
    ///
    /// Returns the happiness flag, or `None` when the result was stale.
    pub fn apply(&self, session: SessionId, native: FrameSize, batch: &[Detection]) -> Option<bool> {
        let mut state = self.state.lock();
        if state.session != Some(session) {
            return None;
        }
        let happy = self.renderer.render(&mut state.surface, batch, native);
        state.glyph.set_visible(happy);
        state.frames_rendered += 1;
        state.faces = batch.len();
        self.happiness.send_replace(happy);
        Some(happy)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.state.lock().frames_rendered
    }

    /// Faces in the most recently applied batch.
    pub fn faces(&self) -> usize {
        self.state.lock().faces
    }

    /// Advance the glyph fade; returns the opacity to draw with.
    pub fn advance_glyph(&self, dt: Duration) -> f32 {
        self.state.lock().glyph.advance(dt)
    }

    pub fn glyph_opacity(&self) -> f32 {
        self.state.lock().glyph.opacity()
    }

    /// Copy of the overlay layer.
    pub fn snapshot(&self) -> RgbaImage {
        self.state.lock().surface.image().clone()
    }

    /// The frame scaled to the display with the overlay and glyph on top.
    pub fn compose(&self, frame: Option<&Frame>) -> RgbaImage {
        let display = self.renderer.display();
        let base = match frame {
            Some(frame) => {
                let scaled = image::imageops::resize(
                    frame.image(),
                    display.width,
                    display.height,
                    FilterType::Triangle,
                );
                DynamicImage::ImageRgb8(scaled).into_rgba8()
            }
            None => RgbaImage::from_pixel(display.width, display.height, Rgba([0, 0, 0, 255])),
        };

        let mut composed = RasterSurface::from_image(base);
        let opacity = {
            let state = self.state.lock();
            composed.draw_image(state.surface.image());
            state.glyph.opacity()
        };
        self.renderer.paint_glyph(&mut composed, opacity);
        composed.into_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::Expressions;
    use crate::types::Size;

    const DISPLAY: Size = Size::new(640, 480);
    const NATIVE: Size = Size::new(320, 240);

    fn smiling_face() -> Detection {
        Detection::new(BoundingBox::new(100.0, 50.0, 60.0, 60.0))
            .with_landmarks(vec![Point::new(130.0, 80.0)])
            .with_expressions(
                Expressions::new()
                    .with(Expression::Happy, 0.82)
                    .with(Expression::Neutral, 0.1),
            )
    }

    #[test]
    fn query_parsing() {
        assert_eq!(RenderMode::from_query(""), RenderMode::Normal);
        assert_eq!(RenderMode::from_query("?debug"), RenderMode::Debug);
        assert_eq!(RenderMode::from_query("a=1&debug=0"), RenderMode::Debug);
        assert_eq!(
            RenderMode::from_query("http://localhost:3000/?x=1&debug#top"),
            RenderMode::Debug
        );
        assert_eq!(RenderMode::from_query("?debugger=1"), RenderMode::Normal);
        assert_eq!(RenderMode::from_query("?x=debug"), RenderMode::Normal);
    }

    #[test]
    fn normal_mode_draws_nothing() {
        let renderer = OverlayRenderer::new(DISPLAY, RenderMode::Normal);
        let mut surface = RasterSurface::new(DISPLAY);
        let happy = renderer.render(&mut surface, &[smiling_face()], NATIVE);
        assert!(happy);
        assert!(surface.is_blank());
    }

    #[test]
    fn debug_mode_draws_scaled_box_and_landmarks() {
        let renderer = OverlayRenderer::new(DISPLAY, RenderMode::Debug);
        let mut surface = RasterSurface::new(DISPLAY);
        renderer.render(&mut surface, &[smiling_face()], NATIVE);

        // Box (100,50,60,60) at 2x lands at (200,100,120,120).
        assert_eq!(surface.pixel(200, 100), Some(BOX_COLOR));
        assert_eq!(surface.pixel(319, 219), Some(BOX_COLOR));
        assert_eq!(surface.pixel(100, 50), Some(Rgba([0, 0, 0, 0])));
        // Landmark (130,80) at 2x.
        assert_eq!(surface.pixel(260, 160), Some(LANDMARK_COLOR));
        // First bar is the happy one, 82% filled.
        let bar_y = 220 + BAR_GAP as u32 + 1;
        assert_eq!(surface.pixel(205, bar_y), Some(expression_color(Expression::Happy)));
    }

    #[test]
    fn empty_batch_clears_previous_drawing() {
        let renderer = OverlayRenderer::new(DISPLAY, RenderMode::Debug);
        let mut surface = RasterSurface::new(DISPLAY);
        renderer.render(&mut surface, &[smiling_face()], NATIVE);
        assert!(!surface.is_blank());
        assert!(!renderer.render(&mut surface, &[], NATIVE));
        assert!(surface.is_blank());
    }

    #[test]
    fn glyph_layout_depends_on_mode() {
        let normal = OverlayRenderer::new(DISPLAY, RenderMode::Normal).glyph_layout();
        let debug = OverlayRenderer::new(DISPLAY, RenderMode::Debug).glyph_layout();
        assert!(debug.radius < normal.radius);
        assert!(debug.center.x > normal.center.x);
        assert!(debug.center.y < normal.center.y);
    }

    #[test]
    fn smiley_geometry_scales_with_the_layout() {
        let layout = GlyphLayout {
            center: Point::new(100.0, 50.0),
            radius: 40.0,
        };
        let smiley = layout.smiley();
        assert!(smiley.eyes[0].distance(&Point::new(86.0, 38.0)) < 1e-3);
        assert!(smiley.eyes[1].distance(&Point::new(114.0, 38.0)) < 1e-3);
        assert_eq!(smiley.eye_radius, 5.0);
        assert_eq!(smiley.smile.len(), SMILE_SEGMENTS + 1);
        // Smile sits below the center, mirrored about the vertical axis.
        for p in &smiley.smile {
            assert!(p.y > layout.center.y);
            assert!((p.distance(&layout.center) - 22.0).abs() < 1e-3);
        }
        let (first, last) = (smiley.smile[0], smiley.smile[SMILE_SEGMENTS]);
        assert!(first.x > layout.center.x && last.x < layout.center.x);
        assert!((first.x - layout.center.x + (last.x - layout.center.x)).abs() < 1e-3);

        // Tiny glyphs keep visible features.
        let tiny = GlyphLayout {
            center: Point::zero(),
            radius: 4.0,
        }
        .smiley();
        assert_eq!(tiny.eye_radius, 1.0);
        assert_eq!(tiny.stroke_width, 1.0);
    }

    #[test]
    fn painted_glyph_follows_its_geometry() {
        let renderer = OverlayRenderer::new(DISPLAY, RenderMode::Normal);
        let smiley = renderer.glyph_layout().smiley();
        let mut surface = RasterSurface::new(DISPLAY);
        renderer.paint_glyph(&mut surface, 1.0);

        let features = Some(with_alpha(GLYPH_FEATURES, 1.0));
        for eye in smiley.eyes {
            assert_eq!(surface.pixel(eye.x as u32, eye.y as u32), features);
        }
        let bottom = smiley.smile[SMILE_SEGMENTS / 2];
        assert_eq!(surface.pixel(bottom.x.round() as u32, bottom.y.round() as u32), features);
        assert_eq!(
            surface.pixel(smiley.center.x as u32, smiley.center.y as u32),
            Some(with_alpha(GLYPH_FACE, 1.0))
        );
    }

    #[test]
    fn glyph_fades_in_and_out() {
        let mut glyph = HappyGlyph::new(Duration::from_millis(200));
        glyph.set_visible(true);
        assert!((glyph.advance(Duration::from_millis(100)) - 0.5).abs() < 1e-4);
        assert_eq!(glyph.advance(Duration::from_millis(500)), 1.0);
        glyph.set_visible(false);
        assert!((glyph.advance(Duration::from_millis(50)) - 0.75).abs() < 1e-4);
        assert_eq!(glyph.advance(Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn target_rejects_stale_sessions() {
        let target = OverlayTarget::new(
            OverlayRenderer::new(DISPLAY, RenderMode::Debug),
            Duration::ZERO,
        );
        let rx = target.subscribe();
        let live = SessionId::new(2);
        target.attach(live);

        assert_eq!(target.apply(SessionId::new(1), NATIVE, &[smiling_face()]), None);
        assert_eq!(target.frames_rendered(), 0);

        assert_eq!(target.apply(live, NATIVE, &[smiling_face()]), Some(true));
        assert!(*rx.borrow());
        assert_eq!(target.faces(), 1);

        target.detach();
        assert!(!*rx.borrow());
        assert_eq!(target.apply(live, NATIVE, &[smiling_face()]), None);
        assert!(RasterSurface::from_image(target.snapshot()).is_blank());
    }

    #[test]
    fn compose_paints_glyph_when_visible() {
        let target = OverlayTarget::new(
            OverlayRenderer::new(DISPLAY, RenderMode::Normal),
            Duration::ZERO,
        );
        let session = SessionId::new(1);
        target.attach(session);
        target.apply(session, NATIVE, &[smiling_face()]);
        assert_eq!(target.advance_glyph(Duration::from_millis(16)), 1.0);

        let composed = target.compose(None);
        let layout = target.renderer().glyph_layout();
        let edge = composed.get_pixel(layout.center.x as u32, (layout.center.y - layout.radius * 0.9) as u32);
        assert_eq!(edge, &Rgba([GLYPH_FACE[0], GLYPH_FACE[1], GLYPH_FACE[2], 255]));
        assert_eq!(composed.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }
}
