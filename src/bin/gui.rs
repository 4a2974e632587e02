//! GUI application: live video with the happiness overlay.
//!
//! Run with: cargo run --features gui --bin happy-face-gui -- --source faces/

use clap::Parser;
use eframe::egui;
use happy_face::{
    Camera, Control, EyeIcon, FaceMonitor, MediaStream, MonitorConfig, RenderMode, SeetaDetector,
    SeetaSettings, Smiley, StillCamera, StreamConstraints, ViewState, GLYPH_FACE, GLYPH_FEATURES,
};
use image::{RgbImage, RgbaImage};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Parser, Debug)]
#[command(name = "happy-face-gui")]
#[command(author, version, about = "Webcam happiness monitor", long_about = None)]
struct Args {
    /// Image file or directory of images to replay as the camera feed
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Capture from this camera device
    #[cfg(feature = "webcam")]
    #[arg(long, default_value = "0")]
    webcam: u32,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the model files
    #[arg(long)]
    models: Option<PathBuf>,

    /// Page query string; a `debug` key enables debug rendering
    #[arg(long)]
    query: Option<String>,

    /// Draw boxes, landmarks and expression bars
    #[arg(long)]
    debug: bool,
}

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let app = match FaceApp::new(&args) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let display = app.monitor.config().display;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([display.width as f32 + 260.0, display.height as f32 + 60.0]),
        ..Default::default()
    };

    eframe::run_native(
        "happy-face - Happiness Monitor",
        options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
}

/// A camera whose backing source can be swapped while capture is closed.
struct SourceCamera {
    current: RwLock<Option<Arc<dyn Camera>>>,
}

impl SourceCamera {
    fn set(&self, camera: Arc<dyn Camera>) {
        *self.current.write() = Some(camera);
    }
}

impl Camera for SourceCamera {
    fn request_stream(&self, constraints: &StreamConstraints) -> happy_face::Result<Box<dyn MediaStream>> {
        let camera = self.current.read().clone();
        match camera {
            Some(camera) => camera.request_stream(constraints),
            None => Err(happy_face::Error::camera(
                "no video source selected; use File > Open Source",
            )),
        }
    }

    fn name(&self) -> &str {
        "source"
    }
}

struct FaceApp {
    runtime: Runtime,
    monitor: Arc<FaceMonitor>,
    detector: Arc<SeetaDetector>,
    source: Arc<SourceCamera>,
    source_label: String,
    loading: Option<JoinHandle<happy_face::Result<()>>>,
    models_ready: watch::Receiver<bool>,

    video_texture: Option<egui::TextureHandle>,
    overlay_texture: Option<egui::TextureHandle>,
    overlay_version: u64,

    started: Instant,
    last_update: Instant,
}

impl FaceApp {
    fn new(args: &Args) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match args.config {
            Some(ref path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };
        if let Some(ref dir) = args.models {
            config.models.root = dir.clone();
        }
        if args.debug {
            config.render_mode = RenderMode::Debug;
        }
        if let Some(ref query) = args.query {
            config.apply_query(query);
        }
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;

        let source = Arc::new(SourceCamera {
            current: RwLock::new(None),
        });
        let mut source_label = "none".to_string();
        #[cfg(feature = "webcam")]
        {
            source.set(Arc::new(happy_face::Webcam::new(args.webcam)));
            source_label = format!("webcam {}", args.webcam);
        }
        if let Some(ref path) = args.source {
            source.set(Arc::new(StillCamera::open(path)?));
            source_label = path.display().to_string();
        }

        let detector = Arc::new(SeetaDetector::spawn(SeetaSettings::default())?);
        let monitor = Arc::new(FaceMonitor::new(config, source.clone(), detector.clone())?);
        let models_ready = monitor.subscribe_models_ready();

        let mut app = Self {
            runtime,
            monitor,
            detector,
            source,
            source_label,
            loading: None,
            models_ready,
            video_texture: None,
            overlay_texture: None,
            overlay_version: 0,
            started: Instant::now(),
            last_update: Instant::now(),
        };
        app.load_models();
        Ok(app)
    }

    fn load_models(&mut self) {
        let monitor = Arc::clone(&self.monitor);
        let loader = Arc::clone(&self.detector);
        self.loading = Some(
            self.runtime
                .spawn(async move { monitor.load_models(loader).await }),
        );
    }

    /// Drop the finished load task once the monitor reports ready.
    fn watch_models(&mut self) {
        if self.models_ready.has_changed().unwrap_or(false) && *self.models_ready.borrow_and_update() {
            log::info!("Models ready; press Open to start");
            self.loading = None;
        }
    }

    fn is_loading(&self) -> bool {
        self.loading.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn open_source(&mut self, path: PathBuf) {
        match StillCamera::open(&path) {
            Ok(camera) => {
                self.source.set(Arc::new(camera));
                self.source_label = path.display().to_string();
                log::info!("Video source set to {}", self.source_label);
            }
            Err(e) => log::error!("Failed to open {}: {}", path.display(), e),
        }
    }

    fn open(&mut self) {
        let _guard = self.runtime.enter();
        if let Err(e) = self.monitor.open() {
            log::error!("Open failed: {}", e);
        }
    }

    fn close(&mut self) {
        self.monitor.close();
        self.video_texture = None;
        self.overlay_texture = None;
    }

    fn refresh_textures(&mut self, ctx: &egui::Context) {
        if let Some(frame) = self.monitor.sink().latest_frame() {
            let image = rgb_to_color_image(frame.image());
            match self.video_texture {
                Some(ref mut texture) => texture.set(image, Default::default()),
                None => {
                    self.video_texture = Some(ctx.load_texture("video", image, Default::default()))
                }
            }
        }

        let overlay = self.monitor.overlay();
        let version = overlay.frames_rendered();
        if self.overlay_texture.is_none() || version != self.overlay_version {
            let image = rgba_to_color_image(&overlay.snapshot());
            match self.overlay_texture {
                Some(ref mut texture) => texture.set(image, Default::default()),
                None => {
                    self.overlay_texture =
                        Some(ctx.load_texture("overlay", image, Default::default()))
                }
            }
            self.overlay_version = version;
        }
    }

    fn show_controls(&mut self, ui: &mut egui::Ui, state: ViewState) {
        ui.heading("Camera");
        ui.separator();

        let (rect, _) = ui.allocate_exact_size(egui::vec2(64.0, 36.0), egui::Sense::hover());
        paint_eye(ui.painter(), rect, state.eye(), self.started.elapsed());
        ui.add_space(8.0);

        match state.control() {
            Control::Open { enabled } => {
                if ui.add_enabled(enabled, egui::Button::new("Open")).clicked() {
                    self.open();
                }
            }
            Control::Close => {
                if ui.button("Close").clicked() {
                    self.close();
                }
            }
        }
        ui.add_space(16.0);

        ui.heading("Status");
        ui.separator();
        let status = match state {
            ViewState::LoadingModels => "Loading models...",
            ViewState::Idle => "Ready",
            ViewState::AwaitingFrame => "Waiting for the camera...",
            ViewState::Live => "Live",
        };
        ui.label(status);
        ui.label(format!("Source: {}", self.source_label));
        ui.label(format!("Mode: {:?}", self.monitor.config().render_mode));

        if let Some(error) = self.monitor.last_error() {
            ui.add_space(8.0);
            ui.colored_label(egui::Color32::LIGHT_RED, error);
            if !self.monitor.models_ready()
                && !self.is_loading()
                && ui.button("Retry Model Load").clicked()
            {
                self.load_models();
            }
        }

        if state == ViewState::Live {
            ui.add_space(16.0);
            ui.heading("Inference");
            ui.separator();
            let stats = self.monitor.stats();
            ui.label(format!("Ticks: {}", stats.ticks()));
            ui.label(format!("Failed: {}", stats.failed()));
            ui.label(format!("Faces: {}", self.monitor.overlay().faces()));
            ui.label(if self.monitor.is_happy() { "Happy :)" } else { "Not happy" });
        }
    }

    fn show_live(&mut self, ui: &mut egui::Ui, dt: Duration) {
        let display = self.monitor.config().display;
        let display_size = egui::vec2(display.width as f32, display.height as f32);

        // Scale to fit
        let available_size = ui.available_size();
        let scale = (available_size.x / display_size.x)
            .min(available_size.y / display_size.y)
            .min(1.0);
        let (rect, _) = ui.allocate_exact_size(display_size * scale, egui::Sense::hover());

        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        let painter = ui.painter_at(rect);
        if let Some(ref texture) = self.video_texture {
            painter.image(texture.id(), rect, uv, egui::Color32::WHITE);
        }
        if let Some(ref texture) = self.overlay_texture {
            painter.image(texture.id(), rect, uv, egui::Color32::WHITE);
        }

        let opacity = self.monitor.overlay().advance_glyph(dt);
        if opacity > 0.0 {
            let smiley = self.monitor.overlay().renderer().glyph_layout().smiley();
            paint_smiley(&painter, &smiley, rect.min, scale, opacity);
        }
    }
}

impl eframe::App for FaceApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        let dt = now - self.last_update;
        self.last_update = now;
        self.watch_models();

        let state = self.monitor.view_state();
        if state == ViewState::Live {
            self.refresh_textures(ctx);
        }

        egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    let can_switch = !self.monitor.capture_state().is_open;
                    if ui
                        .add_enabled(can_switch, egui::Button::new("Open Source..."))
                        .clicked()
                    {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("Images", &["png", "jpg", "jpeg", "bmp", "gif"])
                            .pick_file()
                        {
                            self.open_source(path);
                        }
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(can_switch, egui::Button::new("Open Source Folder..."))
                        .clicked()
                    {
                        if let Some(path) = rfd::FileDialog::new().pick_folder() {
                            self.open_source(path);
                        }
                        ui.close_menu();
                    }
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
            });
        });

        egui::SidePanel::left("controls").min_width(200.0).show(ctx, |ui| {
            self.show_controls(ui, state);
        });

        egui::CentralPanel::default().show(ctx, |ui| match state {
            ViewState::LoadingModels | ViewState::AwaitingFrame => {
                ui.centered_and_justified(|ui| {
                    ui.add(egui::Spinner::new().size(48.0));
                });
            }
            ViewState::Idle => {
                ui.centered_and_justified(|ui| {
                    ui.heading("Press Open to start the camera");
                });
            }
            ViewState::Live => self.show_live(ui, dt),
        });

        ctx.request_repaint_after(Duration::from_millis(33));
    }
}

impl Drop for FaceApp {
    fn drop(&mut self) {
        self.monitor.close();
    }
}

// Drawing helpers

fn rgb_to_color_image(rgb: &RgbImage) -> egui::ColorImage {
    let (width, height) = rgb.dimensions();
    egui::ColorImage::from_rgb([width as usize, height as usize], rgb.as_raw())
}

fn rgba_to_color_image(rgba: &RgbaImage) -> egui::ColorImage {
    let (width, height) = rgba.dimensions();
    egui::ColorImage::from_rgba_unmultiplied([width as usize, height as usize], rgba.as_raw())
}

fn with_opacity(rgb: [u8; 3], opacity: f32) -> egui::Color32 {
    egui::Color32::from_rgba_unmultiplied(rgb[0], rgb[1], rgb[2], (opacity.clamp(0.0, 1.0) * 255.0) as u8)
}

/// Paint the glyph geometry, given in display coordinates, into the view.
fn paint_smiley(painter: &egui::Painter, smiley: &Smiley, origin: egui::Pos2, scale: f32, opacity: f32) {
    let to_view = |p: happy_face::Point| origin + egui::vec2(p.x, p.y) * scale;
    let features = with_opacity(GLYPH_FEATURES, opacity);

    painter.circle_filled(to_view(smiley.center), smiley.radius * scale, with_opacity(GLYPH_FACE, opacity));
    for eye in smiley.eyes {
        painter.circle_filled(to_view(eye), (smiley.eye_radius * scale).max(1.0), features);
    }
    painter.add(egui::Shape::line(
        smiley.smile.iter().copied().map(to_view).collect(),
        egui::Stroke::new((smiley.stroke_width * scale).max(1.0), features),
    ));
}

fn paint_eye(painter: &egui::Painter, rect: egui::Rect, eye: EyeIcon, elapsed: Duration) {
    let stroke = egui::Stroke::new(2.0, egui::Color32::GRAY);
    let center = rect.center();
    let half_width = rect.width() / 2.0;
    let radius = rect.height() / 2.0 - 2.0;

    match eye {
        EyeIcon::Open => {
            painter.circle_stroke(center, radius, stroke);
            let pupil = center + egui::vec2(eye.pupil_offset(elapsed) * half_width, 0.0);
            painter.circle_filled(pupil, radius * 0.4, egui::Color32::GRAY);
        }
        EyeIcon::Closed => {
            painter.line_segment(
                [
                    egui::pos2(center.x - radius, center.y),
                    egui::pos2(center.x + radius, center.y),
                ],
                stroke,
            );
        }
    }
}
