//! Application state holding the wgpu graphics context
//!
//! Owns the wgpu device, queue, surface, and the egui integration, and
//! orchestrates the three UI phases: Loading polls the two startup
//! operations, Active drives the detection loop and overlay, Error waits
//! for a user-initiated retry.

use std::path::Path;
use std::sync::Arc;

use egui::Color32;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::{CameraCapture, CameraFrame, CameraStatus};
use crate::config::{AppConfig, CONFIG_FILE};
use crate::detector::{Detection, Detector, DetectorStatus};
use crate::overlay::{self, ViewTransform};
use crate::pipeline::DetectionLoop;
use crate::state::{build_list, Phase, PhaseController};

const STATUS_ACTIVE: Color32 = Color32::from_rgb(34, 197, 94);
const STATUS_ERROR: Color32 = Color32::from_rgb(239, 68, 68);
const STATUS_NEUTRAL: Color32 = Color32::from_rgb(148, 163, 184);

/// Main application state
pub struct App {
    /// Reference to the window
    window: Arc<Window>,
    /// The wgpu surface for presenting rendered frames
    surface: wgpu::Surface<'static>,
    /// The wgpu device for creating GPU resources
    device: wgpu::Device,
    /// The command queue for submitting GPU work
    queue: wgpu::Queue,
    /// Surface configuration
    config: wgpu::SurfaceConfiguration,
    /// Current window size in physical pixels
    size: PhysicalSize<u32>,

    // Settings
    settings: AppConfig,

    // UI state machine
    phase: PhaseController,

    // Startup operations (concurrent; joined during Loading)
    camera: Option<CameraCapture>,
    detector: Option<Detector>,

    // Detection pipeline
    detection_loop: DetectionLoop,
    current_detections: Vec<Detection>,
    native_size: Option<(u32, u32)>,

    // Camera frame presentation
    frame_texture: Option<egui::TextureHandle>,
    texture_dims: Option<(u32, u32)>,
    last_uploaded_frame: Option<u64>,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl App {
    /// Create a new App instance with initialized wgpu context and kick off
    /// camera acquisition and model loading concurrently.
    pub async fn new(window: Arc<Window>) -> Self {
        let size = window.inner_size();

        // Create wgpu instance
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .expect("Failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("Failed to find suitable GPU adapter");

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Camera Detect Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .expect("Failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);

        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        surface.configure(&device, &config);

        // Initialize egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let settings = AppConfig::load_or_default(Path::new(CONFIG_FILE));

        let mut app = Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            settings,
            phase: PhaseController::new(),
            camera: None,
            detector: None,
            detection_loop: DetectionLoop::new(),
            current_detections: Vec::new(),
            native_size: None,
            frame_texture: None,
            texture_dims: None,
            last_uploaded_frame: None,
            egui_ctx,
            egui_state,
            egui_renderer,
        };

        app.start_init();
        app
    }

    /// Start (or restart) camera acquisition and model loading. Both run on
    /// their own threads; the Loading phase joins them.
    fn start_init(&mut self) {
        log::info!("Initializing camera and detector...");

        match CameraCapture::new(
            self.settings.camera_index,
            self.settings.frame_width,
            self.settings.frame_height,
        ) {
            Ok(camera) => self.camera = Some(camera),
            Err(e) => {
                self.phase.on_startup_failed(&e);
                return;
            }
        }

        match Detector::new(self.settings.model, self.settings.model_dir.clone()) {
            Ok(detector) => self.detector = Some(detector),
            Err(e) => self.phase.on_startup_failed(&e),
        }
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Get current size
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// User-initiated retry: tear everything down and re-run the full
    /// initialization sequence. No-op outside the Error phase.
    pub fn retry(&mut self) {
        if !self.phase.retry() {
            return;
        }
        log::info!("Retrying initialization");

        self.detection_loop.stop();
        self.current_detections.clear();
        self.camera = None;
        self.detector = None;
        self.native_size = None;
        self.frame_texture = None;
        self.texture_dims = None;
        self.last_uploaded_frame = None;

        self.start_init();
    }

    /// Per-frame update, driven by the redraw callback.
    pub fn update(&mut self) {
        match self.phase.phase() {
            Phase::Loading => self.poll_startup(),
            Phase::Active => self.update_active(),
            Phase::Error(_) => {}
        }
    }

    /// Join the two concurrent startup operations. Fail-fast: the first
    /// failure switches to Error and the other operation is abandoned.
    fn poll_startup(&mut self) {
        let camera_status = self.camera.as_ref().map(|c| c.status());
        let detector_status = self.detector.as_ref().map(|d| d.status());

        if let Some(CameraStatus::Failed(e)) = &camera_status {
            self.phase.on_startup_failed(e);
            return;
        }
        if let Some(DetectorStatus::Failed(e)) = &detector_status {
            self.phase.on_startup_failed(e);
            return;
        }

        let camera_ready = matches!(camera_status, Some(CameraStatus::Ready { .. }));
        let detector_ready = matches!(detector_status, Some(DetectorStatus::Ready));

        if camera_ready && detector_ready {
            if let Some(CameraStatus::Ready { width, height }) = camera_status {
                self.native_size = Some((width, height));
                log::info!("Startup complete, native resolution {}x{}", width, height);
            }
            if self.phase.on_startup_ready() {
                self.detection_loop.start();
            }
        }
    }

    /// One Active-phase cycle: present the latest camera frame and tick the
    /// detection loop.
    fn update_active(&mut self) {
        let Some(camera) = &self.camera else { return };
        let frame = camera.latest_frame();

        if let Some(frame) = &frame {
            self.upload_frame(frame);
        }

        if let Some(detector) = &self.detector {
            if let Some(result) = self.detection_loop.tick(
                frame.as_ref(),
                detector,
                self.settings.max_detections,
                self.settings.score_threshold,
            ) {
                self.current_detections = result.detections;
            }
        }
    }

    /// Upload a camera frame into the egui texture, reallocating only when
    /// the frame dimensions actually change.
    fn upload_frame(&mut self, frame: &CameraFrame) {
        if self.last_uploaded_frame == Some(frame.frame_number) {
            return;
        }
        self.last_uploaded_frame = Some(frame.frame_number);

        let image = egui::ColorImage::from_rgba_unmultiplied(
            [frame.width as usize, frame.height as usize],
            &frame.data,
        );

        let realloc = dims_changed(self.texture_dims, (frame.width, frame.height));
        match (&mut self.frame_texture, realloc) {
            (Some(texture), false) => {
                texture.set(image, egui::TextureOptions::LINEAR);
            }
            _ => {
                log::info!("Creating camera texture: {}x{}", frame.width, frame.height);
                self.frame_texture = Some(self.egui_ctx.load_texture(
                    "camera-frame",
                    image,
                    egui::TextureOptions::LINEAR,
                ));
                self.texture_dims = Some((frame.width, frame.height));
            }
        }
    }

    /// Render a frame
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        // Clear to the page background
        {
            let _render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.02,
                            g: 0.02,
                            b: 0.03,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        // Snapshot UI state before running egui
        let phase = self.phase.phase().clone();
        let rows = build_list(&self.current_detections);
        let detections = self.current_detections.clone();
        let texture_id = self.frame_texture.as_ref().map(|t| t.id());
        let native_size = self.native_size;
        let frame_count = self.camera.as_ref().map(|c| c.frame_count()).unwrap_or(0);

        let mut retry_clicked = false;

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::TopBottomPanel::top("status_bar").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label("Live Object Detection");
                    ui.separator();

                    let (dot_color, status_text) = match &phase {
                        Phase::Loading => (STATUS_NEUTRAL, "Loading Model"),
                        Phase::Active => (STATUS_ACTIVE, "Active"),
                        Phase::Error(_) => (STATUS_ERROR, "Error"),
                    };
                    ui.colored_label(dot_color, "\u{25CF}");
                    ui.colored_label(dot_color, status_text);

                    if phase == Phase::Active {
                        ui.separator();
                        ui.weak(format!("frames: {}", frame_count));
                    }
                });
            });

            egui::SidePanel::right("detections")
                .default_width(220.0)
                .show(ctx, |ui| {
                    ui.heading("Detected Objects");
                    ui.separator();

                    for row in &rows {
                        match row.confidence {
                            Some(pct) => {
                                ui.horizontal(|ui| {
                                    ui.label(&row.label);
                                    ui.with_layout(
                                        egui::Layout::right_to_left(egui::Align::Center),
                                        |ui| {
                                            ui.colored_label(
                                                overlay::ACCENT,
                                                format!("{}%", pct),
                                            );
                                        },
                                    );
                                });
                            }
                            None => {
                                ui.weak(egui::RichText::new(&row.label).italics());
                            }
                        }
                    }
                });

            egui::CentralPanel::default().show(ctx, |ui| match &phase {
                Phase::Loading => {
                    ui.vertical_centered(|ui| {
                        ui.add_space(ui.available_height() * 0.4);
                        ui.spinner();
                        ui.label("Starting camera and loading model...");
                    });
                }
                Phase::Error(message) => {
                    ui.vertical_centered(|ui| {
                        ui.add_space(ui.available_height() * 0.4);
                        ui.colored_label(STATUS_ERROR, "Something went wrong");
                        ui.label(message);
                        ui.add_space(8.0);
                        if ui.button("Retry").clicked() {
                            retry_clicked = true;
                        }
                    });
                }
                Phase::Active => {
                    let (response, painter) =
                        ui.allocate_painter(ui.available_size(), egui::Sense::hover());

                    if let (Some(texture_id), Some((width, height))) = (texture_id, native_size) {
                        let transform = ViewTransform::fit(response.rect, width, height);
                        painter.image(
                            texture_id,
                            transform.display,
                            egui::Rect::from_min_max(
                                egui::pos2(0.0, 0.0),
                                egui::pos2(1.0, 1.0),
                            ),
                            Color32::WHITE,
                        );
                        overlay::paint(&painter, &detections, &transform);
                    }
                }
            });
        });

        if retry_clicked {
            self.retry();
        }

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let render_pass_static: &mut wgpu::RenderPass<'static> =
                unsafe { std::mem::transmute(&mut render_pass) };

            self.egui_renderer
                .render(render_pass_static, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

/// Whether the frame texture needs reallocation for `next` dimensions.
/// Repeated frames with unchanged dimensions never reallocate.
fn dims_changed(current: Option<(u32, u32)>, next: (u32, u32)) -> bool {
    current != Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_allocates() {
        assert!(dims_changed(None, (1280, 720)));
    }

    #[test]
    fn test_unchanged_dimensions_do_not_reallocate() {
        assert!(!dims_changed(Some((1280, 720)), (1280, 720)));
        // Repeated application stays a no-op
        assert!(!dims_changed(Some((1280, 720)), (1280, 720)));
    }

    #[test]
    fn test_changed_dimensions_reallocate() {
        assert!(dims_changed(Some((1280, 720)), (640, 480)));
    }
}
