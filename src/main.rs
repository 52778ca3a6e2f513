//! Live Object Detection - Main Entry Point
//!
//! Streams the device camera, runs a pretrained COCO object detector over
//! each frame, and overlays bounding boxes and labels on the video.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camera_detect::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Live Object Detection";
const INITIAL_SIZE: (u32, u32) = (1280, 720);
const TARGET_FPS: u64 = 60;

/// Window plus application state, created lazily on the first `resumed`.
struct Session {
    window: Arc<Window>,
    app: App,
}

/// winit application handler driving the redraw-paced main loop.
struct Shell {
    session: Option<Session>,
    next_redraw_at: Instant,
}

impl Shell {
    fn new() -> Self {
        Self {
            session: None,
            next_redraw_at: Instant::now(),
        }
    }

    fn create_session(&mut self, event_loop: &ActiveEventLoop) {
        let attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(INITIAL_SIZE.0, INITIAL_SIZE.1));

        let window = match event_loop.create_window(attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Window creation failed: {}", e);
                event_loop.exit();
                return;
            }
        };

        // Blocks on wgpu adapter/device setup, then kicks off camera
        // acquisition and model loading on their own threads
        let app = pollster::block_on(App::new(window.clone()));

        log::info!("Ready. ESC exits, F11 toggles fullscreen, R retries after an error");
        self.session = Some(Session { window, app });
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let Some(session) = &mut self.session else { return };

        match key {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::F11 => {
                let next = match session.window.fullscreen() {
                    Some(_) => None,
                    None => Some(Fullscreen::Borderless(None)),
                };
                session.window.set_fullscreen(next);
            }
            // No-op outside the Error phase
            KeyCode::KeyR => session.app.retry(),
            _ => {}
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(session) = &mut self.session else { return };

        // One update per redraw: detection cadence follows render cadence
        session.app.update();

        match session.app.render() {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost) => {
                log::warn!("Surface lost, reconfiguring");
                let size = session.app.size();
                session.app.resize(size);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("Out of GPU memory, exiting");
                event_loop.exit();
            }
            Err(e) => log::warn!("Surface error: {:?}", e),
        }
    }
}

impl ApplicationHandler for Shell {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_none() {
            self.create_session(event_loop);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(session) = &mut self.session else { return };

        let egui_consumed = session.app.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } if !egui_consumed => self.handle_key(event_loop, key),

            WindowEvent::Resized(size) => session.app.resize(size),

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(session) = &self.session else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // Pace redraws at the target rate; wake slightly early and spin the
        // last stretch for stable frame timing
        let frame = Duration::from_nanos(1_000_000_000 / TARGET_FPS);
        let early = Duration::from_micros(1000);
        let wake_at = self.next_redraw_at.checked_sub(early).unwrap_or(self.next_redraw_at);

        if Instant::now() >= wake_at {
            while Instant::now() < self.next_redraw_at {
                std::hint::spin_loop();
            }

            session.window.request_redraw();
            self.next_redraw_at += frame;

            // If we fell more than two frames behind, rebase instead of
            // bursting to catch up
            let now = Instant::now();
            if now > self.next_redraw_at + frame * 2 {
                self.next_redraw_at = now + frame;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(wake_at));
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Camera Detect v{}", env!("CARGO_PKG_VERSION"));

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut shell = Shell::new();
    event_loop.run_app(&mut shell).expect("Event loop error");
}
