//! Camera capture module
//!
//! Cross-platform camera capture using the nokhwa crate. Frames are captured
//! on a background thread and the latest decoded frame is made available to
//! the render thread through a triple buffer. Startup outcome (native
//! resolution, or a classified failure) is published through a status cell
//! polled during the Loading phase.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;

use crate::error::InitError;

/// Camera frame data
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in native pixels
    pub width: u32,
    /// Frame height in native pixels
    pub height: u32,
    /// Frame number
    pub frame_number: u64,
    /// Frame timestamp
    pub timestamp: Instant,
}

/// Startup status, polled by the Loading phase each frame.
#[derive(Clone, Debug)]
pub enum CameraStatus {
    /// Stream not yet open.
    Starting,
    /// Stream open; dimensions are the device's native resolution.
    Ready { width: u32, height: u32 },
    /// Acquisition failed; no automatic retry.
    Failed(InitError),
}

/// State shared between the capture thread and the render thread.
struct Shared {
    /// Triple-buffered frames; the capture thread rotates through the slots
    /// so the reader never blocks a write.
    frames: [Mutex<Option<CameraFrame>>; 3],
    /// Index of the most recently completed slot.
    latest_idx: AtomicU64,
    status: Mutex<CameraStatus>,
    running: AtomicBool,
    frame_count: AtomicU64,
}

/// Camera capture interface
pub struct CameraCapture {
    shared: Arc<Shared>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl CameraCapture {
    /// Start capturing from `camera_index`, requesting `width`x`height`
    /// (ideal, not guaranteed). Returns immediately; readiness and the
    /// native resolution are reported through [`CameraCapture::status`].
    pub fn new(camera_index: u32, width: u32, height: u32) -> Result<Self, InitError> {
        let shared = Arc::new(Shared {
            frames: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
            latest_idx: AtomicU64::new(0),
            status: Mutex::new(CameraStatus::Starting),
            running: AtomicBool::new(true),
            frame_count: AtomicU64::new(0),
        });

        let thread_shared = shared.clone();
        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || capture_thread(camera_index, width, height, thread_shared))
            .map_err(|e| {
                InitError::Initialization(format!("failed to spawn capture thread: {}", e))
            })?;

        Ok(Self {
            shared,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get the latest captured frame
    pub fn latest_frame(&self) -> Option<CameraFrame> {
        let idx = self.shared.latest_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.shared.frames[slot].lock().clone()
    }

    /// Startup status (native resolution once the stream is open).
    pub fn status(&self) -> CameraStatus {
        self.shared.status.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status(), CameraStatus::Ready { .. })
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(camera_index: u32, width: u32, height: u32, shared: Arc<Shared>) {
    log::info!("Starting camera capture thread (camera {})", camera_index);

    let mut camera = match open_camera(camera_index, width, height) {
        Ok(c) => c,
        Err(e) => {
            *shared.status.lock() = CameraStatus::Failed(e);
            return;
        }
    };

    let native = camera.resolution();
    log::info!(
        "Camera opened: {} ({}x{})",
        camera.info().human_name(),
        native.width(),
        native.height()
    );

    // Stream is open and dimensions are known: acquisition has resolved
    *shared.status.lock() = CameraStatus::Ready {
        width: native.width(),
        height: native.height(),
    };

    let mut write_idx: u64 = 0;

    while shared.running.load(Ordering::Acquire) {
        let frame = match camera.frame() {
            Ok(f) => f,
            Err(e) => {
                log::warn!("Failed to capture frame: {:?}", e);
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
        };

        match frame.decode_image::<RgbAFormat>() {
            Ok(image) => {
                let frame_num = shared.frame_count.fetch_add(1, Ordering::Relaxed);

                let slot = (write_idx % 3) as usize;
                *shared.frames[slot].lock() = Some(CameraFrame {
                    data: image.into_raw(),
                    width: frame.resolution().width(),
                    height: frame.resolution().height(),
                    frame_number: frame_num,
                    timestamp: Instant::now(),
                });

                shared.latest_idx.store(write_idx, Ordering::Release);
                write_idx = write_idx.wrapping_add(1);
            }
            Err(e) => {
                log::warn!("Failed to decode frame: {:?}", e);
            }
        }
    }

    log::info!("Camera capture thread stopped");
}

/// Enumerate and open the device, preferring the requested resolution and
/// falling back to whatever the device offers.
fn open_camera(camera_index: u32, width: u32, height: u32) -> Result<Camera, InitError> {
    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(list) if list.is_empty() => {
            return Err(InitError::CameraUnavailable(
                "no capture device found".to_string(),
            ));
        }
        Ok(_) => {}
        Err(e) => {
            // Some backends cannot enumerate but can still open by index
            log::warn!("Camera enumeration failed: {:?}", e);
        }
    }

    let index = CameraIndex::Index(camera_index);
    let ideal = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
        Resolution::new(width, height),
    ));

    let mut camera = match Camera::new(index.clone(), ideal) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("Failed to open camera at requested resolution: {:?}", e);
            let fallback = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
            Camera::new(index, fallback).map_err(|e2| {
                log::error!("Failed to open camera: {:?}", e2);
                classify_failure(&e2.to_string())
            })?
        }
    };

    camera.open_stream().map_err(|e| {
        log::error!("Failed to open camera stream: {:?}", e);
        classify_failure(&e.to_string())
    })?;

    Ok(camera)
}

/// Classify a backend failure message into the startup taxonomy. nokhwa has
/// no dedicated permission variant, so the message text is inspected.
fn classify_failure(message: &str) -> InitError {
    let lower = message.to_lowercase();
    let denied = ["permission", "denied", "not authorized", "access"]
        .iter()
        .any(|needle| lower.contains(needle));

    if denied {
        InitError::PermissionDenied(message.to_string())
    } else {
        InitError::CameraUnavailable(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_failures_are_classified() {
        assert!(matches!(
            classify_failure("Access denied by the operating system"),
            InitError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_failure("camera permission not granted"),
            InitError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_other_failures_map_to_unavailable() {
        assert!(matches!(
            classify_failure("device busy"),
            InitError::CameraUnavailable(_)
        ));
        assert!(matches!(
            classify_failure("no such device"),
            InitError::CameraUnavailable(_)
        ));
    }
}
