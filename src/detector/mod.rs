//! Object detection via ONNX Runtime
//!
//! Loads a pretrained COCO detector and runs it on camera frames on a
//! background thread. The render thread submits frames through a bounded
//! channel (capacity 1, so at most one inference is ever outstanding) and
//! polls for the latest completed result. Model loading happens on the
//! inference thread so it runs concurrently with camera startup.

pub mod labels;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use image::imageops::FilterType;
use ndarray::{Array4, ArrayD};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::camera::CameraFrame;
use crate::error::InitError;

/// Model input edge length. Frames are resized to a square of this size.
const INPUT_SIZE: u32 = 640;

/// IoU above which overlapping boxes are suppressed.
const NMS_IOU: f32 = 0.7;

/// Default cap on detections per frame, enforced at the call site.
pub const MAX_DETECTIONS: usize = 15;

/// Default minimum confidence, enforced at the call site.
pub const SCORE_THRESHOLD: f32 = 0.6;

/// Which detection weights to load. `Accurate` trades load time and memory
/// for detection quality; `Fast` is the lighter variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    Accurate,
    Fast,
}

impl ModelVariant {
    pub fn file_name(self) -> &'static str {
        match self {
            ModelVariant::Accurate => "yolov8m.onnx",
            ModelVariant::Fast => "yolov8n.onnx",
        }
    }
}

/// Axis-aligned box in native frame pixels, top-left origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn area(&self) -> f32 {
        self.w * self.h
    }
}

/// One predicted object instance. Produced fresh each frame, never persisted.
#[derive(Clone, Debug)]
pub struct Detection {
    pub label: &'static str,
    pub score: f32,
    pub bbox: BBox,
}

/// Detections for one processed frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub frame_number: u64,
}

/// Loader status, polled by the Loading phase each frame.
#[derive(Clone, Debug)]
pub enum DetectorStatus {
    Loading,
    Ready,
    Failed(InitError),
}

/// Seam between the detection loop and whatever runs inference, so the loop
/// can be exercised with a stub backend in tests.
pub trait InferenceBackend {
    /// Hand a frame to the backend. Returns false when an inference is
    /// already in flight (the frame is skipped, not queued).
    fn submit(&self, frame: &CameraFrame, max_results: usize, min_score: f32) -> bool;

    /// Take the latest completed result, if any. Each result is returned
    /// exactly once.
    fn poll(&self) -> Option<DetectionResult>;
}

/// Frame handed to the inference thread.
struct Job {
    data: Vec<u8>,
    width: u32,
    height: u32,
    frame_number: u64,
    max_results: usize,
    min_score: f32,
}

/// Detection engine owning the inference thread.
pub struct Detector {
    status: Arc<Mutex<DetectorStatus>>,
    latest: Arc<Mutex<Option<DetectionResult>>>,
    in_flight: Arc<AtomicBool>,
    job_sender: Option<Sender<Job>>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl Detector {
    /// Spawn the inference thread. The model is loaded on that thread;
    /// progress is reported through [`Detector::status`].
    pub fn new(variant: ModelVariant, model_dir: Option<PathBuf>) -> Result<Self, InitError> {
        let status = Arc::new(Mutex::new(DetectorStatus::Loading));
        let latest = Arc::new(Mutex::new(None));
        let in_flight = Arc::new(AtomicBool::new(false));

        let (job_sender, job_receiver) = crossbeam_channel::bounded::<Job>(1);

        let status_clone = status.clone();
        let latest_clone = latest.clone();
        let in_flight_clone = in_flight.clone();

        let thread_handle = std::thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                Self::inference_thread(
                    variant,
                    model_dir,
                    job_receiver,
                    status_clone,
                    latest_clone,
                    in_flight_clone,
                );
            })
            .map_err(|e| InitError::Initialization(format!("failed to spawn inference thread: {}", e)))?;

        Ok(Self {
            status,
            latest,
            in_flight,
            job_sender: Some(job_sender),
            thread_handle: Some(thread_handle),
        })
    }

    fn inference_thread(
        variant: ModelVariant,
        model_dir: Option<PathBuf>,
        job_receiver: Receiver<Job>,
        status: Arc<Mutex<DetectorStatus>>,
        latest: Arc<Mutex<Option<DetectionResult>>>,
        in_flight: Arc<AtomicBool>,
    ) {
        log::info!("Inference thread started (variant: {:?})", variant);

        let mut session = match Self::load_session(variant, model_dir) {
            Ok(s) => {
                *status.lock() = DetectorStatus::Ready;
                log::info!("Detection model loaded");
                s
            }
            Err(e) => {
                log::error!("Model load failed: {}", e);
                *status.lock() = DetectorStatus::Failed(e);
                return;
            }
        };

        while let Ok(job) = job_receiver.recv() {
            match Self::run_detection(&mut session, &job) {
                Ok(detections) => {
                    *latest.lock() = Some(DetectionResult {
                        detections,
                        frame_number: job.frame_number,
                    });
                }
                Err(e) => {
                    // The original design leaves per-frame failures unhandled;
                    // here the cycle just produces no result.
                    log::error!("Inference failed on frame {}: {}", job.frame_number, e);
                }
            }
            in_flight.store(false, Ordering::Release);
        }

        log::info!("Inference thread stopped");
    }

    /// Initialize ONNX Runtime and build the session.
    fn load_session(variant: ModelVariant, model_dir: Option<PathBuf>) -> Result<Session, InitError> {
        let model_path = find_model_file(variant, model_dir)?;
        log::info!("Model file: {:?}", model_path);

        ort::init()
            .with_name("CameraDetect")
            .commit()
            .map_err(|e| InitError::ModelLoad(format!("ORT init: {}", e)))?;

        let session = Session::builder()
            .map_err(|e| InitError::ModelLoad(format!("session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InitError::ModelLoad(format!("optimization level: {}", e)))?
            .with_intra_threads(2)
            .map_err(|e| InitError::ModelLoad(format!("thread count: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| InitError::ModelLoad(format!("{:?}: {}", model_path, e)))?;

        Ok(session)
    }

    fn run_detection(session: &mut Session, job: &Job) -> Result<Vec<Detection>, String> {
        let input = preprocess(&job.data, job.width, job.height)?;

        let input_tensor = ort::value::Tensor::from_array(input)
            .map_err(|e| format!("failed to create tensor: {}", e))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| format!("inference failed: {}", e))?;

        let output = outputs
            .iter()
            .next()
            .ok_or("no output from detection model")?;

        let (shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("failed to extract output: {}", e))?;

        let array = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| format!("invalid output shape: {}", e))?;

        Ok(decode_output(
            &array,
            job.width,
            job.height,
            job.max_results,
            job.min_score,
        ))
    }

    /// Current loader status.
    pub fn status(&self) -> DetectorStatus {
        self.status.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status(), DetectorStatus::Ready)
    }

    /// Stop the inference thread.
    pub fn stop(&mut self) {
        // Drop sender to signal thread to stop
        self.job_sender = None;

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl InferenceBackend for Detector {
    fn submit(&self, frame: &CameraFrame, max_results: usize, min_score: f32) -> bool {
        if !self.is_ready() {
            return false;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return false;
        }

        let Some(sender) = &self.job_sender else {
            self.in_flight.store(false, Ordering::Release);
            return false;
        };

        let sent = sender
            .try_send(Job {
                data: frame.data.clone(),
                width: frame.width,
                height: frame.height,
                frame_number: frame.frame_number,
                max_results,
                min_score,
            })
            .is_ok();

        if !sent {
            self.in_flight.store(false, Ordering::Release);
        }
        sent
    }

    fn poll(&self) -> Option<DetectionResult> {
        self.latest.lock().take()
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Locate the model file: an explicit directory wins, otherwise probe next
/// to the executable, its `target/..` parents, and the working directory.
fn find_model_file(variant: ModelVariant, model_dir: Option<PathBuf>) -> Result<PathBuf, InitError> {
    let file_name = variant.file_name();

    if let Some(dir) = model_dir {
        let path = dir.join(file_name);
        if path.exists() {
            return Ok(path);
        }
        return Err(InitError::ModelLoad(format!("model not found: {:?}", path)));
    }

    let mut candidates = Vec::new();
    if let Ok(exe_path) = std::env::current_exe() {
        let mut dir = exe_path.parent().map(PathBuf::from);
        // Walk up for cargo target layouts (target/debug, target/release)
        for _ in 0..3 {
            if let Some(d) = dir {
                candidates.push(d.join("models"));
                dir = d.parent().map(PathBuf::from);
            } else {
                break;
            }
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("models"));
        candidates.push(cwd);
    }

    for dir in &candidates {
        let path = dir.join(file_name);
        if path.exists() {
            return Ok(path);
        }
    }

    Err(InitError::ModelLoad(format!(
        "{} not found; place it in a 'models' directory or set model_dir",
        file_name
    )))
}

/// Resize an RGBA frame to the model input square and convert to a
/// normalized NCHW tensor.
fn preprocess(data: &[u8], width: u32, height: u32) -> Result<Array4<f32>, String> {
    let img = image::RgbaImage::from_raw(width, height, data.to_vec())
        .ok_or("frame buffer does not match its dimensions")?;
    let resized = image::imageops::resize(&img, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let side = INPUT_SIZE as usize;
    let mut input = Array4::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b, _] = pixel.0;
        input[[0, 0, y, x]] = r as f32 / 255.0;
        input[[0, 1, y, x]] = g as f32 / 255.0;
        input[[0, 2, y, x]] = b as f32 / 255.0;
    }

    Ok(input)
}

/// Decode a `[1, 4 + classes, anchors]` output tensor into detections in
/// native frame pixels: best class per anchor, call-site confidence
/// threshold, greedy NMS, sorted by descending confidence, capped.
fn decode_output(
    output: &ArrayD<f32>,
    native_width: u32,
    native_height: u32,
    max_results: usize,
    min_score: f32,
) -> Vec<Detection> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        log::error!("Unexpected model output shape: {:?}", shape);
        return Vec::new();
    }
    let classes = shape[1] - 4;
    let anchors = shape[2];

    let sx = native_width as f32 / INPUT_SIZE as f32;
    let sy = native_height as f32 / INPUT_SIZE as f32;

    let mut candidates = Vec::new();
    for a in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for c in 0..classes {
            let score = output[[0, 4 + c, a]];
            if score > best_score {
                best_class = c;
                best_score = score;
            }
        }

        if best_score < min_score {
            continue;
        }

        let cx = output[[0, 0, a]] * sx;
        let cy = output[[0, 1, a]] * sy;
        let w = output[[0, 2, a]] * sx;
        let h = output[[0, 3, a]] * sy;

        candidates.push(Detection {
            label: labels::label(best_class),
            score: best_score,
            bbox: BBox {
                x: cx - w / 2.0,
                y: cy - h / 2.0,
                w,
                h,
            },
        });
    }

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept = Vec::new();
    while !candidates.is_empty() {
        let best = candidates.remove(0);
        candidates.retain(|d| iou(&best.bbox, &d.bbox) < NMS_IOU);
        kept.push(best);
        if kept.len() >= max_results {
            break;
        }
    }

    kept
}

fn iou(a: &BBox, b: &BBox) -> f32 {
    let ix = (a.x + a.w).min(b.x + b.w) - a.x.max(b.x);
    let iy = (a.y + a.h).min(b.y + b.h) - a.y.max(b.y);
    let intersection = ix.max(0.0) * iy.max(0.0);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    /// Output tensor with the given anchors: (cx, cy, w, h, class, score),
    /// coordinates in model input space.
    fn make_output(anchors: &[(f32, f32, f32, f32, usize, f32)]) -> ArrayD<f32> {
        let mut output = ArrayD::zeros(IxDyn(&[1, 84, anchors.len()]));
        for (a, &(cx, cy, w, h, class, score)) in anchors.iter().enumerate() {
            output[[0, 0, a]] = cx;
            output[[0, 1, a]] = cy;
            output[[0, 2, a]] = w;
            output[[0, 3, a]] = h;
            output[[0, 4 + class, a]] = score;
        }
        output
    }

    #[test]
    fn test_decode_scales_to_native_pixels() {
        // One cat centered at (100, 100) in 640-space, on a 1280x720 frame
        let output = make_output(&[(100.0, 100.0, 50.0, 40.0, 15, 0.9)]);
        let dets = decode_output(&output, 1280, 720, MAX_DETECTIONS, SCORE_THRESHOLD);

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "cat");
        let b = dets[0].bbox;
        assert!((b.x - 150.0).abs() < 1e-3); // (100 - 25) * 2.0
        assert!((b.y - 90.0).abs() < 1e-3); // (100 - 20) * 1.125
        assert!((b.w - 100.0).abs() < 1e-3);
        assert!((b.h - 45.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_sorts_by_descending_confidence() {
        let output = make_output(&[
            (300.0, 300.0, 40.0, 40.0, 16, 0.65), // dog
            (100.0, 100.0, 40.0, 40.0, 15, 0.9),  // cat
        ]);
        let dets = decode_output(&output, 640, 640, MAX_DETECTIONS, SCORE_THRESHOLD);

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].label, "cat");
        assert_eq!(dets[1].label, "dog");
        assert!(dets[0].score >= dets[1].score);
    }

    #[test]
    fn test_decode_excludes_below_threshold() {
        let output = make_output(&[(100.0, 100.0, 40.0, 40.0, 15, 0.59)]);
        let dets = decode_output(&output, 640, 640, MAX_DETECTIONS, SCORE_THRESHOLD);
        assert!(dets.is_empty());
    }

    #[test]
    fn test_decode_caps_result_count() {
        // 20 well-separated boxes, all confident
        let anchors: Vec<_> = (0..20)
            .map(|i| {
                let offset = 10.0 + i as f32 * 30.0;
                (offset, offset, 10.0, 10.0, 0, 0.95)
            })
            .collect();
        let output = make_output(&anchors);
        let dets = decode_output(&output, 640, 640, MAX_DETECTIONS, SCORE_THRESHOLD);
        assert_eq!(dets.len(), MAX_DETECTIONS);
    }

    #[test]
    fn test_nms_suppresses_overlapping_boxes() {
        let output = make_output(&[
            (100.0, 100.0, 50.0, 50.0, 0, 0.9),
            (102.0, 101.0, 50.0, 50.0, 0, 0.8), // near-duplicate
        ]);
        let dets = decode_output(&output, 640, 640, MAX_DETECTIONS, SCORE_THRESHOLD);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].score - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let b = BBox { x: 100.0, y: 100.0, w: 10.0, h: 10.0 };
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_identical_is_one() {
        let a = BBox { x: 5.0, y: 5.0, w: 20.0, h: 10.0 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        // Solid red 2x2 frame
        let data = vec![255, 0, 0, 255].repeat(4);
        let input = preprocess(&data, 2, 2).unwrap();

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert!((input[[0, 0, 320, 320]] - 1.0).abs() < 1e-3);
        assert!(input[[0, 1, 320, 320]].abs() < 1e-3);
        assert!(input[[0, 2, 320, 320]].abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        assert!(preprocess(&[0u8; 8], 100, 100).is_err());
    }
}
