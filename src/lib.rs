//! Camera Detect - live object detection overlay
//!
//! Captures a camera feed, runs a pretrained COCO object detector over each
//! frame via ONNX Runtime, and overlays bounding boxes and labels on the
//! video with a live confidence-sorted detection list.

pub mod app;
pub mod camera;
pub mod config;
pub mod detector;
pub mod error;
pub mod overlay;
pub mod pipeline;
pub mod state;

pub use app::App;
