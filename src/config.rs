//! Application configuration
//!
//! Settings are read from an optional `camera-detect.json` in the working
//! directory. Every field has a default, so the file (and any field in it)
//! can be omitted.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::detector::ModelVariant;

/// Default settings file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "camera-detect.json";

/// Application settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera index to open (0 for the default device).
    pub camera_index: u32,
    /// Requested frame width. The device may deliver a different resolution;
    /// the actual native resolution always wins.
    pub frame_width: u32,
    /// Requested frame height.
    pub frame_height: u32,
    /// Which model weights to load.
    pub model: ModelVariant,
    /// Directory containing the ONNX model files. When unset, the usual
    /// locations (next to the executable, current dir) are probed.
    pub model_dir: Option<PathBuf>,
    /// Maximum number of detections kept per frame.
    pub max_detections: usize,
    /// Minimum confidence for a detection to surface.
    pub score_threshold: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            frame_width: 1280,
            frame_height: 720,
            model: ModelVariant::Accurate,
            model_dir: None,
            max_detections: 15,
            score_threshold: 0.6,
        }
    }
}

impl AppConfig {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or malformed. A malformed file is logged, not fatal.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded settings from {:?}", path);
                    config
                }
                Err(e) => {
                    log::warn!("Ignoring malformed settings file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.frame_width, 1280);
        assert_eq!(config.frame_height, 720);
        assert_eq!(config.model, ModelVariant::Accurate);
        assert_eq!(config.max_detections, 15);
        assert!((config.score_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "camera_index": 2, "model": "fast" }}"#).unwrap();

        let config = AppConfig::load_or_default(file.path());
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.model, ModelVariant::Fast);
        // Untouched fields fall back to defaults
        assert_eq!(config.max_detections, 15);
        assert_eq!(config.frame_width, 1280);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let config = AppConfig::load_or_default(file.path());
        assert_eq!(config.camera_index, 0);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = AppConfig::load_or_default(Path::new("/nonexistent/settings.json"));
        assert_eq!(config.max_detections, 15);
    }
}
