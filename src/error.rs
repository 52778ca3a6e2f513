//! Startup error taxonomy
//!
//! Every failure during initialization collapses into one of these variants
//! and is surfaced as a single human-readable message in the Error phase.
//! Recovery is always user-initiated (retry re-runs the full init sequence).

use thiserror::Error;

/// Errors that can abort startup.
#[derive(Debug, Clone, Error)]
pub enum InitError {
    /// No capture device exists, or the device could not be opened.
    #[error("no camera available: {0}")]
    CameraUnavailable(String),

    /// The user or OS refused camera access.
    #[error("camera access denied: {0}")]
    PermissionDenied(String),

    /// The detection model could not be found or loaded.
    #[error("failed to load detection model: {0}")]
    ModelLoad(String),

    /// Any other startup failure.
    #[error("initialization failed: {0}")]
    Initialization(String),
}
