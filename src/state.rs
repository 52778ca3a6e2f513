//! UI state controller
//!
//! Three mutually exclusive presentation states with explicit transitions,
//! plus the live detection list shown beside the video. The list is rebuilt
//! from scratch every processed frame; at human-perceptible update rates
//! incremental diffing would buy nothing.

use crate::detector::Detection;
use crate::error::InitError;

/// Placeholder row shown while no objects are detected.
pub const EMPTY_STATE_TEXT: &str = "Scanning environment...";

/// The three presentation states. Exactly one is active at any time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Error(String),
    Active,
}

/// Owns the phase and enforces its transition rules: startup success only
/// activates from Loading (exactly once), failures only error from Loading,
/// and Loading is never re-entered without an explicit retry.
pub struct PhaseController {
    phase: Phase,
}

impl PhaseController {
    pub fn new() -> Self {
        Self {
            phase: Phase::Loading,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    /// Both startup operations resolved. Returns true when this call
    /// performed the Loading -> Active transition.
    pub fn on_startup_ready(&mut self) -> bool {
        if self.phase == Phase::Loading {
            self.phase = Phase::Active;
            true
        } else {
            false
        }
    }

    /// A startup operation failed (fail-fast). Only meaningful while
    /// Loading; later failures of an abandoned operation are ignored.
    pub fn on_startup_failed(&mut self, error: &InitError) {
        if self.phase == Phase::Loading {
            self.phase = Phase::Error(error.to_string());
        }
    }

    /// User-initiated retry. Returns true when the Error -> Loading
    /// transition happened and initialization should re-run in full.
    pub fn retry(&mut self) -> bool {
        if matches!(self.phase, Phase::Error(_)) {
            self.phase = Phase::Loading;
            true
        } else {
            false
        }
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

/// One row of the detection list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListRow {
    pub label: String,
    /// Rounded confidence percentage; None marks the placeholder row.
    pub confidence: Option<u8>,
}

/// Build the list for one frame: sorted by descending confidence, or a
/// single placeholder row when nothing was detected.
pub fn build_list(detections: &[Detection]) -> Vec<ListRow> {
    if detections.is_empty() {
        return vec![ListRow {
            label: EMPTY_STATE_TEXT.to_string(),
            confidence: None,
        }];
    }

    let mut sorted: Vec<&Detection> = detections.iter().collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    sorted
        .into_iter()
        .map(|d| ListRow {
            label: d.label.to_string(),
            confidence: Some((d.score * 100.0).round() as u8),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BBox;

    fn det(label: &'static str, score: f32) -> Detection {
        Detection {
            label,
            score,
            bbox: BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 },
        }
    }

    #[test]
    fn test_activates_exactly_once() {
        let mut ctl = PhaseController::new();
        assert!(ctl.is_loading());

        assert!(ctl.on_startup_ready());
        assert!(ctl.is_active());

        // Redundant ready signals do not re-transition
        assert!(!ctl.on_startup_ready());
        assert!(ctl.is_active());
    }

    #[test]
    fn test_startup_failure_shows_error_message() {
        let mut ctl = PhaseController::new();
        ctl.on_startup_failed(&InitError::PermissionDenied("user refused".to_string()));

        match ctl.phase() {
            Phase::Error(msg) => assert!(msg.contains("denied")),
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_late_failure_of_abandoned_operation_is_ignored() {
        let mut ctl = PhaseController::new();
        ctl.on_startup_ready();

        ctl.on_startup_failed(&InitError::ModelLoad("too late".to_string()));
        assert!(ctl.is_active());
    }

    #[test]
    fn test_loading_is_only_reentered_by_retry() {
        let mut ctl = PhaseController::new();

        // Retry is a no-op outside the Error phase
        assert!(!ctl.retry());
        assert!(ctl.is_loading());

        ctl.on_startup_ready();
        assert!(!ctl.retry());
        assert!(ctl.is_active());

        // Full path: error, then user-initiated retry
        let mut ctl = PhaseController::new();
        ctl.on_startup_failed(&InitError::CameraUnavailable("gone".to_string()));
        assert!(ctl.retry());
        assert!(ctl.is_loading());
    }

    #[test]
    fn test_list_sorted_by_descending_confidence() {
        let rows = build_list(&[det("dog", 0.65), det("cat", 0.9)]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "cat");
        assert_eq!(rows[0].confidence, Some(90));
        assert_eq!(rows[1].label, "dog");
        assert_eq!(rows[1].confidence, Some(65));

        for pair in rows.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn test_empty_list_shows_single_placeholder() {
        let rows = build_list(&[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, EMPTY_STATE_TEXT);
        assert_eq!(rows[0].confidence, None);
    }
}
