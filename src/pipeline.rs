//! Detection loop scheduler
//!
//! One tick per rendered frame, which ties detection cadence to render
//! cadence. The loop never overlaps two inference calls: a frame is only
//! submitted when nothing is in flight, and each completed result is
//! forwarded exactly once. `stop` is the explicit termination condition.
//!
//! There is no per-frame timeout: a stalled inference call stalls detection
//! until it returns. Known limitation, kept deliberately.

use crate::camera::CameraFrame;
use crate::detector::{DetectionResult, InferenceBackend};

/// Where the loop is within one detection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    /// Armed but nothing submitted yet.
    Idle,
    /// The video surface has not presented a decodable frame.
    AwaitingFrame,
    /// An inference call is in flight.
    Detecting,
}

/// Self-sustaining per-frame detection scheduler.
pub struct DetectionLoop {
    phase: LoopPhase,
    armed: bool,
}

impl DetectionLoop {
    pub fn new() -> Self {
        Self {
            phase: LoopPhase::Idle,
            armed: false,
        }
    }

    /// Arm the loop. Ticks are no-ops until this is called.
    pub fn start(&mut self) {
        self.armed = true;
        self.phase = LoopPhase::Idle;
    }

    /// Disarm the loop. In-flight inference finishes but its result is
    /// discarded on the next `start`.
    pub fn stop(&mut self) {
        self.armed = false;
        self.phase = LoopPhase::Idle;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Run one cycle: harvest a completed result if one arrived, then submit
    /// the current frame unless an inference is still in flight. Returns the
    /// harvested result so the caller can update the overlay and list
    /// exactly once per processed frame.
    pub fn tick<B: InferenceBackend>(
        &mut self,
        frame: Option<&CameraFrame>,
        backend: &B,
        max_results: usize,
        min_score: f32,
    ) -> Option<DetectionResult> {
        if !self.armed {
            // Drain anything left over from before a stop
            let _ = backend.poll();
            return None;
        }

        let completed = backend.poll();
        if completed.is_some() {
            self.phase = LoopPhase::Idle;
        }

        if self.phase != LoopPhase::Detecting {
            match frame {
                None => {
                    // Reschedule without doing work until a frame is decodable
                    self.phase = LoopPhase::AwaitingFrame;
                }
                Some(frame) => {
                    if backend.submit(frame, max_results, min_score) {
                        self.phase = LoopPhase::Detecting;
                    }
                }
            }
        }

        completed
    }
}

impl Default for DetectionLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Detection, BBox};
    use std::cell::RefCell;
    use std::time::Instant;

    struct StubBackend {
        busy: RefCell<bool>,
        pending: RefCell<Option<DetectionResult>>,
        submitted: RefCell<Vec<u64>>,
    }

    impl StubBackend {
        fn new() -> Self {
            Self {
                busy: RefCell::new(false),
                pending: RefCell::new(None),
                submitted: RefCell::new(Vec::new()),
            }
        }

        fn finish(&self, frame_number: u64) {
            *self.busy.borrow_mut() = false;
            *self.pending.borrow_mut() = Some(DetectionResult {
                detections: vec![Detection {
                    label: "cat",
                    score: 0.9,
                    bbox: BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 },
                }],
                frame_number,
            });
        }
    }

    impl InferenceBackend for StubBackend {
        fn submit(&self, frame: &CameraFrame, _max_results: usize, _min_score: f32) -> bool {
            if *self.busy.borrow() {
                return false;
            }
            *self.busy.borrow_mut() = true;
            self.submitted.borrow_mut().push(frame.frame_number);
            true
        }

        fn poll(&self) -> Option<DetectionResult> {
            self.pending.borrow_mut().take()
        }
    }

    fn frame(n: u64) -> CameraFrame {
        CameraFrame {
            data: vec![0; 16],
            width: 2,
            height: 2,
            frame_number: n,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_unarmed_loop_does_nothing() {
        let mut lp = DetectionLoop::new();
        let backend = StubBackend::new();

        assert!(lp.tick(Some(&frame(1)), &backend, 15, 0.6).is_none());
        assert!(backend.submitted.borrow().is_empty());
    }

    #[test]
    fn test_awaits_frame_without_submitting() {
        let mut lp = DetectionLoop::new();
        let backend = StubBackend::new();
        lp.start();

        assert!(lp.tick(None, &backend, 15, 0.6).is_none());
        assert_eq!(lp.phase(), LoopPhase::AwaitingFrame);
        assert!(backend.submitted.borrow().is_empty());
    }

    #[test]
    fn test_submits_once_then_backpressures() {
        let mut lp = DetectionLoop::new();
        let backend = StubBackend::new();
        lp.start();

        lp.tick(Some(&frame(1)), &backend, 15, 0.6);
        assert_eq!(lp.phase(), LoopPhase::Detecting);

        // Inference still in flight: no second submission
        lp.tick(Some(&frame(2)), &backend, 15, 0.6);
        lp.tick(Some(&frame(3)), &backend, 15, 0.6);
        assert_eq!(backend.submitted.borrow().as_slice(), &[1]);
    }

    #[test]
    fn test_result_emitted_once_and_loop_resumes() {
        let mut lp = DetectionLoop::new();
        let backend = StubBackend::new();
        lp.start();

        lp.tick(Some(&frame(1)), &backend, 15, 0.6);
        backend.finish(1);

        // Harvests the result and immediately submits the next frame
        let result = lp.tick(Some(&frame(2)), &backend, 15, 0.6).unwrap();
        assert_eq!(result.frame_number, 1);
        assert_eq!(result.detections.len(), 1);
        assert_eq!(lp.phase(), LoopPhase::Detecting);
        assert_eq!(backend.submitted.borrow().as_slice(), &[1, 2]);

        // The same result is never delivered twice
        backend.finish(2);
        let second = lp.tick(Some(&frame(3)), &backend, 15, 0.6).unwrap();
        assert_eq!(second.frame_number, 2);
        assert!(lp.tick(None, &backend, 15, 0.6).is_none());
    }

    #[test]
    fn test_stop_disarms_and_discards_stale_results() {
        let mut lp = DetectionLoop::new();
        let backend = StubBackend::new();
        lp.start();

        lp.tick(Some(&frame(1)), &backend, 15, 0.6);
        lp.stop();
        assert!(!lp.is_armed());

        // A result arriving after stop is drained, not delivered
        backend.finish(1);
        assert!(lp.tick(Some(&frame(2)), &backend, 15, 0.6).is_none());
        assert!(backend.pending.borrow().is_none());
    }
}
