//! Per-frame presence signal.

use std::time::Instant;

use crate::detect::Detection;
use crate::geometry::{contains, Roi};

/// Collapses a frame's detections into "subject present in the ROI".
///
/// The only state carried between frames is the time presence was last true.
/// `None` stands for "far past": nothing has been seen since process start.
#[derive(Clone, Debug, Default)]
pub struct PresenceTracker {
    last_presence: Option<Instant>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the current frame. Returns true iff any detection is fully
    /// inside the ROI, in which case `last_presence` becomes `now`.
    pub fn update(&mut self, detections: &[Detection], roi: &Roi, now: Instant) -> bool {
        let presence = detections.iter().any(|d| contains(d, roi));
        if presence {
            self.last_presence = Some(now);
        }
        presence
    }

    pub fn last_presence(&self) -> Option<Instant> {
        self.last_presence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn roi() -> Roi {
        Roi::new(200.0, 150.0, 200.0)
    }

    #[test]
    fn presence_requires_one_fully_contained_detection() {
        let mut tracker = PresenceTracker::new();
        let now = Instant::now();
        let outside = Detection::new(190.0, 160.0, 50.0, 50.0);
        let inside = Detection::new(210.0, 160.0, 50.0, 50.0);

        assert!(!tracker.update(&[], &roi(), now));
        assert!(!tracker.update(&[outside], &roi(), now));
        assert_eq!(tracker.last_presence(), None);

        assert!(tracker.update(&[outside, inside], &roi(), now));
        assert_eq!(tracker.last_presence(), Some(now));
    }

    #[test]
    fn absence_keeps_last_presence_time() {
        let mut tracker = PresenceTracker::new();
        let t0 = Instant::now();
        let inside = Detection::new(210.0, 160.0, 50.0, 50.0);
        tracker.update(&[inside], &roi(), t0);

        let later = t0 + Duration::from_secs(5);
        assert!(!tracker.update(&[], &roi(), later));
        assert_eq!(tracker.last_presence(), Some(t0));
    }

    #[test]
    fn repeated_identical_updates_are_idempotent() {
        let mut tracker = PresenceTracker::new();
        let now = Instant::now();
        let inside = Detection::new(210.0, 160.0, 50.0, 50.0);

        let first = tracker.update(&[inside], &roi(), now);
        let snapshot = tracker.last_presence();
        let second = tracker.update(&[inside], &roi(), now);

        assert_eq!(first, second);
        assert_eq!(snapshot, tracker.last_presence());
    }
}
