use anyhow::Result;
use image::RgbImage;

use super::result::Detection;

/// Detector backend trait.
///
/// The recorder calls `detect` exactly once per processed frame. Backends are
/// expected to be stateless across calls: false positives and misses are not
/// compensated beyond the recorder's grace period.
///
/// A returned error is a per-frame failure; the recorder treats that frame as
/// having no detections and keeps running.
pub trait DetectorBackend: Send {
    /// Backend identifier, used for registry lookup and logging.
    fn name(&self) -> &'static str;

    /// Run detection on one frame. Must return promptly.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
