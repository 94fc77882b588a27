//! Recording sinks.
//!
//! A sink turns one recording session into persistent output. The session
//! controller owns its sink exclusively and never has more than one handle
//! open at a time.

mod jpeg;
mod memory;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::frame::FrameDimensions;

pub use jpeg::{JpegSequenceConfig, JpegSequenceSink, MANIFEST_FILE};
pub use memory::{MemoryRecording, MemorySink, MemorySinkProbe};

/// Opaque handle for one open recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkHandle {
    pub id: u64,
    pub session_id: String,
}

/// What a sink reports once a recording is finalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub session_id: String,
    pub dimensions: FrameDimensions,
    pub target_fps: u32,
    pub frames_written: u64,
    /// Where the recording ended up, when it is on disk.
    pub location: Option<String>,
    /// Hex SHA-256 over the encoded frames, in write order.
    pub sha256: Option<String>,
}

pub trait RecordingSink {
    /// Start a recording. Fails if the sink cannot create its output.
    fn open(
        &mut self,
        session_id: &str,
        dimensions: FrameDimensions,
        target_fps: u32,
    ) -> Result<SinkHandle>;

    /// Append one frame to an open recording.
    fn write(&mut self, handle: &SinkHandle, frame: &RgbImage) -> Result<()>;

    /// Finalize a recording. The first close returns the summary; closing an
    /// already-closed handle is a no-op returning `None`.
    fn close(&mut self, handle: &SinkHandle) -> Result<Option<RecordingSummary>>;

    /// Whether output for `session_id` already exists, e.g. from an earlier run.
    fn has_recording(&self, _session_id: &str) -> bool {
        false
    }
}
