//! ROI Recorder
//!
//! Watches a video feed, decides whether a detected subject sits fully
//! inside a fixed region of interest (ROI), and turns that presence signal
//! into bounded, automatically managed recording sessions.
//!
//! # Architecture
//!
//! One pipeline per stream, one cycle per frame:
//!
//! 1. **Acquire**: pull a timestamped frame from a `FrameSource`.
//! 2. **Detect**: run a `DetectorBackend`; a failed call counts as no detections.
//! 3. **Decide**: `PresenceTracker` derives presence, `RecordingStateMachine`
//!    emits start/continue/stop under the duration cap and grace period.
//! 4. **Annotate**: burn time, FPS, ROI and detections into the frame.
//! 5. **Dispatch**: annotated frame to the display and, while recording, to
//!    the `RecordingSink`; announcements go to the non-blocking `Notifier`.
//!
//! At most one recording session is live at any time, and the session
//! controller owns its sink handle exclusively.
//!
//! # Module Structure
//!
//! - `geometry`, `presence`, `state_machine`, `annotate`: the decision core
//! - `frame`, `ingest`: frames and their sources (synthetic, image directory, V4L2)
//! - `detect`: detector backends and registry
//! - `sink`, `display`, `notify`, `storage`: collaborators driven by the pipeline
//! - `session`: the session controller and its control surface
//! - `config`: file + environment configuration
//! - `ui`: terminal progress for the command-line tools

pub mod annotate;
pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod notify;
pub mod presence;
pub mod session;
pub mod sink;
pub mod state_machine;
pub mod storage;
pub mod ui;

pub use annotate::{instantaneous_fps, FrameAnnotator};
pub use config::RecorderConfig;
pub use detect::{BackendRegistry, Detection, DetectorBackend};
pub use frame::{Frame, FrameDimensions};
pub use geometry::{contains, Roi};
pub use ingest::{open_source, FrameSource};
pub use presence::PresenceTracker;
pub use session::{
    ControlCommand, ControlHandle, CycleOutcome, RunSummary, SessionController, StatusReport,
};
pub use sink::{RecordingSink, RecordingSummary, SinkHandle};
pub use state_machine::{
    RecorderState, RecordingEvent, RecordingLimits, RecordingStateMachine, StopReason,
};
