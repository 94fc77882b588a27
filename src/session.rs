//! Session controller.
//!
//! Drives one cycle per frame: acquire, detect, presence, state machine,
//! annotate, dispatch. All mutable pipeline state lives in `PipelineState`,
//! owned by the controller and touched from one thread only. Other threads
//! talk to the controller exclusively through `ControlHandle`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use crate::annotate::{instantaneous_fps, FrameAnnotator};
use crate::config::RecorderConfig;
use crate::detect::{BackendRegistry, DetectorBackend, Detection};
use crate::display::{DisplaySink, NullDisplay, SnapshotDisplay};
use crate::frame::Frame;
use crate::geometry::Roi;
use crate::ingest::{open_source, FrameSource, SourceStats};
use crate::notify::{Announcement, Announcer, CommandAnnouncer, LogAnnouncer, Notifier};
use crate::presence::PresenceTracker;
use crate::sink::{JpegSequenceConfig, JpegSequenceSink, RecordingSink, SinkHandle};
use crate::state_machine::{
    RecorderState, RecordingEvent, RecordingLimits, RecordingStateMachine, StopReason,
};
use crate::storage::{
    format_local, LogEntry, SessionLogStore, SessionRecord, SqliteSessionLogStore,
};

/// Consecutive capture failures tolerated before the run is aborted.
pub const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 5;
const SOURCE_RETRY_BACKOFF: Duration = Duration::from_millis(50);
const DEFAULT_RECORDING_FPS: u32 = 30;

/// Commands accepted from other threads, applied at the start of a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Stop the active recording now. Presence may start a new one later.
    StopRecording,
    /// Mute (`true`) or unmute announcements.
    SilenceAlerts(bool),
    /// Log a status report.
    ReportStatus,
    /// Stop any recording, release the sink and end the run.
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct ControlHandle {
    tx: Sender<ControlCommand>,
}

impl ControlHandle {
    pub fn send(&self, command: ControlCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("session controller is gone"))
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.send(ControlCommand::StopRecording)
    }

    pub fn silence_alerts(&self, muted: bool) -> Result<()> {
        self.send(ControlCommand::SilenceAlerts(muted))
    }

    pub fn report_status(&self) -> Result<()> {
        self.send(ControlCommand::ReportStatus)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ControlCommand::Shutdown)
    }
}

/// The one live recording.
#[derive(Clone, Debug)]
pub struct RecordingSession {
    pub id: String,
    pub started_at: Instant,
    pub started_wall: DateTime<Local>,
    /// `None` when the sink failed to open (degraded session).
    pub handle: Option<SinkHandle>,
    pub frames_written: u64,
    pub write_failures: u64,
}

impl RecordingSession {
    pub fn is_degraded(&self) -> bool {
        self.handle.is_none()
    }
}

/// Everything that changes from frame to frame.
#[derive(Debug)]
pub struct PipelineState {
    pub tracker: PresenceTracker,
    pub machine: RecordingStateMachine,
    pub session: Option<RecordingSession>,
}

impl PipelineState {
    pub fn new(limits: RecordingLimits) -> Self {
        Self {
            tracker: PresenceTracker::new(),
            machine: RecordingStateMachine::new(limits),
            session: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub sequence: u64,
    pub presence: bool,
    pub detections: Vec<Detection>,
    pub event: Option<RecordingEvent>,
    pub fps: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// One frame went through the pipeline.
    Processed(CycleReport),
    /// Capture failed for this attempt; the next cycle retries.
    SourceError,
    /// A user stop arrived outside of a frame.
    ForcedStop(Option<RecordingEvent>),
    EndOfStream,
    Shutdown,
}

impl CycleOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleOutcome::EndOfStream | CycleOutcome::Shutdown)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunEnd {
    EndOfStream,
    Shutdown,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub frames_processed: u64,
    pub detector_failures: u64,
    pub source_errors: u64,
    pub sink_open_failures: u64,
    pub sink_write_failures: u64,
    pub display_failures: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub end: RunEnd,
    pub stats: RunStats,
    pub sessions: Vec<SessionRecord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActiveSessionStatus {
    pub session_id: String,
    pub elapsed_secs: f64,
    pub frames_written: u64,
    pub degraded: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub recording: bool,
    pub place: String,
    /// Wall time of the last frame with a subject inside the ROI.
    pub last_presence: Option<String>,
    pub active_session: Option<ActiveSessionStatus>,
    pub frames_processed: u64,
    pub alerts_muted: bool,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.last_presence {
            Some(at) => write!(f, "Last seen human at {} in the {}", at, self.place)?,
            None => write!(f, "No human seen yet in the {}", self.place)?,
        }
        match &self.active_session {
            Some(session) => write!(
                f,
                "; recording {} for {:.1}s ({} frames{})",
                session.session_id,
                session.elapsed_secs,
                session.frames_written,
                if session.degraded { ", not saved" } else { "" }
            ),
            None => write!(f, "; idle"),
        }
    }
}

pub struct SessionController {
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    sink: Box<dyn RecordingSink>,
    display: Box<dyn DisplaySink>,
    notifier: Option<Notifier>,
    store: Option<Box<dyn SessionLogStore>>,
    annotator: FrameAnnotator,
    roi: Roi,
    recording_fps: u32,
    place: String,
    state: PipelineState,
    control_tx: Sender<ControlCommand>,
    control_rx: Receiver<ControlCommand>,
    connected: bool,
    consecutive_source_errors: u32,
    last_frame_at: Option<(Instant, DateTime<Local>)>,
    last_presence_wall: Option<DateTime<Local>>,
    display_failing: bool,
    session_seq: u64,
    stats: RunStats,
    sessions: Vec<SessionRecord>,
}

impl SessionController {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        sink: Box<dyn RecordingSink>,
        roi: Roi,
        limits: RecordingLimits,
    ) -> Self {
        let (control_tx, control_rx) = channel();
        Self {
            source,
            detector,
            sink,
            display: Box::new(NullDisplay),
            notifier: None,
            store: None,
            annotator: FrameAnnotator::new(roi),
            roi,
            recording_fps: DEFAULT_RECORDING_FPS,
            place: "monitored room".to_string(),
            state: PipelineState::new(limits),
            control_tx,
            control_rx,
            connected: false,
            consecutive_source_errors: 0,
            last_frame_at: None,
            last_presence_wall: None,
            display_failing: false,
            session_seq: 0,
            stats: RunStats::default(),
            sessions: Vec::new(),
        }
    }

    /// Wire every collaborator from configuration.
    ///
    /// An unusable session log is logged and skipped; every other failure is fatal.
    pub fn from_config(cfg: &RecorderConfig) -> Result<Self> {
        let source = open_source(&cfg.source)?;
        let mut registry = BackendRegistry::with_builtin(cfg.detector.cpu.clone());
        let detector = registry.take(&cfg.detector.backend)?;
        let sink = JpegSequenceSink::new(JpegSequenceConfig {
            output_dir: cfg.recording.output_dir.clone(),
            quality: cfg.recording.jpeg_quality,
        });

        let announcer: Box<dyn Announcer> = match &cfg.notifier.speech_command {
            Some(command) => Box::new(CommandAnnouncer::from_command_line(command)?),
            None => Box::new(LogAnnouncer),
        };
        let notifier = Notifier::spawn(announcer, cfg.notifier.queue_capacity)?;

        let mut controller =
            Self::new(source, detector, Box::new(sink), cfg.roi, cfg.limits)
                .with_notifier(notifier)
                .with_recording_fps(cfg.recording.target_fps)
                .with_place(cfg.place.clone());
        if let Some(path) = &cfg.display.snapshot_path {
            controller = controller.with_display(Box::new(SnapshotDisplay::new(
                path,
                cfg.display.snapshot_every,
                cfg.recording.jpeg_quality,
            )));
        }
        match SqliteSessionLogStore::open(&cfg.db_path) {
            Ok(store) => controller = controller.with_store(Box::new(store)),
            Err(err) => log::warn!(
                "SessionController: session log {} unavailable, continuing without it: {:#}",
                cfg.db_path,
                err
            ),
        }
        Ok(controller)
    }

    pub fn with_display(mut self, display: Box<dyn DisplaySink>) -> Self {
        self.display = display;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_store(mut self, store: Box<dyn SessionLogStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Frame rate requested from the recording sink.
    pub fn with_recording_fps(mut self, fps: u32) -> Self {
        self.recording_fps = fps.max(1);
        self
    }

    pub fn with_place(mut self, place: impl Into<String>) -> Self {
        self.place = place.into();
        self
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            tx: self.control_tx.clone(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    pub fn source_healthy(&self) -> bool {
        self.source.is_healthy()
    }

    /// Sessions finished so far, oldest first.
    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    /// Take the session log back, e.g. to query it after a run.
    pub fn take_store(&mut self) -> Option<Box<dyn SessionLogStore>> {
        self.store.take()
    }

    /// Process one frame (plus any pending control commands).
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        if let Some(outcome) = self.apply_commands() {
            return Ok(outcome);
        }

        let cycle_start = Instant::now();
        if !self.connected {
            match self.source.connect() {
                Ok(()) => self.connected = true,
                Err(err) => return self.source_failure(err.context("connect frame source")),
            }
        }
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("SessionController: source {} ended", self.source.stats().source);
                self.force_stop(StopReason::SourceExhausted);
                return Ok(CycleOutcome::EndOfStream);
            }
            Err(err) => return self.source_failure(err),
        };
        self.consecutive_source_errors = 0;
        let report = self.process_frame(frame, cycle_start);
        Ok(CycleOutcome::Processed(report))
    }

    /// Log the pipeline setup and give the detector a chance to warm up.
    pub fn warm_up(&mut self) {
        log::info!(
            "SessionController: starting (detector={}, roi={},{},{}, max={:?}, grace={:?})",
            self.detector.name(),
            self.roi.x,
            self.roi.y,
            self.roi.size,
            self.state.machine.limits().max_duration,
            self.state.machine.limits().grace_period
        );
        if let Err(err) = self.detector.warm_up() {
            log::warn!("SessionController: detector warm-up failed: {:#}", err);
        }
    }

    /// Run until end of stream or shutdown.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.warm_up();
        let end = loop {
            match self.run_cycle()? {
                CycleOutcome::EndOfStream => break RunEnd::EndOfStream,
                CycleOutcome::Shutdown => break RunEnd::Shutdown,
                CycleOutcome::SourceError => std::thread::sleep(SOURCE_RETRY_BACKOFF),
                CycleOutcome::Processed(_) | CycleOutcome::ForcedStop(_) => {}
            }
        };
        Ok(self.summary(end))
    }

    pub fn summary(&self, end: RunEnd) -> RunSummary {
        RunSummary {
            end,
            stats: self.stats.clone(),
            sessions: self.sessions.clone(),
        }
    }

    /// Stop the active recording (if any) and release its sink.
    pub fn force_stop(&mut self, reason: StopReason) -> Option<RecordingEvent> {
        let now = self.reference_now();
        let event = self.state.machine.force_stop(reason, now)?;
        if let RecordingEvent::Stop { reason, duration } = event {
            self.finish_session(reason, duration);
        }
        Some(event)
    }

    pub fn status(&self) -> StatusReport {
        let now = self.reference_now();
        let active_session = match (self.state.machine.state(), &self.state.session) {
            (RecorderState::Recording { started_at }, Some(session)) => {
                Some(ActiveSessionStatus {
                    session_id: session.id.clone(),
                    elapsed_secs: now.saturating_duration_since(started_at).as_secs_f64(),
                    frames_written: session.frames_written,
                    degraded: session.is_degraded(),
                })
            }
            _ => None,
        };
        StatusReport {
            recording: self.state.machine.is_recording(),
            place: self.place.clone(),
            last_presence: self.last_presence_wall.as_ref().map(format_local),
            active_session,
            frames_processed: self.stats.frames_processed,
            alerts_muted: self.notifier.as_ref().is_some_and(Notifier::is_muted),
        }
    }

    fn apply_commands(&mut self) -> Option<CycleOutcome> {
        let mut forced = None;
        loop {
            let command = match self.control_rx.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            match command {
                ControlCommand::StopRecording => {
                    let event = self.force_stop(StopReason::ForcedByUser);
                    if event.is_none() {
                        log::info!("SessionController: stop requested while idle");
                    }
                    // Keep the stop that actually ended a session.
                    if event.is_some() || forced.is_none() {
                        forced = Some(CycleOutcome::ForcedStop(event));
                    }
                }
                ControlCommand::SilenceAlerts(muted) => {
                    if let Some(notifier) = &self.notifier {
                        notifier.set_muted(muted);
                    }
                    self.log_line(if muted {
                        "Alerts silenced"
                    } else {
                        "Alerts enabled"
                    });
                }
                ControlCommand::ReportStatus => {
                    log::info!("status: {}", self.status());
                }
                ControlCommand::Shutdown => {
                    log::info!("SessionController: shutdown requested");
                    self.force_stop(StopReason::Shutdown);
                    return Some(CycleOutcome::Shutdown);
                }
            }
        }
        forced
    }

    fn source_failure(&mut self, err: anyhow::Error) -> Result<CycleOutcome> {
        self.consecutive_source_errors += 1;
        self.stats.source_errors += 1;
        log::warn!(
            "SessionController: capture failed ({}/{}): {:#}",
            self.consecutive_source_errors,
            MAX_CONSECUTIVE_SOURCE_ERRORS,
            err
        );
        if self.consecutive_source_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
            self.force_stop(StopReason::SourceFailed);
            return Err(err.context(format!(
                "frame source failed {} times in a row",
                self.consecutive_source_errors
            )));
        }
        Ok(CycleOutcome::SourceError)
    }

    fn process_frame(&mut self, frame: Frame, cycle_start: Instant) -> CycleReport {
        let now = frame.captured_at;
        self.last_frame_at = Some((now, frame.wall_clock));

        let detections = match self.detector.detect(frame.image()) {
            Ok(detections) => detections,
            Err(err) => {
                self.stats.detector_failures += 1;
                log::warn!(
                    "SessionController: detector {} failed on frame {}: {:#}",
                    self.detector.name(),
                    frame.sequence,
                    err
                );
                Vec::new()
            }
        };

        let presence = self.state.tracker.update(&detections, &self.roi, now);
        if presence {
            self.last_presence_wall = Some(frame.wall_clock);
        }
        let event = self
            .state
            .machine
            .step(presence, self.state.tracker.last_presence(), now);

        let fps = instantaneous_fps(cycle_start.elapsed());
        let annotated = self
            .annotator
            .annotate(frame.image(), &detections, &frame.wall_clock, fps);

        match event {
            Some(RecordingEvent::Start { at }) => {
                self.begin_session(&frame, at);
                self.write_frame(&annotated);
            }
            Some(RecordingEvent::Continue) => self.write_frame(&annotated),
            Some(RecordingEvent::Stop { reason, duration }) => {
                self.finish_session(reason, duration)
            }
            None => {}
        }

        match self.display.show(&annotated) {
            Ok(()) => self.display_failing = false,
            Err(err) => {
                self.stats.display_failures += 1;
                if !self.display_failing {
                    log::warn!("SessionController: display failed: {:#}", err);
                }
                self.display_failing = true;
            }
        }
        self.stats.frames_processed += 1;

        CycleReport {
            sequence: frame.sequence,
            presence,
            detections,
            event,
            fps,
        }
    }

    /// `recording_<wall time>`, suffixed with the run's session number from the
    /// second session on. Ids the sink already holds (a restart within the same
    /// second) skip ahead to the next number.
    fn next_session_id(&mut self, wall: &DateTime<Local>) -> String {
        let base = format!("recording_{}", wall.format("%Y-%m-%d_%H-%M-%S"));
        loop {
            self.session_seq += 1;
            let id = if self.session_seq == 1 {
                base.clone()
            } else {
                format!("{}_{:03}", base, self.session_seq)
            };
            if !self.sink.has_recording(&id) {
                return id;
            }
            log::debug!("SessionController: session id {} already taken", id);
        }
    }

    fn begin_session(&mut self, frame: &Frame, at: Instant) {
        let id = self.next_session_id(&frame.wall_clock);
        self.announce(Announcement::RecordingStarted {
            session_id: id.clone(),
        });
        let handle = match self
            .sink
            .open(&id, frame.dimensions(), self.recording_fps)
        {
            Ok(handle) => {
                log::info!("SessionController: recording {} started", id);
                self.log_line(&format!("Recording started: {}", id));
                Some(handle)
            }
            Err(err) => {
                self.stats.sink_open_failures += 1;
                log::error!(
                    "SessionController: cannot open recording {}, session is not saved: {:#}",
                    id,
                    err
                );
                self.log_line(&format!("Recording {} could not be saved: {}", id, err));
                self.announce(Announcement::SinkUnavailable {
                    session_id: id.clone(),
                });
                None
            }
        };
        self.state.session = Some(RecordingSession {
            id,
            started_at: at,
            started_wall: frame.wall_clock,
            handle,
            frames_written: 0,
            write_failures: 0,
        });
    }

    fn write_frame(&mut self, annotated: &image::RgbImage) {
        let Some(session) = self.state.session.as_mut() else {
            return;
        };
        let Some(handle) = &session.handle else {
            return;
        };
        match self.sink.write(handle, annotated) {
            Ok(()) => session.frames_written += 1,
            Err(err) => {
                session.write_failures += 1;
                self.stats.sink_write_failures += 1;
                log::warn!(
                    "SessionController: write to {} failed: {:#}",
                    session.id,
                    err
                );
            }
        }
    }

    fn finish_session(&mut self, reason: StopReason, duration: Duration) {
        let Some(session) = self.state.session.take() else {
            return;
        };
        let mut location = None;
        let mut sha256 = None;
        let mut frames_written = session.frames_written;
        if let Some(handle) = &session.handle {
            match self.sink.close(handle) {
                Ok(Some(summary)) => {
                    location = summary.location;
                    sha256 = summary.sha256;
                    frames_written = summary.frames_written;
                }
                Ok(None) => {}
                Err(err) => log::error!(
                    "SessionController: closing recording {} failed: {:#}",
                    session.id,
                    err
                ),
            }
        }

        let ended_wall = session.started_wall
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let record = SessionRecord {
            session_id: session.id.clone(),
            started_at_ms: session.started_wall.timestamp_millis(),
            ended_at_ms: ended_wall.timestamp_millis(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            stop_reason: reason.as_str().to_string(),
            frames_written,
            degraded: session.is_degraded(),
            location,
            sha256,
        };
        log::info!(
            "SessionController: recording {} stopped ({}, {:.1}s, {} frames)",
            session.id,
            reason,
            duration.as_secs_f64(),
            frames_written
        );
        self.log_line(&format!("Recording stopped: {} ({})", session.id, reason));
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.record_session(&record) {
                log::warn!("SessionController: session log write failed: {:#}", err);
            }
        }
        self.sessions.push(record);
        self.announce(Announcement::RecordingStopped {
            session_id: session.id,
            reason,
        });
    }

    fn announce(&self, announcement: Announcement) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(announcement);
        }
    }

    fn log_line(&mut self, message: &str) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let at_ms = self
            .last_frame_at
            .map(|(_, wall)| wall.timestamp_millis())
            .unwrap_or_else(|| Local::now().timestamp_millis());
        let entry = LogEntry {
            at_ms,
            message: message.to_string(),
        };
        if let Err(err) = store.append_log(&entry) {
            log::warn!("SessionController: session log write failed: {:#}", err);
        }
    }

    /// Monotonic "now" on the source's clock: the last frame's capture time,
    /// or the real clock before any frame arrived.
    fn reference_now(&self) -> Instant {
        self.last_frame_at
            .map(|(at, _)| at)
            .unwrap_or_else(Instant::now)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state.machine.is_recording() {
            self.force_stop(StopReason::Shutdown);
        }
    }
}
