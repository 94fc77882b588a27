use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, TimeZone};
use image::RgbImage;

use roi_recorder::detect::{Detection, StubBackend};
use roi_recorder::ingest::{FrameSource, SourceStats};
use roi_recorder::notify::{Announcement, Announcer, Notifier};
use roi_recorder::session::{CycleOutcome, RunEnd, SessionController};
use roi_recorder::sink::{MemorySink, MemorySinkProbe};
use roi_recorder::storage::{InMemorySessionLogStore, SessionLogStore};
use roi_recorder::{Frame, RecordingEvent, RecordingLimits, Roi, StopReason};

const TICK_MS: u64 = 100;

enum Step {
    Frame,
    Error,
}

/// Frames every 100 ms on a virtual clock, with optional injected errors.
struct ScriptedSource {
    steps: VecDeque<Step>,
    base: Instant,
    wall: DateTime<Local>,
    produced: u64,
}

impl ScriptedSource {
    fn frames(count: usize) -> Self {
        Self::from_steps((0..count).map(|_| Step::Frame))
    }

    fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            base: Instant::now(),
            wall: Local::now(),
            produced: 0,
        }
    }

    fn at_wall(mut self, wall: DateTime<Local>) -> Self {
        self.wall = wall;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.steps.pop_front() {
            None => Ok(None),
            Some(Step::Error) => Err(anyhow!("camera hiccup")),
            Some(Step::Frame) => {
                let offset = Duration::from_millis(self.produced * TICK_MS);
                self.produced += 1;
                Ok(Some(Frame::new(
                    RgbImage::new(64, 48),
                    self.base + offset,
                    self.wall + chrono::Duration::milliseconds((offset.as_millis()) as i64),
                    self.produced,
                )))
            }
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced,
            source: "scripted".to_string(),
        }
    }
}

/// Keeps every announcement for inspection once the notifier has drained.
#[derive(Clone, Default)]
struct HeardAnnouncements {
    heard: Arc<Mutex<Vec<Announcement>>>,
}

impl HeardAnnouncements {
    fn take(&self) -> Vec<Announcement> {
        self.heard
            .lock()
            .map(|mut heard| std::mem::take(&mut *heard))
            .unwrap_or_default()
    }
}

impl Announcer for HeardAnnouncements {
    fn announce(&mut self, announcement: &Announcement) -> Result<()> {
        self.heard
            .lock()
            .map_err(|_| anyhow!("announcement log poisoned"))?
            .push(announcement.clone());
        Ok(())
    }
}

fn inside() -> Detection {
    Detection::new(210.0, 160.0, 50.0, 50.0)
}

fn outside() -> Detection {
    Detection::new(190.0, 160.0, 50.0, 50.0)
}

fn limits(max_secs: u64, grace_secs: u64) -> RecordingLimits {
    RecordingLimits {
        max_duration: Duration::from_secs(max_secs),
        grace_period: Duration::from_secs(grace_secs),
    }
}

fn controller(
    source: ScriptedSource,
    detector: StubBackend,
    sink: MemorySink,
    limits: RecordingLimits,
) -> (SessionController, MemorySinkProbe) {
    let probe = sink.probe();
    let controller = SessionController::new(
        Box::new(source),
        Box::new(detector),
        Box::new(sink),
        Roi::new(200.0, 150.0, 200.0),
        limits,
    );
    (controller, probe)
}

fn events_until_end(controller: &mut SessionController) -> Result<Vec<(u64, RecordingEvent)>> {
    let mut events = Vec::new();
    loop {
        match controller.run_cycle()? {
            CycleOutcome::Processed(report) => {
                if let Some(event) = report.event {
                    events.push((report.sequence, event));
                }
            }
            outcome if outcome.is_terminal() => return Ok(events),
            _ => {}
        }
    }
}

fn stop_reason(event: &RecordingEvent) -> Option<StopReason> {
    match event {
        RecordingEvent::Stop { reason, .. } => Some(*reason),
        _ => None,
    }
}

#[test]
fn presence_starts_then_grace_period_stops_the_recording() -> Result<()> {
    // Subject inside for frames 1..=5 (t = 0..400 ms), then only outside boxes.
    let detector = StubBackend::always(vec![outside()]).repeat(vec![inside(), outside()], 5);
    let (mut controller, probe) = controller(
        ScriptedSource::frames(30),
        detector,
        MemorySink::new(),
        limits(60, 1),
    );

    let events = events_until_end(&mut controller)?;
    assert!(matches!(events[0], (1, RecordingEvent::Start { .. })));
    // Last presence at 400 ms; the first tick more than 1 s later is 1500 ms (frame 16).
    let (stop_seq, stop) = events.last().copied().expect("stop event");
    assert_eq!(stop_seq, 16);
    assert_eq!(stop_reason(&stop), Some(StopReason::PresenceLost));
    assert_eq!(
        events
            .iter()
            .filter(|(_, e)| matches!(e, RecordingEvent::Continue))
            .count(),
        14
    );

    let recordings = probe.recordings();
    assert_eq!(recordings.len(), 1);
    assert!(recordings[0].closed);
    assert_eq!(recordings[0].frames_written, 15);
    assert_eq!(controller.sessions().len(), 1);
    assert_eq!(controller.sessions()[0].stop_reason, "presence_lost");
    assert_eq!(controller.sessions()[0].duration_ms, 1500);
    Ok(())
}

#[test]
fn duration_cap_stops_despite_presence_and_restarts_next_tick() -> Result<()> {
    let (mut controller, probe) = controller(
        ScriptedSource::frames(50),
        StubBackend::always(vec![inside()]),
        MemorySink::new(),
        limits(2, 20),
    );

    let events = events_until_end(&mut controller)?;
    let starts: Vec<u64> = events
        .iter()
        .filter(|(_, e)| matches!(e, RecordingEvent::Start { .. }))
        .map(|(seq, _)| *seq)
        .collect();
    let stops: Vec<(u64, StopReason)> = events
        .iter()
        .filter_map(|(seq, e)| stop_reason(e).map(|reason| (*seq, reason)))
        .collect();

    // 2000 ms cap: first stop at 2100 ms (frame 22), restart on frame 23.
    assert_eq!(starts, vec![1, 23, 45]);
    assert_eq!(
        stops,
        vec![
            (22, StopReason::MaxDurationExceeded),
            (44, StopReason::MaxDurationExceeded)
        ]
    );

    let reasons: Vec<&str> = controller
        .sessions()
        .iter()
        .map(|record| record.stop_reason.as_str())
        .collect();
    assert_eq!(
        reasons,
        vec!["max_duration_exceeded", "max_duration_exceeded", "source_exhausted"]
    );
    assert_eq!(probe.recordings().len(), 3);
    assert_eq!(probe.open_count(), 0);
    Ok(())
}

#[test]
fn user_stop_forces_exactly_one_stop_and_releases_the_sink() -> Result<()> {
    let (mut controller, probe) = controller(
        ScriptedSource::frames(20),
        StubBackend::always(vec![inside()]),
        MemorySink::new(),
        limits(600, 20),
    );
    let control = controller.control_handle();
    for _ in 0..5 {
        controller.run_cycle()?;
    }
    assert_eq!(probe.open_count(), 1);

    control.stop_recording()?;
    control.stop_recording()?;
    let outcome = controller.run_cycle()?;
    let CycleOutcome::ForcedStop(Some(event)) = outcome else {
        panic!("expected forced stop, got {:?}", outcome);
    };
    assert_eq!(stop_reason(&event), Some(StopReason::ForcedByUser));
    assert_eq!(probe.open_count(), 0);
    assert!(!controller.state().machine.is_recording());

    // Presence is still there, so the next frame starts a fresh session.
    let CycleOutcome::Processed(report) = controller.run_cycle()? else {
        panic!("expected a processed frame");
    };
    assert!(matches!(report.event, Some(RecordingEvent::Start { .. })));

    let forced = controller
        .sessions()
        .iter()
        .filter(|record| record.stop_reason == "forced_by_user")
        .count();
    assert_eq!(forced, 1);
    Ok(())
}

#[test]
fn detector_failure_counts_as_no_detections() -> Result<()> {
    let detector = StubBackend::always(vec![inside()])
        .push(vec![inside()])
        .push_failure("model crashed")
        .push(vec![inside()]);
    let (mut controller, _probe) = controller(
        ScriptedSource::frames(3),
        detector,
        MemorySink::new(),
        limits(600, 20),
    );

    let mut reports = Vec::new();
    while let CycleOutcome::Processed(report) = controller.run_cycle()? {
        reports.push(report);
    }
    assert_eq!(reports.len(), 3);
    assert!(!reports[1].presence);
    assert!(reports[1].detections.is_empty());
    assert_eq!(reports[1].event, Some(RecordingEvent::Continue));
    assert_eq!(controller.stats().detector_failures, 1);
    Ok(())
}

#[test]
fn sink_open_failure_degrades_the_session_without_retrying() -> Result<()> {
    let (mut controller, probe) = controller(
        ScriptedSource::frames(10),
        StubBackend::always(vec![inside()]),
        MemorySink::failing_open(),
        limits(600, 20),
    );
    let events = events_until_end(&mut controller)?;
    assert!(matches!(events[0].1, RecordingEvent::Start { .. }));
    assert_eq!(probe.open_attempts(), 1);
    assert_eq!(controller.stats().sink_open_failures, 1);

    let record = &controller.sessions()[0];
    assert!(record.degraded);
    assert_eq!(record.frames_written, 0);
    assert_eq!(record.stop_reason, "source_exhausted");
    Ok(())
}

#[test]
fn write_failures_are_counted_and_the_loop_continues() -> Result<()> {
    let (mut controller, probe) = controller(
        ScriptedSource::frames(6),
        StubBackend::always(vec![inside()]),
        MemorySink::failing_writes(),
        limits(600, 20),
    );
    events_until_end(&mut controller)?;
    assert_eq!(controller.stats().frames_processed, 6);
    assert_eq!(controller.stats().sink_write_failures, 6);
    assert_eq!(probe.open_count(), 0);
    Ok(())
}

#[test]
fn dropping_the_controller_releases_an_active_sink() -> Result<()> {
    let (mut controller, probe) = controller(
        ScriptedSource::frames(10),
        StubBackend::always(vec![inside()]),
        MemorySink::new(),
        limits(600, 20),
    );
    controller.run_cycle()?;
    controller.run_cycle()?;
    assert_eq!(probe.open_count(), 1);
    drop(controller);
    assert_eq!(probe.open_count(), 0);
    Ok(())
}

#[test]
fn shutdown_command_ends_the_run_with_a_shutdown_stop() -> Result<()> {
    let (mut controller, probe) = controller(
        ScriptedSource::frames(100),
        StubBackend::always(vec![inside()]),
        MemorySink::new(),
        limits(600, 20),
    );
    for _ in 0..3 {
        controller.run_cycle()?;
    }
    controller.control_handle().shutdown()?;
    let summary = controller.run()?;
    assert_eq!(summary.end, RunEnd::Shutdown);
    assert_eq!(summary.stats.frames_processed, 3);
    assert_eq!(summary.sessions.len(), 1);
    assert_eq!(summary.sessions[0].stop_reason, "shutdown");
    assert_eq!(probe.open_count(), 0);
    Ok(())
}

#[test]
fn repeated_source_errors_abort_the_run_after_releasing_the_sink() {
    let source = ScriptedSource::from_steps(
        std::iter::once(Step::Frame).chain((0..5).map(|_| Step::Error)),
    );
    let (mut controller, probe) = controller(
        source,
        StubBackend::always(vec![inside()]),
        MemorySink::new(),
        limits(600, 20),
    );
    assert!(controller.run().is_err());
    assert_eq!(probe.open_count(), 0);
    assert_eq!(controller.stats().source_errors, 5);
    assert_eq!(controller.sessions()[0].stop_reason, "source_failed");
}

#[test]
fn isolated_source_error_is_retried() -> Result<()> {
    let source = ScriptedSource::from_steps([Step::Frame, Step::Error, Step::Frame]);
    let (mut controller, _probe) = controller(
        source,
        StubBackend::new(),
        MemorySink::new(),
        limits(600, 20),
    );
    let summary = controller.run()?;
    assert_eq!(summary.end, RunEnd::EndOfStream);
    assert_eq!(summary.stats.frames_processed, 2);
    assert_eq!(summary.stats.source_errors, 1);
    Ok(())
}

#[test]
fn session_log_and_status_follow_the_pipeline() -> Result<()> {
    let (controller, _probe) = controller(
        ScriptedSource::frames(40),
        StubBackend::always(vec![]).repeat(vec![inside()], 3),
        MemorySink::new(),
        limits(600, 1),
    );
    let mut controller = controller
        .with_store(Box::new(InMemorySessionLogStore::new()))
        .with_place("hallway");

    assert!(controller.status().to_string().starts_with("No human seen yet in the hallway"));
    controller.run_cycle()?;
    let status = controller.status();
    assert!(status.recording);
    assert!(status.last_presence.is_some());
    assert!(status.to_string().starts_with("Last seen human at "));
    assert!(status.to_string().contains("hallway"));

    let summary = controller.run()?;
    assert_eq!(summary.sessions.len(), 1);

    let mut store = controller.take_store().expect("store");
    let recordings = store.recordings(10)?;
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].stop_reason, "presence_lost");
    let messages: Vec<String> = store
        .recent_logs(10)?
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert!(messages.iter().any(|m| m.starts_with("Recording started")));
    assert!(messages.iter().any(|m| m.starts_with("Recording stopped")));
    Ok(())
}

#[test]
fn degraded_session_announces_start_unavailable_and_stop() -> Result<()> {
    let heard = HeardAnnouncements::default();
    let (controller, _probe) = controller(
        ScriptedSource::frames(5),
        StubBackend::always(vec![inside()]),
        MemorySink::failing_open(),
        limits(600, 20),
    );
    let mut controller = controller.with_notifier(Notifier::spawn(Box::new(heard.clone()), 16)?);
    events_until_end(&mut controller)?;
    // Dropping the controller drains the notifier queue.
    drop(controller);

    let announcements = heard.take();
    assert_eq!(announcements.len(), 3);
    assert!(matches!(announcements[0], Announcement::RecordingStarted { .. }));
    assert!(matches!(announcements[1], Announcement::SinkUnavailable { .. }));
    assert!(matches!(
        announcements[2],
        Announcement::RecordingStopped {
            reason: StopReason::SourceExhausted,
            ..
        }
    ));
    let session_id = announcements[0].session_id();
    assert!(announcements.iter().all(|a| a.session_id() == session_id));
    Ok(())
}

#[test]
fn restart_within_the_same_second_gets_a_fresh_session_id() -> Result<()> {
    let wall = Local
        .with_ymd_and_hms(2024, 5, 17, 14, 3, 9)
        .single()
        .expect("unambiguous local time");
    let sink = MemorySink::new();

    let (mut first, probe) = controller(
        ScriptedSource::frames(3).at_wall(wall),
        StubBackend::always(vec![inside()]),
        sink.clone(),
        limits(600, 20),
    );
    events_until_end(&mut first)?;
    assert_eq!(first.sessions()[0].session_id, "recording_2024-05-17_14-03-09");
    drop(first);

    let (mut second, _) = controller(
        ScriptedSource::frames(3).at_wall(wall),
        StubBackend::always(vec![inside()]),
        sink,
        limits(600, 20),
    );
    events_until_end(&mut second)?;
    assert_eq!(second.sessions()[0].session_id, "recording_2024-05-17_14-03-09_002");
    assert!(!second.sessions()[0].degraded);
    assert_eq!(probe.open_attempts(), 2);
    Ok(())
}
