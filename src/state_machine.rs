//! Recording state machine.
//!
//! Turns the per-frame presence signal into start/continue/stop decisions.
//! Two states only (`Idle`, `Recording`) and no terminal state. The duration
//! cap is checked before the grace period on every tick, so a subject that
//! stays in view cannot hold a session open past `max_duration`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(20);

/// Time limits applied to every recording session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordingLimits {
    /// Hard cap on one session's length.
    pub max_duration: Duration,
    /// Tolerated gap without presence before an active session is stopped.
    pub grace_period: Duration,
}

impl Default for RecordingLimits {
    fn default() -> Self {
        Self {
            max_duration: DEFAULT_MAX_DURATION,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording { started_at: Instant },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopReason {
    MaxDurationExceeded,
    PresenceLost,
    ForcedByUser,
    SourceExhausted,
    /// The frame source kept failing.
    SourceFailed,
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxDurationExceeded => "max_duration_exceeded",
            StopReason::PresenceLost => "presence_lost",
            StopReason::ForcedByUser => "forced_by_user",
            StopReason::SourceExhausted => "source_exhausted",
            StopReason::SourceFailed => "source_failed",
            StopReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision emitted for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingEvent {
    /// Entered `Recording`; the current frame is the session's first.
    Start { at: Instant },
    /// Still `Recording`; the current frame goes to the active sink.
    Continue,
    /// Left `Recording`.
    Stop {
        reason: StopReason,
        duration: Duration,
    },
}

#[derive(Debug)]
pub struct RecordingStateMachine {
    limits: RecordingLimits,
    state: RecorderState,
}

impl RecordingStateMachine {
    pub fn new(limits: RecordingLimits) -> Self {
        Self {
            limits,
            state: RecorderState::Idle,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn limits(&self) -> RecordingLimits {
        self.limits
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording { .. })
    }

    /// Advance one tick.
    ///
    /// `last_presence` is the presence tracker's most recent true time
    /// (`None` = never). Returns `None` only for `Idle` without presence.
    pub fn step(
        &mut self,
        presence: bool,
        last_presence: Option<Instant>,
        now: Instant,
    ) -> Option<RecordingEvent> {
        match self.state {
            RecorderState::Idle => {
                if presence {
                    self.state = RecorderState::Recording { started_at: now };
                    Some(RecordingEvent::Start { at: now })
                } else {
                    None
                }
            }
            RecorderState::Recording { started_at } => {
                let elapsed = now.saturating_duration_since(started_at);
                if elapsed > self.limits.max_duration {
                    self.state = RecorderState::Idle;
                    return Some(RecordingEvent::Stop {
                        reason: StopReason::MaxDurationExceeded,
                        duration: elapsed,
                    });
                }
                let silence_exceeded = last_presence.map_or(true, |seen| {
                    now.saturating_duration_since(seen) > self.limits.grace_period
                });
                if !presence && silence_exceeded {
                    self.state = RecorderState::Idle;
                    return Some(RecordingEvent::Stop {
                        reason: StopReason::PresenceLost,
                        duration: elapsed,
                    });
                }
                Some(RecordingEvent::Continue)
            }
        }
    }

    /// Leave `Recording` immediately, whatever the presence state.
    ///
    /// Returns `None` when already idle.
    pub fn force_stop(&mut self, reason: StopReason, now: Instant) -> Option<RecordingEvent> {
        match self.state {
            RecorderState::Idle => None,
            RecorderState::Recording { started_at } => {
                self.state = RecorderState::Idle;
                Some(RecordingEvent::Stop {
                    reason,
                    duration: now.saturating_duration_since(started_at),
                })
            }
        }
    }
}

impl Default for RecordingStateMachine {
    fn default() -> Self {
        Self::new(RecordingLimits::default())
    }
}
