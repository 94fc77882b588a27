//! In-memory recording sink with failure injection.
//!
//! The sink state lives behind a shared lock so a `MemorySinkProbe` kept by
//! the caller can inspect what the session controller recorded.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RecordingSink, RecordingSummary, SinkHandle};
use crate::frame::FrameDimensions;

#[derive(Clone, Debug)]
pub struct MemoryRecording {
    pub handle: SinkHandle,
    pub dimensions: FrameDimensions,
    pub target_fps: u32,
    pub frames_written: u64,
    pub last_frame: Option<RgbImage>,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct MemorySinkState {
    recordings: Vec<MemoryRecording>,
    open_attempts: u64,
    fail_open: bool,
    fail_writes: bool,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

/// Read-only view onto a `MemorySink` that has been handed off.
#[derive(Clone)]
pub struct MemorySinkProbe {
    state: Arc<Mutex<MemorySinkState>>,
}

fn lock(state: &Arc<Mutex<MemorySinkState>>) -> Result<MutexGuard<'_, MemorySinkState>> {
    state
        .lock()
        .map_err(|_| anyhow!("memory sink lock poisoned"))
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` fails.
    pub fn failing_open() -> Self {
        let sink = Self::new();
        if let Ok(mut state) = sink.state.lock() {
            state.fail_open = true;
        }
        sink
    }

    /// `open` succeeds but every `write` fails.
    pub fn failing_writes() -> Self {
        let sink = Self::new();
        if let Ok(mut state) = sink.state.lock() {
            state.fail_writes = true;
        }
        sink
    }

    pub fn probe(&self) -> MemorySinkProbe {
        MemorySinkProbe {
            state: self.state.clone(),
        }
    }
}

impl MemorySinkProbe {
    pub fn recordings(&self) -> Vec<MemoryRecording> {
        lock(&self.state)
            .map(|state| state.recordings.clone())
            .unwrap_or_default()
    }

    pub fn open_attempts(&self) -> u64 {
        lock(&self.state)
            .map(|state| state.open_attempts)
            .unwrap_or_default()
    }

    /// Recordings opened but not yet closed.
    pub fn open_count(&self) -> usize {
        self.recordings().iter().filter(|r| !r.closed).count()
    }
}

impl RecordingSink for MemorySink {
    fn open(
        &mut self,
        session_id: &str,
        dimensions: FrameDimensions,
        target_fps: u32,
    ) -> Result<SinkHandle> {
        let mut state = lock(&self.state)?;
        state.open_attempts += 1;
        if state.fail_open {
            return Err(anyhow!("memory sink refused to open {}", session_id));
        }
        if let Some(active) = state.recordings.iter().find(|r| !r.closed) {
            return Err(anyhow!(
                "recording {} is still open",
                active.handle.session_id
            ));
        }
        state.next_id += 1;
        let handle = SinkHandle {
            id: state.next_id,
            session_id: session_id.to_string(),
        };
        state.recordings.push(MemoryRecording {
            handle: handle.clone(),
            dimensions,
            target_fps,
            frames_written: 0,
            last_frame: None,
            closed: false,
        });
        Ok(handle)
    }

    fn write(&mut self, handle: &SinkHandle, frame: &RgbImage) -> Result<()> {
        let mut state = lock(&self.state)?;
        if state.fail_writes {
            return Err(anyhow!("memory sink write failure"));
        }
        let recording = state
            .recordings
            .iter_mut()
            .find(|r| r.handle == *handle && !r.closed)
            .ok_or_else(|| anyhow!("recording {} is not open", handle.session_id))?;
        recording.frames_written += 1;
        recording.last_frame = Some(frame.clone());
        Ok(())
    }

    fn close(&mut self, handle: &SinkHandle) -> Result<Option<RecordingSummary>> {
        let mut state = lock(&self.state)?;
        let recording = state
            .recordings
            .iter_mut()
            .find(|r| r.handle == *handle)
            .ok_or_else(|| anyhow!("unknown recording handle {}", handle.id))?;
        if recording.closed {
            return Ok(None);
        }
        recording.closed = true;
        Ok(Some(RecordingSummary {
            session_id: recording.handle.session_id.clone(),
            dimensions: recording.dimensions,
            target_fps: recording.target_fps,
            frames_written: recording.frames_written,
            location: None,
            sha256: None,
        }))
    }

    fn has_recording(&self, session_id: &str) -> bool {
        lock(&self.state)
            .map(|state| {
                state
                    .recordings
                    .iter()
                    .any(|r| r.handle.session_id == session_id)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_tracks_recordings_through_probe() -> Result<()> {
        let mut sink = MemorySink::new();
        let probe = sink.probe();
        let handle = sink.open("s1", FrameDimensions::new(2, 2), 30)?;
        sink.write(&handle, &RgbImage::new(2, 2))?;
        assert_eq!(probe.open_count(), 1);

        let summary = sink.close(&handle)?.expect("summary");
        assert_eq!(summary.frames_written, 1);
        assert!(sink.close(&handle)?.is_none());
        assert_eq!(probe.open_count(), 0);
        assert_eq!(probe.recordings().len(), 1);
        Ok(())
    }

    #[test]
    fn failure_injection() {
        let mut refusing = MemorySink::failing_open();
        assert!(refusing.open("s", FrameDimensions::new(2, 2), 30).is_err());
        assert_eq!(refusing.probe().open_attempts(), 1);

        let mut broken = MemorySink::failing_writes();
        let handle = broken
            .open("s", FrameDimensions::new(2, 2), 30)
            .expect("open succeeds");
        assert!(broken.write(&handle, &RgbImage::new(2, 2)).is_err());
    }
}
