//! Best-effort user announcements.
//!
//! The pipeline never waits on an announcement: `Notifier::notify` enqueues
//! onto a bounded queue drained by a worker thread, and drops the message
//! when the queue is full.

use anyhow::{anyhow, Context, Result};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::state_machine::StopReason;

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Announcement {
    RecordingStarted { session_id: String },
    RecordingStopped { session_id: String, reason: StopReason },
    SinkUnavailable { session_id: String },
}

impl Announcement {
    /// Spoken/displayed text.
    pub fn text(&self) -> String {
        match self {
            Announcement::RecordingStarted { .. } => {
                "Recording started. Human detected inside the box.".to_string()
            }
            Announcement::RecordingStopped {
                reason: StopReason::ForcedByUser,
                ..
            } => "Recording stopped by user.".to_string(),
            Announcement::RecordingStopped { .. } => {
                "Recording stopped. Human disappeared or maximum duration reached.".to_string()
            }
            Announcement::SinkUnavailable { .. } => {
                "Recording could not be saved. Check the recordings folder.".to_string()
            }
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Announcement::RecordingStarted { session_id }
            | Announcement::RecordingStopped { session_id, .. }
            | Announcement::SinkUnavailable { session_id } => session_id,
        }
    }
}

/// Delivers one announcement. Runs on the notifier worker, so it may block.
pub trait Announcer: Send {
    fn announce(&mut self, announcement: &Announcement) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct LogAnnouncer;

impl Announcer for LogAnnouncer {
    fn announce(&mut self, announcement: &Announcement) -> Result<()> {
        log::info!(
            "announce [{}]: {}",
            announcement.session_id(),
            announcement.text()
        );
        Ok(())
    }
}

/// Runs an external speech command (e.g. `espeak`) with the text as the last argument.
#[derive(Clone, Debug)]
pub struct CommandAnnouncer {
    program: String,
    args: Vec<String>,
}

impl CommandAnnouncer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace separated command line such as `"espeak -s 150"`.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("speech command must not be empty"))?;
        Ok(Self::new(program, parts.collect()))
    }
}

impl Announcer for CommandAnnouncer {
    fn announce(&mut self, announcement: &Announcement) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(announcement.text())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("run speech command {}", self.program))?;
        if !status.success() {
            return Err(anyhow!("speech command {} exited with {}", self.program, status));
        }
        Ok(())
    }
}

pub struct Notifier {
    tx: Option<SyncSender<Announcement>>,
    worker: Option<JoinHandle<()>>,
    muted: Arc<AtomicBool>,
    dropped: AtomicU64,
}

impl Notifier {
    pub fn spawn(mut announcer: Box<dyn Announcer>, capacity: usize) -> Result<Self> {
        let (tx, rx) = sync_channel::<Announcement>(capacity.max(1));
        let muted = Arc::new(AtomicBool::new(false));
        let worker_muted = muted.clone();
        let worker = std::thread::Builder::new()
            .name("notifier".to_string())
            .spawn(move || {
                for announcement in rx {
                    if worker_muted.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Err(err) = announcer.announce(&announcement) {
                        log::warn!("notifier: announcement failed: {:#}", err);
                    }
                }
            })
            .context("spawn notifier worker")?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            muted,
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue without blocking. Returns false if the message was dropped.
    pub fn notify(&self, announcement: Announcement) -> bool {
        if self.is_muted() {
            return false;
        }
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(announcement) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("notifier: queue full, dropped '{}'", dropped.text());
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver whatever is queued, then stop the worker.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("notifier: worker panicked");
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Recorded(Arc<Mutex<Vec<String>>>);

    impl Announcer for Recorded {
        fn announce(&mut self, announcement: &Announcement) -> Result<()> {
            self.0.lock().expect("lock").push(announcement.text());
            Ok(())
        }
    }

    struct Blocking(mpsc::Receiver<()>);

    impl Announcer for Blocking {
        fn announce(&mut self, _announcement: &Announcement) -> Result<()> {
            let _ = self.0.recv_timeout(Duration::from_secs(5));
            Ok(())
        }
    }

    fn started() -> Announcement {
        Announcement::RecordingStarted {
            session_id: "s".to_string(),
        }
    }

    #[test]
    fn notifier_delivers_in_order_and_drains_on_shutdown() -> Result<()> {
        let recorded = Recorded::default();
        let mut notifier = Notifier::spawn(Box::new(recorded.clone()), 8)?;
        assert!(notifier.notify(started()));
        assert!(notifier.notify(Announcement::RecordingStopped {
            session_id: "s".to_string(),
            reason: StopReason::PresenceLost,
        }));
        notifier.shutdown();

        let texts = recorded.0.lock().expect("lock").clone();
        assert_eq!(
            texts,
            vec![
                "Recording started. Human detected inside the box.".to_string(),
                "Recording stopped. Human disappeared or maximum duration reached.".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() -> Result<()> {
        let (release, gate) = mpsc::channel();
        let mut notifier = Notifier::spawn(Box::new(Blocking(gate)), 1)?;
        let mut accepted = 0;
        for _ in 0..10 {
            if notifier.notify(started()) {
                accepted += 1;
            }
        }
        // One in flight on the worker plus one queued at most.
        assert!(accepted <= 2);
        assert_eq!(notifier.dropped(), 10 - accepted);
        drop(release);
        notifier.shutdown();
        Ok(())
    }

    #[test]
    fn muted_notifier_skips_announcements() -> Result<()> {
        let recorded = Recorded::default();
        let mut notifier = Notifier::spawn(Box::new(recorded.clone()), 4)?;
        notifier.set_muted(true);
        assert!(!notifier.notify(started()));
        notifier.set_muted(false);
        assert!(notifier.notify(started()));
        notifier.shutdown();
        assert_eq!(recorded.0.lock().expect("lock").len(), 1);
        Ok(())
    }

    #[test]
    fn command_line_parsing() -> Result<()> {
        let announcer = CommandAnnouncer::from_command_line("espeak -s 150")?;
        assert_eq!(announcer.program, "espeak");
        assert_eq!(announcer.args, vec!["-s".to_string(), "150".to_string()]);
        assert!(CommandAnnouncer::from_command_line("   ").is_err());
        Ok(())
    }
}
