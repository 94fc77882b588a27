//! demo - end-to-end synthetic run for the ROI recorder
//!
//! A bright square walks through the scene on a virtual clock, so a few
//! seconds of wall time cover minutes of "footage". Recordings go to a JPEG
//! sequence under `--out`; the session log is printed at the end.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use roi_recorder::detect::BackendRegistry;
use roi_recorder::ingest::{SyntheticConfig, SyntheticSource};
use roi_recorder::notify::{LogAnnouncer, Notifier};
use roi_recorder::session::{CycleOutcome, RunEnd};
use roi_recorder::sink::{JpegSequenceConfig, JpegSequenceSink};
use roi_recorder::storage::{format_epoch_ms, InMemorySessionLogStore};
use roi_recorder::ui::Ui;
use roi_recorder::{RecordingLimits, Roi, SessionController};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Length of simulated footage in seconds.
    #[arg(long, default_value_t = 120)]
    seconds: u64,
    /// Frames per second of the simulated camera.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Grace period in seconds.
    #[arg(long, default_value_t = 3)]
    grace: u64,
    /// Maximum recording length in seconds.
    #[arg(long, default_value_t = 20)]
    max_duration: u64,
    /// Detector backend (cpu or stub).
    #[arg(long, default_value = "cpu")]
    detector: String,
    /// Output directory for recordings.
    #[arg(long, default_value = "demo_out")]
    out: PathBuf,
    /// Output mode: auto, plain, pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    let ui = Ui::from_flag(&args.ui, std::io::stderr().is_terminal());

    let total_frames = args.seconds.saturating_mul(args.fps as u64);
    let source = SyntheticSource::new(SyntheticConfig {
        name: "stub://demo".to_string(),
        width: WIDTH,
        height: HEIGHT,
        target_fps: args.fps,
        max_frames: Some(total_frames),
        realtime: false,
        // One walk-through every 40 simulated seconds.
        cycle_frames: 40 * args.fps as u64,
        visible_fraction: 0.5,
        subject_size: 48,
    });

    let mut registry = BackendRegistry::with_builtin(Default::default());
    let detector = registry.take(&args.detector)?;
    let sink = JpegSequenceSink::new(JpegSequenceConfig {
        output_dir: args.out.clone(),
        quality: 85,
    });
    let limits = RecordingLimits {
        max_duration: Duration::from_secs(args.max_duration),
        grace_period: Duration::from_secs(args.grace),
    };

    let mut controller = SessionController::new(
        Box::new(source),
        detector,
        Box::new(sink),
        Roi::new(200.0, 150.0, 200.0),
        limits,
    )
    .with_notifier(Notifier::spawn(Box::new(LogAnnouncer), 16)?)
    .with_store(Box::new(InMemorySessionLogStore::new()))
    .with_recording_fps(args.fps)
    .with_place("demo room");

    let summary = {
        let _stage = ui.stage("processing synthetic footage");
        let progress = ui.frame_progress(total_frames);
        controller.warm_up();
        let end = loop {
            match controller.run_cycle()? {
                CycleOutcome::Processed(report) => {
                    progress.inc(1);
                    if report.event.is_some() {
                        progress.set_message(controller.status().to_string());
                    }
                }
                CycleOutcome::EndOfStream => break RunEnd::EndOfStream,
                CycleOutcome::Shutdown => break RunEnd::Shutdown,
                CycleOutcome::SourceError | CycleOutcome::ForcedStop(_) => {}
            }
        };
        progress.finish_and_clear();
        controller.summary(end)
    };

    println!(
        "processed {} frames ({} detector failures)",
        summary.stats.frames_processed, summary.stats.detector_failures
    );
    println!("recordings:");
    for record in &summary.sessions {
        println!(
            "  {} {} {:.1}s {} frames reason={} {}",
            record.session_id,
            format_epoch_ms(record.started_at_ms),
            record.duration_ms as f64 / 1000.0,
            record.frames_written,
            record.stop_reason,
            record.location.as_deref().unwrap_or("(not saved)")
        );
    }
    if let Some(mut store) = controller.take_store() {
        println!("log:");
        let mut lines = store.recent_logs(50)?;
        lines.reverse();
        for line in lines {
            println!("  {}", line.display_line());
        }
    }
    Ok(())
}
