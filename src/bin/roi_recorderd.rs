//! roi_recorderd - presence-triggered ROI recorder daemon
//!
//! This daemon:
//! 1. Pulls frames from the configured source (camera, image directory, stub)
//! 2. Runs the configured detector and checks detections against the ROI
//! 3. Starts, continues and stops recordings under the duration/grace limits
//! 4. Announces recording changes and writes the session log
//!
//! Control lines on stdin: `stop`, `mute`, `unmute`, `status`, `quit`.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use roi_recorder::session::{ControlCommand, ControlHandle, CycleOutcome, RunEnd};
use roi_recorder::{RecorderConfig, SessionController};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const SOURCE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "ROI_RECORDER_CONFIG")]
    config: Option<PathBuf>,
    /// Ignore stdin control lines.
    #[arg(long)]
    no_stdin: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = RecorderConfig::load_from(args.config.as_deref())?;
    log::info!(
        "roi_recorderd {} starting: source={} detector={} roi={},{},{} output={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.detector.backend,
        cfg.roi.x,
        cfg.roi.y,
        cfg.roi.size,
        cfg.recording.output_dir.display()
    );

    let mut controller = SessionController::from_config(&cfg)?;
    let control = controller.control_handle();

    let ctrlc_control = control.clone();
    ctrlc::set_handler(move || {
        if ctrlc_control.shutdown().is_err() {
            log::warn!("shutdown requested after controller exit");
        }
    })
    .context("install ctrl-c handler")?;

    if !args.no_stdin {
        spawn_stdin_commands(control)?;
    }

    controller.warm_up();
    let mut last_health_log = Instant::now();
    let end = loop {
        match controller.run_cycle()? {
            CycleOutcome::EndOfStream => break RunEnd::EndOfStream,
            CycleOutcome::Shutdown => break RunEnd::Shutdown,
            CycleOutcome::SourceError => std::thread::sleep(SOURCE_RETRY_BACKOFF),
            CycleOutcome::Processed(_) | CycleOutcome::ForcedStop(_) => {}
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = controller.source_stats();
            log::info!(
                "source health={} frames={} source={} recording={}",
                controller.source_healthy(),
                stats.frames_captured,
                stats.source,
                controller.state().machine.is_recording()
            );
            last_health_log = Instant::now();
        }
    };

    let summary = controller.summary(end);
    log::info!(
        "roi_recorderd stopped ({:?}): {} frames, {} recordings, {} detector failures",
        summary.end,
        summary.stats.frames_processed,
        summary.sessions.len(),
        summary.stats.detector_failures
    );
    Ok(())
}

fn parse_command(line: &str) -> Option<ControlCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "stop" => Some(ControlCommand::StopRecording),
        "mute" | "silence" => Some(ControlCommand::SilenceAlerts(true)),
        "unmute" => Some(ControlCommand::SilenceAlerts(false)),
        "status" | "where" => Some(ControlCommand::ReportStatus),
        "quit" | "exit" => Some(ControlCommand::Shutdown),
        _ => None,
    }
}

fn spawn_stdin_commands(control: ControlHandle) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-control".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(command) => {
                        if control.send(command).is_err() {
                            break;
                        }
                    }
                    None => log::warn!(
                        "unknown command '{}' (expected stop, mute, unmute, status, quit)",
                        line.trim()
                    ),
                }
            }
        })
        .context("spawn stdin control thread")?;
    Ok(())
}
