//! recordings - list finished recordings or recent log lines from the session log

use anyhow::Result;
use clap::Parser;

use roi_recorder::storage::{format_epoch_ms, SessionLogStore, SqliteSessionLogStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Session log database.
    #[arg(long, env = "ROI_RECORDER_DB_PATH", default_value = "roi_recorder.db")]
    db: String,
    /// Show log lines instead of recordings.
    #[arg(long)]
    logs: bool,
    /// Maximum number of entries, newest first.
    #[arg(long, default_value_t = 20)]
    limit: usize,
    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let mut store = SqliteSessionLogStore::open(&args.db)?;

    if args.logs {
        let entries = store.recent_logs(args.limit)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        } else if entries.is_empty() {
            println!("no log entries in {}", args.db);
        } else {
            for entry in entries {
                println!("{}", entry.display_line());
            }
        }
        return Ok(());
    }

    let records = store.recordings(args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("no recordings in {}", args.db);
        return Ok(());
    }
    for record in records {
        println!(
            "{}  start={}  end={}  {:.1}s  frames={}  reason={}{}",
            record.session_id,
            format_epoch_ms(record.started_at_ms),
            format_epoch_ms(record.ended_at_ms),
            record.duration_ms as f64 / 1000.0,
            record.frames_written,
            record.stop_reason,
            match (&record.location, record.degraded) {
                (_, true) => "  (not saved)".to_string(),
                (Some(location), false) => format!("  {}", location),
                (None, false) => String::new(),
            }
        );
    }
    Ok(())
}
