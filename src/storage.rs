//! Session log: human readable log lines plus one record per finished
//! recording. Backs the "view logs / recordings" query.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, TimeZone};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix epoch milliseconds.
    pub at_ms: i64,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at_ms: Local::now().timestamp_millis(),
            message: message.into(),
        }
    }

    /// `YYYY-MM-DD HH:MM:SS - message` in local time.
    pub fn display_line(&self) -> String {
        format!("{} - {}", format_epoch_ms(self.at_ms), self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub duration_ms: u64,
    pub stop_reason: String,
    pub frames_written: u64,
    /// The sink never opened, so nothing was saved.
    pub degraded: bool,
    pub location: Option<String>,
    pub sha256: Option<String>,
}

pub fn format_epoch_ms(at_ms: i64) -> String {
    match Local.timestamp_millis_opt(at_ms).single() {
        Some(at) => format_local(&at),
        None => format!("@{}ms", at_ms),
    }
}

pub fn format_local(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub trait SessionLogStore {
    fn append_log(&mut self, entry: &LogEntry) -> Result<()>;

    fn record_session(&mut self, record: &SessionRecord) -> Result<()>;

    /// Newest first.
    fn recent_logs(&mut self, limit: usize) -> Result<Vec<LogEntry>>;

    /// Newest first.
    fn recordings(&mut self, limit: usize) -> Result<Vec<SessionRecord>>;
}

pub struct SqliteSessionLogStore {
    conn: Connection,
}

impl SqliteSessionLogStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("open session log {}", db_path.display()))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS log_lines (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              message TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recordings (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              session_id TEXT NOT NULL UNIQUE,
              started_at INTEGER NOT NULL,
              ended_at INTEGER NOT NULL,
              duration_ms INTEGER NOT NULL,
              stop_reason TEXT NOT NULL,
              frames_written INTEGER NOT NULL,
              degraded INTEGER NOT NULL,
              location TEXT,
              sha256 TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_log_lines_created ON log_lines(created_at);
            "#,
        )?;
        Ok(())
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", what))
}

impl SessionLogStore for SqliteSessionLogStore {
    fn append_log(&mut self, entry: &LogEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO log_lines(created_at, message) VALUES (?1, ?2)",
            params![entry.at_ms, entry.message],
        )?;
        Ok(())
    }

    fn record_session(&mut self, record: &SessionRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO recordings(
              session_id, started_at, ended_at, duration_ms, stop_reason,
              frames_written, degraded, location, sha256
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.session_id,
                record.started_at_ms,
                record.ended_at_ms,
                to_i64(record.duration_ms, "duration_ms")?,
                record.stop_reason,
                to_i64(record.frames_written, "frames_written")?,
                record.degraded,
                record.location,
                record.sha256
            ],
        )?;
        Ok(())
    }

    fn recent_logs(&mut self, limit: usize) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT created_at, message FROM log_lines ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![to_i64(limit as u64, "limit")?], |row| {
            Ok(LogEntry {
                at_ms: row.get(0)?,
                message: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn recordings(&mut self, limit: usize) -> Result<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, started_at, ended_at, duration_ms, stop_reason,
                   frames_written, degraded, location, sha256
            FROM recordings ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![to_i64(limit as u64, "limit")?], |row| {
            let duration_ms: i64 = row.get(3)?;
            let frames_written: i64 = row.get(5)?;
            Ok(SessionRecord {
                session_id: row.get(0)?,
                started_at_ms: row.get(1)?,
                ended_at_ms: row.get(2)?,
                duration_ms: duration_ms.max(0) as u64,
                stop_reason: row.get(4)?,
                frames_written: frames_written.max(0) as u64,
                degraded: row.get(6)?,
                location: row.get(7)?,
                sha256: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Volatile store for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionLogStore {
    logs: Vec<LogEntry>,
    records: Vec<SessionRecord>,
}

impl InMemorySessionLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionLogStore for InMemorySessionLogStore {
    fn append_log(&mut self, entry: &LogEntry) -> Result<()> {
        self.logs.push(entry.clone());
        Ok(())
    }

    fn record_session(&mut self, record: &SessionRecord) -> Result<()> {
        if self
            .records
            .iter()
            .any(|existing| existing.session_id == record.session_id)
        {
            return Err(anyhow!("session {} already recorded", record.session_id));
        }
        self.records.push(record.clone());
        Ok(())
    }

    fn recent_logs(&mut self, limit: usize) -> Result<Vec<LogEntry>> {
        Ok(self.logs.iter().rev().take(limit).cloned().collect())
    }

    fn recordings(&mut self, limit: usize) -> Result<Vec<SessionRecord>> {
        Ok(self.records.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str) -> SessionRecord {
        SessionRecord {
            session_id: session_id.to_string(),
            started_at_ms: 1_700_000_000_000,
            ended_at_ms: 1_700_000_030_000,
            duration_ms: 30_000,
            stop_reason: "presence_lost".to_string(),
            frames_written: 300,
            degraded: false,
            location: Some("recordings/x".to_string()),
            sha256: None,
        }
    }

    fn exercise(store: &mut dyn SessionLogStore) -> Result<()> {
        store.append_log(&LogEntry {
            at_ms: 1,
            message: "first".to_string(),
        })?;
        store.append_log(&LogEntry {
            at_ms: 2,
            message: "second".to_string(),
        })?;
        let logs = store.recent_logs(1)?;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "second");

        store.record_session(&record("a"))?;
        store.record_session(&record("b"))?;
        assert!(store.record_session(&record("a")).is_err());
        let recordings = store.recordings(10)?;
        assert_eq!(recordings.len(), 2);
        assert_eq!(recordings[0].session_id, "b");
        assert_eq!(recordings[1], record("a"));
        Ok(())
    }

    #[test]
    fn sqlite_store_round_trips_logs_and_recordings() -> Result<()> {
        let mut store = SqliteSessionLogStore::open_in_memory()?;
        exercise(&mut store)
    }

    #[test]
    fn in_memory_store_matches_sqlite_behaviour() -> Result<()> {
        let mut store = InMemorySessionLogStore::new();
        exercise(&mut store)
    }

    #[test]
    fn sqlite_store_persists_across_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("log.db");
        {
            let mut store = SqliteSessionLogStore::open(&path)?;
            store.record_session(&record("kept"))?;
        }
        let mut store = SqliteSessionLogStore::open(&path)?;
        assert_eq!(store.recordings(5)?[0].session_id, "kept");
        Ok(())
    }

    #[test]
    fn display_line_uses_log_format() {
        let entry = LogEntry::now("Recording started");
        let line = entry.display_line();
        assert!(line.ends_with(" - Recording started"));
        assert_eq!(line.len(), "YYYY-MM-DD HH:MM:SS - Recording started".len());
    }
}
