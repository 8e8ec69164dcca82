//! SQLite invocation history.
//!
//! Uses `rusqlite` in synchronous mode; async callers go through
//! `spawn_blocking`. WAL mode is enabled so the REST surface can read while
//! invocations are being recorded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use super::errors::LogStoreError;
use super::types::{
    percent, round2, InvocationLog, InvocationPattern, InvocationStats, ServerStats, ToolStats,
};
use super::InvocationLogger;

/// Number of most recent invocations scanned for call sequences.
const PATTERN_WINDOW: usize = 1000;

/// Maximum number of patterns reported.
const MAX_PATTERNS: usize = 20;

/// Location of the history database under the user's home directory.
pub fn default_db_path() -> Result<PathBuf, LogStoreError> {
    dirs::home_dir()
        .map(|home| home.join(".mcp-bridge").join("logs.db"))
        .ok_or(LogStoreError::NoHomeDir)
}

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite-backed [`InvocationLogger`].
pub struct SqliteInvocationLogger {
    conn: Mutex<Connection>,
}

impl SqliteInvocationLogger {
    /// Open (or create) the history database at the given path, creating its
    /// directory if needed.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, LogStoreError> {
        if path != ":memory:" {
            if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        tracing::debug!(path, "invocation log opened");
        Ok(db)
    }

    /// Open the database at [`default_db_path`].
    pub fn open_default() -> Result<Self, LogStoreError> {
        let path = default_db_path()?;
        Self::open(&path.to_string_lossy())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LogStoreError> {
        self.conn.lock().map_err(|_| LogStoreError::LockPoisoned)
    }

    fn create_tables(&self) -> Result<(), LogStoreError> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS invocations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                server_name TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                parameters TEXT,
                success INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                response_summary TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_invocations_timestamp
                ON invocations(timestamp DESC);

            CREATE INDEX IF NOT EXISTS idx_invocations_server_tool
                ON invocations(server_name, tool_name);
            ",
        )?;
        Ok(())
    }
}

impl InvocationLogger for SqliteInvocationLogger {
    fn log(&self, entry: &InvocationLog) -> Result<(), LogStoreError> {
        self.conn()?.execute(
            "INSERT INTO invocations
                (timestamp, server_name, tool_name, parameters, success, duration_ms, response_summary, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.timestamp,
                entry.server_name,
                entry.tool_name,
                entry.parameters,
                entry.success,
                entry.duration_ms as i64,
                entry.response_summary,
                entry.error,
            ],
        )?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<InvocationLog>, LogStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, server_name, tool_name, parameters,
                    success, duration_ms, response_summary, error
             FROM invocations
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(InvocationLog {
                id: Some(row.get(0)?),
                timestamp: row.get(1)?,
                server_name: row.get(2)?,
                tool_name: row.get(3)?,
                parameters: row.get(4)?,
                success: row.get(5)?,
                duration_ms: row.get::<_, i64>(6)?.max(0) as u64,
                response_summary: row.get(7)?,
                error: row.get(8)?,
            })
        })?;
        let logs = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    fn stats(&self) -> Result<InvocationStats, LogStoreError> {
        let conn = self.conn()?;

        let (total, successes, avg_duration) = conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END),
                    AVG(duration_ms)
             FROM invocations",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            },
        )?;
        let total = total.max(0) as u64;
        let successes = successes.unwrap_or(0).max(0) as u64;

        let mut stmt = conn.prepare(
            "SELECT server_name, tool_name, COUNT(*) AS count,
                    SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END),
                    AVG(duration_ms)
             FROM invocations
             GROUP BY server_name, tool_name
             ORDER BY count DESC, server_name, tool_name",
        )?;
        let by_tool = stmt
            .query_map([], |row| {
                let count = row.get::<_, i64>(2)? as u64;
                let success_count = row.get::<_, i64>(3)? as u64;
                Ok(ToolStats {
                    server_name: row.get(0)?,
                    tool_name: row.get(1)?,
                    count,
                    success_count,
                    success_rate: percent(success_count, count),
                    average_duration_ms: round2(row.get::<_, f64>(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT server_name, COUNT(*) AS count,
                    SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END)
             FROM invocations
             GROUP BY server_name
             ORDER BY count DESC, server_name",
        )?;
        let by_server = stmt
            .query_map([], |row| {
                let count = row.get::<_, i64>(1)? as u64;
                let success_count = row.get::<_, i64>(2)? as u64;
                Ok(ServerStats {
                    server_name: row.get(0)?,
                    count,
                    success_count,
                    success_rate: percent(success_count, count),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(InvocationStats {
            total_invocations: total,
            success_count: successes,
            failure_count: total.saturating_sub(successes),
            success_rate: percent(successes, total),
            average_duration_ms: round2(avg_duration.unwrap_or(0.0)),
            by_tool,
            by_server,
        })
    }

    fn patterns(&self) -> Result<Vec<InvocationPattern>, LogStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT server_name, tool_name, success
             FROM invocations
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
        )?;
        let mut calls = stmt
            .query_map(params![PATTERN_WINDOW as i64], |row| {
                Ok(Call {
                    label: format!("{}/{}", row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    success: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        calls.reverse();
        Ok(find_patterns(&calls))
    }
}

// ─── Pattern Analysis ───────────────────────────────────────────────────────

/// One call in chronological order, labelled `server/tool`.
struct Call {
    label: String,
    success: bool,
}

/// Count every window of 2 and 3 consecutive calls; keep sequences seen more
/// than once, most frequent first.
fn find_patterns(calls: &[Call]) -> Vec<InvocationPattern> {
    let mut counts: HashMap<String, (u64, u64)> = HashMap::new();

    for size in [2, 3] {
        for window in calls.windows(size) {
            let sequence = window
                .iter()
                .map(|c| c.label.as_str())
                .collect::<Vec<_>>()
                .join(" → ");
            let all_ok = window.iter().all(|c| c.success);
            let entry = counts.entry(sequence).or_default();
            entry.0 += 1;
            if all_ok {
                entry.1 += 1;
            }
        }
    }

    let mut patterns: Vec<InvocationPattern> = counts
        .into_iter()
        .filter(|(_, (total, _))| *total > 1)
        .map(|(sequence, (total, ok))| InvocationPattern {
            sequence,
            occurrences: total,
            success_count: ok,
            failure_count: total - ok,
            success_rate: percent(ok, total),
        })
        .collect();

    patterns.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
    patterns.truncate(MAX_PATTERNS);
    patterns
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(server: &str, tool: &str, success: bool, duration_ms: u64) -> InvocationLog {
        InvocationLog {
            id: None,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            server_name: server.into(),
            tool_name: tool.into(),
            parameters: None,
            success,
            duration_ms,
            response_summary: None,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    fn test_db() -> SqliteInvocationLogger {
        SqliteInvocationLogger::open(":memory:").unwrap()
    }

    #[test]
    fn test_recent_newest_first_with_limit() {
        let db = test_db();
        db.log(&entry("fs", "read", true, 5)).unwrap();
        db.log(&entry("fs", "write", true, 7)).unwrap();
        db.log(&entry("web", "search", false, 9)).unwrap();

        let logs = db.recent(2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].tool_name, "search");
        assert_eq!(logs[0].error.as_deref(), Some("boom"));
        assert!(!logs[0].success);
        assert_eq!(logs[1].tool_name, "write");
        assert!(logs[0].id.unwrap() > logs[1].id.unwrap());
    }

    #[test]
    fn test_stats_on_empty_store() {
        let stats = test_db().stats().unwrap();
        assert_eq!(stats, InvocationStats::default());
    }

    #[test]
    fn test_stats_breakdowns() {
        let db = test_db();
        db.log(&entry("fs", "read", true, 10)).unwrap();
        db.log(&entry("fs", "read", false, 20)).unwrap();
        db.log(&entry("fs", "read", true, 30)).unwrap();
        db.log(&entry("web", "search", true, 5)).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_invocations, 4);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.average_duration_ms, 16.25);

        assert_eq!(stats.by_tool[0].tool_name, "read");
        assert_eq!(stats.by_tool[0].count, 3);
        assert_eq!(stats.by_tool[0].success_rate, 66.67);
        assert_eq!(stats.by_tool[0].average_duration_ms, 20.0);

        assert_eq!(stats.by_server.len(), 2);
        assert_eq!(stats.by_server[0].server_name, "fs");
        assert_eq!(stats.by_server[1].success_rate, 100.0);
    }

    #[test]
    fn test_detects_repeated_sequence() {
        let db = test_db();
        for _ in 0..3 {
            db.log(&entry("pattern-server", "tool-a", true, 1)).unwrap();
            db.log(&entry("pattern-server", "tool-b", true, 1)).unwrap();
        }

        let patterns = db.patterns().unwrap();
        let ab = patterns
            .iter()
            .find(|p| p.sequence == "pattern-server/tool-a → pattern-server/tool-b")
            .unwrap();
        assert_eq!(ab.occurrences, 3);
        assert_eq!(ab.success_rate, 100.0);
        assert_eq!(patterns[0].occurrences, 3);
        assert!(patterns.iter().all(|p| p.occurrences > 1));
        assert!(patterns.iter().any(|p| p.sequence.matches(" → ").count() == 2));
    }

    #[test]
    fn test_pattern_failure_counts() {
        let calls = [("a", true), ("b", false), ("a", true), ("b", true)]
            .iter()
            .map(|(label, success)| Call {
                label: format!("s/{label}"),
                success: *success,
            })
            .collect::<Vec<_>>();

        let patterns = find_patterns(&calls);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].sequence, "s/a → s/b");
        assert_eq!(patterns[0].occurrences, 2);
        assert_eq!(patterns[0].success_count, 1);
        assert_eq!(patterns[0].failure_count, 1);
        assert_eq!(patterns[0].success_rate, 50.0);
    }

    #[test]
    fn test_single_calls_yield_no_patterns() {
        let db = test_db();
        db.log(&entry("fs", "read", true, 1)).unwrap();
        assert!(db.patterns().unwrap().is_empty());
    }

    #[test]
    fn test_file_database_persists_and_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("logs.db");
        let path = path.to_string_lossy().to_string();

        {
            let db = SqliteInvocationLogger::open(&path).unwrap();
            db.log(&entry("fs", "read", true, 3)).unwrap();
        }

        let reopened = SqliteInvocationLogger::open(&path).unwrap();
        let logs = reopened.recent(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].duration_ms, 3);
    }
}
