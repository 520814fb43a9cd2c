//! SQLite-based audit sink

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use warden_util::{SessionId, ToolName};

use crate::{AuditEvent, AuditEventKind, AuditSink, StoreError, StoreResult};

/// SQLite-based audit sink
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let sink = Self {
            conn: Mutex::new(conn),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let sink = Self {
            conn: Mutex::new(conn),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                seq INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                session_id TEXT NOT NULL,
                tool TEXT NOT NULL,
                kind_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_session ON audit_log(session_id);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Audit schema initialized");
        Ok(())
    }

    /// Every stored event of one session, oldest first
    pub fn events_for_session(&self, session_id: &SessionId) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT seq, timestamp, session_id, tool, kind_json FROM audit_log
             WHERE session_id = ? ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([session_id.as_str()], read_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(decode_row(row?)?);
        }
        Ok(events)
    }
}

type RawRow = (i64, String, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_row((seq, timestamp_str, session_id, tool, kind_json): RawRow) -> StoreResult<AuditEvent> {
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or_else(|_| warden_util::now());
    let kind: AuditEventKind = serde_json::from_str(&kind_json)?;

    Ok(AuditEvent {
        id: seq as u64,
        timestamp,
        session_id: SessionId::new(session_id),
        tool: ToolName::new(tool),
        kind,
    })
}

impl AuditSink for SqliteAuditSink {
    fn append(&self, event: &AuditEvent) -> StoreResult<()> {
        let conn = self.lock()?;
        let kind_json = serde_json::to_string(&event.kind)?;

        conn.execute(
            "INSERT INTO audit_log (seq, timestamp, session_id, tool, kind_json)
             VALUES (?, ?, ?, ?, ?)",
            params![
                event.id as i64,
                event.timestamp.to_rfc3339(),
                event.session_id.as_str(),
                event.tool.as_str(),
                kind_json
            ],
        )?;

        debug!(event_id = event.id, kind = event.kind.name(), "Audit event appended");
        Ok(())
    }

    fn recent(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT seq, timestamp, session_id, tool, kind_json FROM audit_log
             ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit as i64], read_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(decode_row(row?)?);
        }
        Ok(events)
    }

    fn last_seq(&self) -> StoreResult<u64> {
        let conn = self.lock()?;
        let seq: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM audit_log", [], |row| {
            row.get(0)
        })?;
        Ok(seq as u64)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Audit sink lock poisoned");
                false
            }
        }
    }
}
