//! Herald SQLite database — connection handling and schema migration.
//!
//! Timestamps are stored as RFC 3339 TEXT; enums as their snake_case
//! string form. WAL mode keeps dashboard reads cheap while a sweep writes.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use herald_core::{HeraldError, Result};

/// Herald persistent store — scheduling store + recipient ledger +
/// participant directory behind one connection.
pub struct HeraldDb {
    pub(crate) conn: Mutex<Connection>,
}

impl HeraldDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| HeraldError::Store(format!("DB open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HeraldError::Store(format!("DB open: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Participant directory (written by external collaborators)
            CREATE TABLE IF NOT EXISTS participants (
                id INTEGER PRIMARY KEY,
                organization_id INTEGER,
                display_name TEXT NOT NULL DEFAULT '',
                external_handle TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Scheduled notifications (what, when, to whom)
            CREATE TABLE IF NOT EXISTS scheduled_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER,
                notification_type TEXT NOT NULL,
                message_template TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                recipient_rule TEXT NOT NULL,    -- tagged JSON: all | organization | explicit_list
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                sent_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Recipient ledger: one row per (notification, recipient)
            CREATE TABLE IF NOT EXISTS notification_recipients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                notification_id INTEGER NOT NULL,
                participant_id INTEGER,
                external_handle TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_at TEXT,
                delivered_at TEXT,
                read_at TEXT,
                responded_at TEXT,
                response_text TEXT,
                error_message TEXT,
                UNIQUE (notification_id, external_handle),
                FOREIGN KEY (notification_id)
                    REFERENCES scheduled_notifications(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_due
                ON scheduled_notifications(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_recipients_notification
                ON notification_recipients(notification_id, status);
            ",
        )
        .map_err(|e| HeraldError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HeraldError::Store(format!("Lock: {e}")))
    }
}

// ── Timestamp helpers ──────────────────────────────

pub(crate) fn to_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// A corrupt stored timestamp falls back to the epoch, which reads as
/// obviously wrong instead of making an old row look freshly updated.
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}
