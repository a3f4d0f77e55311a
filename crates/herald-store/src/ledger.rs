//! Recipient ledger — one row per (notification, recipient).
//!
//! The ledger is the unit of idempotence and retry: the recipient set is
//! frozen at materialization, statuses only move forward along the sent
//! track, and a failed row is only ever retried by an explicit resend.

use chrono::Utc;
use rusqlite::params;

use herald_core::{
    DeliveryEvent, HeraldError, Recipient, RecipientEntry, RecipientStatus, Result, SendOutcome,
};

use crate::db::{parse_opt_ts, to_ts, HeraldDb};

const ENTRY_COLUMNS: &str = "id, notification_id, participant_id, external_handle, status, \
     sent_at, delivered_at, read_at, responded_at, response_text, error_message";

impl HeraldDb {
    /// Create ledger rows for a notification's resolved recipients.
    ///
    /// Idempotent: if any entries already exist for this notification the
    /// call is a no-op, so a repeated sweep can never duplicate recipients.
    /// Insertion is transactional — either the full recipient set is
    /// materialized or none of it is.
    pub fn materialize(&self, notification_id: i64, recipients: &[Recipient]) -> Result<usize> {
        let mut conn = self.lock()?;
        let existing: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notification_recipients WHERE notification_id = ?1",
                params![notification_id],
                |r| r.get(0),
            )
            .map_err(|e| HeraldError::Store(format!("Count entries: {e}")))?;
        if existing > 0 {
            tracing::debug!(
                "Ledger for notification {} already materialized ({} entries)",
                notification_id,
                existing
            );
            return Ok(0);
        }

        let tx = conn
            .transaction()
            .map_err(|e| HeraldError::Store(format!("Begin: {e}")))?;
        for r in recipients {
            tx.execute(
                "INSERT INTO notification_recipients
                 (notification_id, participant_id, external_handle, status)
                 VALUES (?1, ?2, ?3, 'pending')",
                params![notification_id, r.participant_id, r.external_handle],
            )
            .map_err(|e| HeraldError::Store(format!("Insert entry: {e}")))?;
        }
        tx.commit()
            .map_err(|e| HeraldError::Store(format!("Commit: {e}")))?;
        tracing::info!(
            "📋 Materialized {} recipients for notification {}",
            recipients.len(),
            notification_id
        );
        Ok(recipients.len())
    }

    /// All ledger entries for a notification.
    pub fn ledger_entries(&self, notification_id: i64) -> Result<Vec<RecipientEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM notification_recipients
                 WHERE notification_id = ?1 ORDER BY id"
            ))
            .map_err(|e| HeraldError::Store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params![notification_id], row_to_entry)
            .map_err(|e| HeraldError::Store(format!("Query: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Ledger entries in one specific status (e.g. pending for a first
    /// attempt, failed for a resend).
    pub fn ledger_entries_with_status(
        &self,
        notification_id: i64,
        status: RecipientStatus,
    ) -> Result<Vec<RecipientEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM notification_recipients
                 WHERE notification_id = ?1 AND status = ?2 ORDER BY id"
            ))
            .map_err(|e| HeraldError::Store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params![notification_id, status.as_str()], row_to_entry)
            .map_err(|e| HeraldError::Store(format!("Query: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Fetch one ledger entry.
    pub fn get_ledger_entry(&self, entry_id: i64) -> Result<Option<RecipientEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM notification_recipients WHERE id = ?1"
            ))
            .map_err(|e| HeraldError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map(params![entry_id], row_to_entry)
            .map_err(|e| HeraldError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(e)) => Ok(Some(e)),
            Some(Err(e)) => Err(HeraldError::Store(format!("Row: {e}"))),
            None => Ok(None),
        }
    }

    /// Record the outcome of one send attempt. A success moves the entry to
    /// `sent` (clearing any previous failure reason — this is the resend
    /// path); a failure stores the reason for the admin detail view.
    pub fn record_outcome(&self, entry_id: i64, outcome: &SendOutcome) -> Result<()> {
        let now = to_ts(Utc::now());
        let conn = self.lock()?;
        match outcome {
            SendOutcome::Sent => {
                conn.execute(
                    "UPDATE notification_recipients
                     SET status = 'sent', sent_at = ?1, error_message = NULL
                     WHERE id = ?2",
                    params![now, entry_id],
                )
                .map_err(|e| HeraldError::Store(format!("Record sent: {e}")))?;
            }
            SendOutcome::Failed(reason) => {
                conn.execute(
                    "UPDATE notification_recipients
                     SET status = 'failed', error_message = ?1
                     WHERE id = ?2",
                    params![reason, entry_id],
                )
                .map_err(|e| HeraldError::Store(format!("Record failed: {e}")))?;
            }
        }
        Ok(())
    }

    /// Apply an asynchronous delivery callback (delivered / read / responded)
    /// from the messaging platform.
    ///
    /// Returns `true` if the event was applied. Events that violate the
    /// monotonic ordering — anything on a `pending` or `failed` entry, or a
    /// step backwards — are rejected as a no-op, because callbacks can
    /// arrive late, duplicated, or out of order. A platform that skips an
    /// intermediate callback (Read with no Delivered) gets the implied
    /// earlier timestamps backfilled.
    ///
    /// The ordering check lives in each UPDATE's WHERE clause, so the check
    /// and the write are one statement: two callbacks for the same entry
    /// racing through concurrent handlers cannot interleave into a
    /// backward transition.
    pub fn record_delivery_event(&self, entry_id: i64, event: &DeliveryEvent) -> Result<bool> {
        let now = to_ts(Utc::now());
        let conn = self.lock()?;
        let changed = match event {
            DeliveryEvent::Delivered => conn.execute(
                "UPDATE notification_recipients
                 SET status = 'delivered', delivered_at = COALESCE(delivered_at, ?1)
                 WHERE id = ?2 AND status = 'sent'",
                params![now, entry_id],
            ),
            DeliveryEvent::Read => conn.execute(
                "UPDATE notification_recipients
                 SET status = 'read',
                     delivered_at = COALESCE(delivered_at, ?1),
                     read_at = COALESCE(read_at, ?1)
                 WHERE id = ?2 AND status IN ('sent', 'delivered')",
                params![now, entry_id],
            ),
            DeliveryEvent::Responded { text } => conn.execute(
                "UPDATE notification_recipients
                 SET status = 'responded',
                     delivered_at = COALESCE(delivered_at, ?1),
                     read_at = COALESCE(read_at, ?1),
                     responded_at = COALESCE(responded_at, ?1),
                     response_text = ?2
                 WHERE id = ?3 AND status IN ('sent', 'delivered', 'read')",
                params![now, text, entry_id],
            ),
        }
        .map_err(|e| HeraldError::Store(format!("Record event: {e}")))?;

        if changed == 0 {
            tracing::debug!("Ignoring {:?} for entry {}", event, entry_id);
        }
        Ok(changed > 0)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecipientEntry> {
    let status_str: String = row.get(4)?;
    Ok(RecipientEntry {
        id: row.get(0)?,
        notification_id: row.get(1)?,
        participant_id: row.get(2)?,
        external_handle: row.get(3)?,
        status: RecipientStatus::parse_str(&status_str).unwrap_or(RecipientStatus::Pending),
        sent_at: parse_opt_ts(row.get(5)?),
        delivered_at: parse_opt_ts(row.get(6)?),
        read_at: parse_opt_ts(row.get(7)?),
        responded_at: parse_opt_ts(row.get(8)?),
        response_text: row.get(9)?,
        error_message: row.get(10)?,
    })
}
