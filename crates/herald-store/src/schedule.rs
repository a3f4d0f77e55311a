//! Scheduling store — persisted definitions of planned broadcasts.
//!
//! Written by external collaborators (event flow, admin API, bot commands),
//! read by the dispatch engine via `list_due`. Status transitions are
//! one-way: pending → {sent|partial|failed|cancelled}; only the explicit
//! resend path may move failed/partial back toward sent.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use herald_core::{
    HeraldError, NewNotification, NotificationStatus, NotificationType, RecipientRule, Result,
    ScheduledNotification,
};

use crate::db::{parse_opt_ts, parse_ts, to_ts, HeraldDb};

/// Grace window for "scheduled in the past" validation — tolerates clock
/// skew between the creating client and this host.
const PAST_GRACE_SECS: i64 = 60;

const NOTIFICATION_COLUMNS: &str = "id, event_id, notification_type, message_template, \
     scheduled_at, recipient_rule, status, error_message, sent_at, created_at, updated_at";

impl HeraldDb {
    /// Create a scheduled notification. Rejects definitions that can never
    /// dispatch: a scheduled time already in the past, or an explicit
    /// recipient list that is empty.
    pub fn create_notification(&self, def: &NewNotification) -> Result<i64> {
        if def.scheduled_at < Utc::now() - Duration::seconds(PAST_GRACE_SECS) {
            return Err(HeraldError::Validation(format!(
                "scheduled_at {} is in the past",
                def.scheduled_at.to_rfc3339()
            )));
        }
        if def.rule.is_trivially_empty() {
            return Err(HeraldError::Validation(
                "explicit recipient list is empty".into(),
            ));
        }
        if def.message_template.trim().is_empty() {
            return Err(HeraldError::Validation("message template is empty".into()));
        }

        let rule_json = serde_json::to_string(&def.rule)
            .map_err(|e| HeraldError::Store(format!("Serialize rule: {e}")))?;
        let now = to_ts(Utc::now());

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scheduled_notifications
             (event_id, notification_type, message_template, scheduled_at, recipient_rule,
              status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
            params![
                def.event_id,
                def.notification_type.as_str(),
                def.message_template,
                to_ts(def.scheduled_at),
                rule_json,
                now,
            ],
        )
        .map_err(|e| HeraldError::Store(format!("Create notification: {e}")))?;
        let id = conn.last_insert_rowid();
        tracing::info!("📅 Notification {} scheduled for {}", id, def.scheduled_at);
        Ok(id)
    }

    /// Fetch one notification.
    pub fn get_notification(&self, id: i64) -> Result<Option<ScheduledNotification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM scheduled_notifications WHERE id = ?1"
            ))
            .map_err(|e| HeraldError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], row_to_notification)
            .map_err(|e| HeraldError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(n)) => Ok(Some(n)),
            Some(Err(e)) => Err(HeraldError::Store(format!("Row: {e}"))),
            None => Ok(None),
        }
    }

    /// List notifications, newest first, with optional status filter and
    /// pagination (for the admin dashboard).
    pub fn list_notifications(
        &self,
        status: Option<NotificationStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ScheduledNotification>> {
        let conn = self.lock()?;
        let (sql, filter) = match status {
            Some(s) => (
                format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM scheduled_notifications
                     WHERE status = ?1 ORDER BY scheduled_at DESC LIMIT ?2 OFFSET ?3"
                ),
                Some(s.as_str()),
            ),
            None => (
                format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM scheduled_notifications
                     ORDER BY scheduled_at DESC LIMIT ?1 OFFSET ?2"
                ),
                None,
            ),
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| HeraldError::Store(format!("Prepare: {e}")))?;
        let rows = match filter {
            Some(s) => stmt.query_map(params![s, limit, offset], row_to_notification),
            None => stmt.query_map(params![limit, offset], row_to_notification),
        }
        .map_err(|e| HeraldError::Store(format!("Query: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All pending notifications due at `now`, earliest first — the
    /// earliest-due ordering is the sweep's fairness tie-break.
    pub fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledNotification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM scheduled_notifications
                 WHERE status = 'pending' AND scheduled_at <= ?1
                 ORDER BY scheduled_at ASC"
            ))
            .map_err(|e| HeraldError::Store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params![to_ts(now)], row_to_notification)
            .map_err(|e| HeraldError::Store(format!("Query: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Cancel a notification. Only valid while it is still pending —
    /// anything already (partially) dispatched is immutable history.
    pub fn cancel_notification(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_notifications
                 SET status = 'cancelled', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![to_ts(Utc::now()), id],
            )
            .map_err(|e| HeraldError::Store(format!("Cancel: {e}")))?;
        if changed == 0 {
            return Err(HeraldError::InvalidState(format!(
                "notification {id} is not pending"
            )));
        }
        tracing::info!("🚫 Notification {} cancelled", id);
        Ok(())
    }

    /// Delete a notification. Only valid while pending; sent/partial
    /// notifications are retained for audit. Ledger rows cascade.
    pub fn delete_notification(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM scheduled_notifications WHERE id = ?1 AND status = 'pending'",
                params![id],
            )
            .map_err(|e| HeraldError::Store(format!("Delete: {e}")))?;
        if changed == 0 {
            return Err(HeraldError::InvalidState(format!(
                "notification {id} is not pending"
            )));
        }
        Ok(())
    }

    /// Set a notification's lifecycle status. Called by the dispatch engine
    /// only; `sent_at` is stamped on the first transition to `sent`.
    pub fn set_notification_status(
        &self,
        id: i64,
        status: NotificationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = to_ts(Utc::now());
        let conn = self.lock()?;
        if status == NotificationStatus::Sent {
            conn.execute(
                "UPDATE scheduled_notifications
                 SET status = ?1, error_message = ?2, updated_at = ?3,
                     sent_at = COALESCE(sent_at, ?3)
                 WHERE id = ?4",
                params![status.as_str(), error_message, now, id],
            )
        } else {
            conn.execute(
                "UPDATE scheduled_notifications
                 SET status = ?1, error_message = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![status.as_str(), error_message, now, id],
            )
        }
        .map_err(|e| HeraldError::Store(format!("Set status: {e}")))?;
        Ok(())
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledNotification> {
    let type_str: String = row.get(2)?;
    let rule_json: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let rule: RecipientRule = serde_json::from_str(&rule_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ScheduledNotification {
        id: row.get(0)?,
        event_id: row.get(1)?,
        notification_type: NotificationType::parse_str(&type_str)
            .unwrap_or(NotificationType::CustomMessage),
        message_template: row.get(3)?,
        scheduled_at: parse_ts(&row.get::<_, String>(4)?),
        rule,
        status: NotificationStatus::parse_str(&status_str).unwrap_or(NotificationStatus::Pending),
        error_message: row.get(7)?,
        sent_at: parse_opt_ts(row.get(8)?),
        created_at: parse_ts(&row.get::<_, String>(9)?),
        updated_at: parse_ts(&row.get::<_, String>(10)?),
    })
}
