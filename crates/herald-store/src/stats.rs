//! Read-side aggregation over the recipient ledger.

use rusqlite::params;

use herald_core::{HeraldError, NotificationStats, Result};

use crate::db::HeraldDb;

impl HeraldDb {
    /// Delivery counters for one notification, computed from the ledger at
    /// read time (nothing is denormalized).
    ///
    /// Sent-track counters are cumulative: a `read` entry counts as sent,
    /// delivered and read, so `delivered` answers "how many reached at
    /// least the delivered stage".
    pub fn summarize(&self, notification_id: i64) -> Result<NotificationStats> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT
                COUNT(*),
                SUM(CASE WHEN status IN ('sent','delivered','read','responded')
                    THEN 1 ELSE 0 END),
                SUM(CASE WHEN status IN ('delivered','read','responded')
                    THEN 1 ELSE 0 END),
                SUM(CASE WHEN status IN ('read','responded') THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'responded' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END)
             FROM notification_recipients WHERE notification_id = ?1",
            params![notification_id],
            |row| {
                // SUM over zero rows is NULL
                let get = |i: usize| -> rusqlite::Result<u64> {
                    Ok(row.get::<_, Option<i64>>(i)?.unwrap_or(0) as u64)
                };
                Ok(NotificationStats::from_counts(
                    row.get::<_, i64>(0)? as u64,
                    get(1)?,
                    get(2)?,
                    get(3)?,
                    get(4)?,
                    get(5)?,
                ))
            },
        )
        .map_err(|e| HeraldError::Store(format!("Stats: {e}")))
    }
}
