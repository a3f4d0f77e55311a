//! Participant directory — who can be targeted by a notification.
//!
//! Rows are written by external collaborators (registration flows, admin
//! imports) and read by the recipient resolver. Upsert keys on the
//! externally assigned participant id.

use chrono::Utc;
use rusqlite::params;

use herald_core::{HeraldError, Participant, Result};

use crate::db::{to_ts, HeraldDb};

impl HeraldDb {
    /// Insert or update a participant by id.
    pub fn upsert_participant(&self, p: &Participant) -> Result<()> {
        let now = to_ts(Utc::now());
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO participants
             (id, organization_id, display_name, external_handle, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                organization_id = excluded.organization_id,
                display_name = excluded.display_name,
                external_handle = excluded.external_handle,
                updated_at = excluded.updated_at",
            params![p.id, p.organization_id, p.display_name, p.external_handle, now],
        )
        .map_err(|e| HeraldError::Store(format!("Upsert participant: {e}")))?;
        Ok(())
    }

    pub fn get_participant(&self, id: i64) -> Result<Option<Participant>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, organization_id, display_name, external_handle
                 FROM participants WHERE id = ?1",
            )
            .map_err(|e| HeraldError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], row_to_participant)
            .map_err(|e| HeraldError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(p)) => Ok(Some(p)),
            Some(Err(e)) => Err(HeraldError::Store(format!("Row: {e}"))),
            None => Ok(None),
        }
    }

    /// Every participant that has an external handle, in id order.
    pub fn participants_with_handle(&self) -> Result<Vec<Participant>> {
        self.query_participants(
            "SELECT id, organization_id, display_name, external_handle
             FROM participants
             WHERE external_handle IS NOT NULL AND external_handle != ''
             ORDER BY id",
            params![],
        )
    }

    /// Participants of one organization, in id order. Handle-less rows are
    /// included; the resolver drops them.
    pub fn participants_in_org(&self, organization_id: i64) -> Result<Vec<Participant>> {
        self.query_participants(
            "SELECT id, organization_id, display_name, external_handle
             FROM participants WHERE organization_id = ?1 ORDER BY id",
            params![organization_id],
        )
    }

    /// Participants matching an explicit id list, in the order given.
    /// Unknown ids are silently skipped.
    pub fn participants_by_ids(&self, ids: &[i64]) -> Result<Vec<Participant>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = self.get_participant(*id)? {
                out.push(p);
            }
        }
        Ok(out)
    }

    fn query_participants(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Participant>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| HeraldError::Store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params, row_to_participant)
            .map_err(|e| HeraldError::Store(format!("Query: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        display_name: row.get(2)?,
        external_handle: row.get(3)?,
    })
}
