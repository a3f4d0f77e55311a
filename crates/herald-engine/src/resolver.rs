//! Recipient resolver — turns a targeting rule into concrete recipients.
//!
//! Resolution happens exactly once per notification, at the first sweep
//! that processes it; the resulting ledger is frozen, so later directory
//! changes never alter who a notification was addressed to.

use std::collections::HashSet;

use herald_core::{Participant, Recipient, RecipientRule, Result};
use herald_store::HeraldDb;

/// Resolve a targeting rule against the participant directory.
///
/// Participants without a usable external handle are silently dropped —
/// there is nowhere to deliver to. The result is de-duplicated by
/// participant identity and by handle, order preserved.
pub fn resolve(db: &HeraldDb, rule: &RecipientRule) -> Result<Vec<Recipient>> {
    let participants = match rule {
        RecipientRule::All => db.participants_with_handle()?,
        RecipientRule::Organization { id } => db.participants_in_org(*id)?,
        RecipientRule::ExplicitList { ids } => db.participants_by_ids(ids)?,
    };

    let mut seen_ids = HashSet::new();
    let mut seen_handles = HashSet::new();
    let mut out = Vec::with_capacity(participants.len());
    for p in participants {
        let handle = match usable_handle(&p) {
            Some(h) => h,
            None => {
                tracing::debug!("Participant {} has no handle, skipping", p.id);
                continue;
            }
        };
        if !seen_ids.insert(p.id) || !seen_handles.insert(handle.clone()) {
            continue;
        }
        out.push(Recipient {
            participant_id: Some(p.id),
            external_handle: handle,
        });
    }
    Ok(out)
}

fn usable_handle(p: &Participant) -> Option<String> {
    p.external_handle
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(db: &HeraldDb, id: i64, org: Option<i64>, handle: Option<&str>) {
        db.upsert_participant(&Participant {
            id,
            organization_id: org,
            display_name: format!("P{id}"),
            external_handle: handle.map(String::from),
        })
        .unwrap();
    }

    #[test]
    fn test_all_drops_handleless() {
        let db = HeraldDb::open_in_memory().unwrap();
        seed(&db, 1, None, Some("chat-1"));
        seed(&db, 2, None, None);
        seed(&db, 3, None, Some("  "));

        let out = resolve(&db, &RecipientRule::All).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].participant_id, Some(1));
    }

    #[test]
    fn test_org_rule() {
        let db = HeraldDb::open_in_memory().unwrap();
        seed(&db, 1, Some(10), Some("a"));
        seed(&db, 2, Some(10), None);
        seed(&db, 3, Some(20), Some("c"));

        let out = resolve(&db, &RecipientRule::Organization { id: 10 }).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].external_handle, "a");
    }

    #[test]
    fn test_explicit_list_order_and_dedup() {
        let db = HeraldDb::open_in_memory().unwrap();
        seed(&db, 1, None, Some("a"));
        seed(&db, 2, None, Some("b"));
        seed(&db, 3, None, Some("a")); // shares a handle with 1

        let out = resolve(
            &db,
            &RecipientRule::ExplicitList { ids: vec![2, 1, 2, 3, 99] },
        )
        .unwrap();
        let handles: Vec<&str> = out.iter().map(|r| r.external_handle.as_str()).collect();
        assert_eq!(handles, vec!["b", "a"]);
    }

    #[test]
    fn test_org_with_no_members_is_empty() {
        let db = HeraldDb::open_in_memory().unwrap();
        seed(&db, 1, Some(10), Some("a"));
        assert!(resolve(&db, &RecipientRule::Organization { id: 77 })
            .unwrap()
            .is_empty());
    }
}
