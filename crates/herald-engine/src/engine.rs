//! Dispatch engine — the sweep that turns due notifications into sends.
//!
//! Each due notification is processed independently under its own async
//! lock, so a slow or failing broadcast never blocks the others, and an
//! admin-triggered resend can never race the periodic sweep on the same
//! notification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as TokioMutex;

use futures::StreamExt;
use herald_core::{
    DeliveryChannel, DispatchConfig, HeraldError, NotificationStatus, RecipientStatus, Result,
    ScheduledNotification, SendOutcome,
};
use herald_store::HeraldDb;

use crate::resolver;

/// The dispatch engine — sweeps due notifications and sends to their
/// recipients through the injected channel.
pub struct DispatchEngine {
    db: Arc<HeraldDb>,
    channel: Arc<dyn DeliveryChannel>,
    send_timeout: Duration,
    max_concurrent_sends: usize,
    /// Per-notification locks shared by sweep and resend.
    locks: StdMutex<HashMap<i64, Arc<TokioMutex<()>>>>,
}

impl DispatchEngine {
    pub fn new(db: Arc<HeraldDb>, channel: Arc<dyn DeliveryChannel>, cfg: &DispatchConfig) -> Self {
        Self {
            db,
            channel,
            send_timeout: Duration::from_secs(cfg.send_timeout_secs),
            max_concurrent_sends: cfg.max_concurrent_sends.max(1),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// One sweep tick: dispatch every notification that is due now.
    /// Returns how many notifications were processed. A failure on one
    /// notification is logged and does not stop the rest.
    pub async fn sweep(&self) -> Result<usize> {
        let due = self.db.list_due(Utc::now())?;
        if due.is_empty() {
            return Ok(0);
        }
        tracing::info!("⏰ Sweep found {} due notification(s)", due.len());

        let mut processed = 0;
        for notification in due {
            let id = notification.id;
            match self.process_due(&notification).await {
                Ok(()) => processed += 1,
                Err(e) => tracing::warn!("⚠️ Dispatch of notification {} failed: {}", id, e),
            }
        }
        Ok(processed)
    }

    /// Dispatch one due notification: resolve, materialize, send, recompute.
    async fn process_due(&self, notification: &ScheduledNotification) -> Result<()> {
        let lock = self.notification_lock(notification.id);
        let guard = lock.lock().await;
        let result = self.dispatch_notification(notification).await;
        drop(guard);
        drop(lock);
        self.prune_notification_lock(notification.id);
        result
    }

    async fn dispatch_notification(&self, notification: &ScheduledNotification) -> Result<()> {
        // Re-check under the lock: it may have been cancelled (or already
        // dispatched by an overlapping tick) since list_due ran.
        let current = match self.db.get_notification(notification.id)? {
            Some(n) if n.status == NotificationStatus::Pending => n,
            _ => return Ok(()),
        };

        let recipients = resolver::resolve(&self.db, &current.rule)?;
        if recipients.is_empty() {
            self.db.set_notification_status(
                current.id,
                NotificationStatus::Failed,
                Some("no recipients"),
            )?;
            return Err(HeraldError::NoRecipients);
        }

        self.db.materialize(current.id, &recipients)?;
        self.dispatch_entries(&current, RecipientStatus::Pending)
            .await?;
        self.recompute_status(current.id)?;
        Ok(())
    }

    /// Re-attempt delivery for the failed entries of a failed or partial
    /// notification. This is the only retry path; the periodic sweep never
    /// touches failed entries.
    pub async fn resend(&self, notification_id: i64) -> Result<NotificationStatus> {
        let lock = self.notification_lock(notification_id);
        let guard = lock.lock().await;
        let result = self.resend_locked(notification_id).await;
        drop(guard);
        drop(lock);
        self.prune_notification_lock(notification_id);
        result
    }

    async fn resend_locked(&self, notification_id: i64) -> Result<NotificationStatus> {
        let notification = self
            .db
            .get_notification(notification_id)?
            .ok_or_else(|| {
                HeraldError::InvalidState(format!("notification {notification_id} not found"))
            })?;
        match notification.status {
            NotificationStatus::Failed | NotificationStatus::Partial => {}
            other => {
                return Err(HeraldError::InvalidState(format!(
                    "notification {} is {}, not failed/partial",
                    notification_id,
                    other.as_str()
                )));
            }
        }

        tracing::info!("🔁 Resending failed entries of notification {}", notification_id);
        self.dispatch_entries(&notification, RecipientStatus::Failed)
            .await?;
        self.recompute_status(notification_id)
    }

    /// Send the notification text to every ledger entry in `from_status`,
    /// with bounded concurrency and a per-send timeout. Each entry gets
    /// exactly one attempt; failures are isolated to their entry.
    async fn dispatch_entries(
        &self,
        notification: &ScheduledNotification,
        from_status: RecipientStatus,
    ) -> Result<()> {
        let entries = self
            .db
            .ledger_entries_with_status(notification.id, from_status)?;
        if entries.is_empty() {
            return Ok(());
        }

        let text = notification.message_template.clone();
        futures::stream::iter(entries)
            .for_each_concurrent(self.max_concurrent_sends, |entry| {
                let text = &text;
                async move {
                    let result = tokio::time::timeout(
                        self.send_timeout,
                        self.channel.send(&entry.external_handle, text),
                    )
                    .await;
                    let outcome = match result {
                        Ok(Ok(())) => SendOutcome::Sent,
                        Ok(Err(e)) => SendOutcome::Failed(e.to_string()),
                        Err(_) => SendOutcome::Failed("timeout".into()),
                    };
                    if let SendOutcome::Failed(reason) = &outcome {
                        tracing::warn!(
                            "⚠️ Send to {} failed: {}",
                            entry.external_handle,
                            reason
                        );
                    }
                    if let Err(e) = self.db.record_outcome(entry.id, &outcome) {
                        tracing::warn!("⚠️ Record outcome for entry {}: {}", entry.id, e);
                    }
                }
            })
            .await;
        Ok(())
    }

    /// Derive the notification status from its ledger: everything on the
    /// sent track means sent, everything failed means failed, a mix is
    /// partial.
    fn recompute_status(&self, notification_id: i64) -> Result<NotificationStatus> {
        let entries = self.db.ledger_entries(notification_id)?;
        let total = entries.len();
        let failed = entries
            .iter()
            .filter(|e| e.status == RecipientStatus::Failed)
            .count();
        let sent_track = entries.iter().filter(|e| e.status.is_sent_track()).count();

        // An entry that is neither sent-track nor failed (still pending
        // because its outcome could not be recorded) keeps the
        // notification partial rather than mislabeling it failed.
        let status = if failed == total {
            NotificationStatus::Failed
        } else if sent_track == total {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Partial
        };
        let reason = match status {
            NotificationStatus::Failed => Some("all recipient sends failed"),
            _ => None,
        };
        self.db
            .set_notification_status(notification_id, status, reason)?;
        tracing::info!(
            "✅ Notification {}: {} ({}/{} sent, {} failed)",
            notification_id,
            status.as_str(),
            sent_track,
            total,
            failed
        );
        Ok(status)
    }

    fn notification_lock(&self, id: i64) -> Arc<TokioMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Drop a notification's lock from the registry once no task holds it,
    /// so the registry does not grow with every notification ever swept.
    fn prune_notification_lock(&self, id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(&id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&id);
            }
        }
    }
}

/// Spawn the sweep loop as a background tokio task. A failed tick is
/// logged and the next tick retries.
pub fn spawn_dispatcher(
    engine: Arc<DispatchEngine>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("⏰ Dispatch loop started (sweep every {}s)", interval_secs);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            match engine.sweep().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("📣 Sweep dispatched {} notification(s)", n),
                Err(e) => tracing::warn!("⚠️ Sweep tick failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use herald_core::{
        DeliveryEvent, NewNotification, NotificationType, Participant, Recipient, RecipientRule,
    };
    use rand::seq::SliceRandom;

    /// Stub channel: sends succeed unless the handle is in the fail set.
    struct StubChannel {
        fail: StdMutex<HashSet<String>>,
        delay: Option<Duration>,
        sent: StdMutex<Vec<String>>,
    }

    impl StubChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: StdMutex::new(HashSet::new()),
                delay: None,
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn failing(handles: &[&str]) -> Arc<Self> {
            let stub = Self::new();
            *stub.fail.lock().unwrap() = handles.iter().map(|h| h.to_string()).collect();
            stub
        }

        fn fix(&self) {
            self.fail.lock().unwrap().clear();
        }

        fn sent_handles(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryChannel for StubChannel {
        fn name(&self) -> &str {
            "stub"
        }

        async fn send(&self, handle: &str, _text: &str) -> Result<()> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail.lock().unwrap().contains(handle) {
                return Err(HeraldError::Channel(format!("{handle} unreachable")));
            }
            self.sent.lock().unwrap().push(handle.to_string());
            Ok(())
        }
    }

    fn setup(channel: Arc<dyn DeliveryChannel>) -> (Arc<HeraldDb>, DispatchEngine) {
        let db = Arc::new(HeraldDb::open_in_memory().unwrap());
        for i in 1..=3 {
            db.upsert_participant(&Participant {
                id: i,
                organization_id: Some(10),
                display_name: format!("P{i}"),
                external_handle: Some(format!("chat-{i}")),
            })
            .unwrap();
        }
        let engine = DispatchEngine::new(db.clone(), channel, &DispatchConfig::default());
        (db, engine)
    }

    fn due_now(db: &HeraldDb, rule: RecipientRule) -> i64 {
        db.create_notification(&NewNotification {
            event_id: Some(1),
            notification_type: NotificationType::EventReminder,
            message_template: "Training at 18:00".into(),
            scheduled_at: Utc::now() - ChronoDuration::seconds(1),
            rule,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_all_succeed() {
        let stub = StubChannel::new();
        let (db, engine) = setup(stub.clone());
        let id = due_now(&db, RecipientRule::All);

        assert_eq!(engine.sweep().await.unwrap(), 1);
        let n = db.get_notification(id).unwrap().unwrap();
        assert_eq!(n.status, NotificationStatus::Sent);
        assert!(n.sent_at.is_some());
        assert_eq!(stub.sent_handles().len(), 3);
    }

    #[tokio::test]
    async fn test_partial_then_resend_heals() {
        let stub = StubChannel::failing(&["chat-3"]);
        let (db, engine) = setup(stub.clone());
        let id = due_now(&db, RecipientRule::All);

        engine.sweep().await.unwrap();
        let n = db.get_notification(id).unwrap().unwrap();
        assert_eq!(n.status, NotificationStatus::Partial);
        let stats = db.summarize(id).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 1);

        stub.fix();
        let status = engine.resend(id).await.unwrap();
        assert_eq!(status, NotificationStatus::Sent);
        let stats = db.summarize(id).unwrap();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_resweep_creates_no_extra_rows() {
        let stub = StubChannel::failing(&["chat-1", "chat-2", "chat-3"]);
        let (db, engine) = setup(stub.clone());
        let id = due_now(&db, RecipientRule::All);

        engine.sweep().await.unwrap();
        assert_eq!(
            db.get_notification(id).unwrap().unwrap().status,
            NotificationStatus::Failed
        );
        assert_eq!(db.ledger_entries(id).unwrap().len(), 3);

        // Failed notifications are not due again; even a direct re-dispatch
        // cannot duplicate the ledger.
        assert_eq!(engine.sweep().await.unwrap(), 0);
        assert_eq!(db.ledger_entries(id).unwrap().len(), 3);
        // The sweep never retries failed entries
        assert!(stub.sent_handles().is_empty());
    }

    #[tokio::test]
    async fn test_resend_touches_only_failed_entries() {
        let stub = StubChannel::failing(&["chat-2"]);
        let (db, engine) = setup(stub.clone());
        let id = due_now(&db, RecipientRule::All);
        engine.sweep().await.unwrap();

        // One recipient has advanced past sent in the meantime
        let delivered_id = db
            .ledger_entries(id)
            .unwrap()
            .iter()
            .find(|e| e.external_handle == "chat-1")
            .unwrap()
            .id;
        db.record_delivery_event(delivered_id, &DeliveryEvent::Delivered)
            .unwrap();

        stub.fix();
        engine.resend(id).await.unwrap();

        let entries = db.ledger_entries(id).unwrap();
        let delivered = entries.iter().find(|e| e.id == delivered_id).unwrap();
        assert_eq!(delivered.status, RecipientStatus::Delivered);
        // Only the previously failed handle was re-sent; the others were
        // sent exactly once, in the first sweep
        let sends = stub.sent_handles();
        assert_eq!(sends.iter().filter(|h| *h == "chat-2").count(), 1);
        assert_eq!(sends.iter().filter(|h| *h == "chat-1").count(), 1);
        assert_eq!(sends.iter().filter(|h| *h == "chat-3").count(), 1);
    }

    #[tokio::test]
    async fn test_resend_requires_failed_or_partial() {
        let stub = StubChannel::new();
        let (db, engine) = setup(stub);
        let id = due_now(&db, RecipientRule::All);

        // Still pending
        assert!(matches!(
            engine.resend(id).await.unwrap_err(),
            HeraldError::InvalidState(_)
        ));
        engine.sweep().await.unwrap();
        // Fully sent
        assert!(matches!(
            engine.resend(id).await.unwrap_err(),
            HeraldError::InvalidState(_)
        ));
        assert!(matches!(
            engine.resend(9999).await.unwrap_err(),
            HeraldError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_resolution_marks_failed() {
        let stub = StubChannel::new();
        let (db, engine) = setup(stub);
        let id = due_now(&db, RecipientRule::Organization { id: 77 });

        // The empty notification is marked failed but not counted as dispatched
        assert_eq!(engine.sweep().await.unwrap(), 0);
        let n = db.get_notification(id).unwrap().unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.error_message.as_deref(), Some("no recipients"));
        assert!(db.ledger_entries(id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_never_materializes() {
        let stub = StubChannel::new();
        let (db, engine) = setup(stub.clone());
        let id = due_now(&db, RecipientRule::All);
        db.cancel_notification(id).unwrap();

        assert_eq!(engine.sweep().await.unwrap(), 0);
        assert!(db.ledger_entries(id).unwrap().is_empty());
        assert!(stub.sent_handles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_times_out_as_failed() {
        let db = Arc::new(HeraldDb::open_in_memory().unwrap());
        db.upsert_participant(&Participant {
            id: 1,
            organization_id: None,
            display_name: "P1".into(),
            external_handle: Some("chat-1".into()),
        })
        .unwrap();
        let stub = Arc::new(StubChannel {
            fail: StdMutex::new(HashSet::new()),
            delay: Some(Duration::from_secs(30)),
            sent: StdMutex::new(Vec::new()),
        });
        let cfg = DispatchConfig {
            send_timeout_secs: 1,
            ..Default::default()
        };
        let engine = DispatchEngine::new(db.clone(), stub, &cfg);
        let id = due_now(&db, RecipientRule::All);

        engine.sweep().await.unwrap();
        let entries = db.ledger_entries(id).unwrap();
        assert_eq!(entries[0].status, RecipientStatus::Failed);
        assert_eq!(entries[0].error_message.as_deref(), Some("timeout"));
        assert_eq!(
            db.get_notification(id).unwrap().unwrap().status,
            NotificationStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_randomized_event_orderings_respect_state_machine() {
        let stub = StubChannel::failing(&["chat-2"]);
        let (db, engine) = setup(stub);
        let id = due_now(&db, RecipientRule::All);
        engine.sweep().await.unwrap();

        let entries = db.ledger_entries(id).unwrap();
        let failed_id = entries
            .iter()
            .find(|e| e.status == RecipientStatus::Failed)
            .unwrap()
            .id;
        let sent_id = entries
            .iter()
            .find(|e| e.status == RecipientStatus::Sent)
            .unwrap()
            .id;

        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut events = vec![
                DeliveryEvent::Delivered,
                DeliveryEvent::Read,
                DeliveryEvent::Responded { text: "ok".into() },
            ];
            events.shuffle(&mut rng);

            for ev in &events {
                // Events on a failed entry are always rejected
                assert!(!db.record_delivery_event(failed_id, ev).unwrap());
                db.record_delivery_event(sent_id, ev).unwrap();
            }

            let failed = db.get_ledger_entry(failed_id).unwrap().unwrap();
            assert_eq!(failed.status, RecipientStatus::Failed);
            assert!(failed.read_at.is_none());

            // Whatever the arrival order, the sent entry only moves forward
            let sent = db.get_ledger_entry(sent_id).unwrap().unwrap();
            assert_eq!(sent.status, RecipientStatus::Responded);
            assert!(sent.delivered_at.is_some());
            assert!(sent.read_at.is_some());
            assert!(sent.responded_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_lock_registry_pruned_after_dispatch() {
        let stub = StubChannel::failing(&["chat-2"]);
        let (db, engine) = setup(stub.clone());
        let id = due_now(&db, RecipientRule::All);

        engine.sweep().await.unwrap();
        assert!(engine.locks.lock().unwrap().is_empty());

        stub.fix();
        engine.resend(id).await.unwrap();
        assert!(engine.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_leaves_partial() {
        let stub = StubChannel::new();
        let (db, engine) = setup(stub);
        let id = due_now(&db, RecipientRule::All);
        db.materialize(
            id,
            &[
                Recipient { participant_id: Some(1), external_handle: "chat-1".into() },
                Recipient { participant_id: Some(2), external_handle: "chat-2".into() },
            ],
        )
        .unwrap();
        let entries = db.ledger_entries(id).unwrap();
        db.record_outcome(entries[0].id, &SendOutcome::Failed("blocked".into()))
            .unwrap();
        // entries[1] stays pending, as if its outcome write had failed

        let status = engine.recompute_status(id).unwrap();
        assert_eq!(status, NotificationStatus::Partial);
        assert_eq!(
            db.get_notification(id).unwrap().unwrap().status,
            NotificationStatus::Partial
        );
    }

    #[tokio::test]
    async fn test_one_bad_notification_does_not_block_others() {
        let stub = StubChannel::new();
        let (db, engine) = setup(stub);
        let empty = due_now(&db, RecipientRule::Organization { id: 77 });
        let good = due_now(&db, RecipientRule::All);

        engine.sweep().await.unwrap();
        assert_eq!(
            db.get_notification(empty).unwrap().unwrap().status,
            NotificationStatus::Failed
        );
        assert_eq!(
            db.get_notification(good).unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }
}
