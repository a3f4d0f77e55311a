//! Notification data model — the core types for scheduled broadcasts and
//! per-recipient delivery tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of broadcast a notification is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    EventReminder,
    AttendanceConfirmation,
    EventUpdate,
    EventCancellation,
    CustomMessage,
}

impl NotificationType {
    /// String form used in SQLite columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::EventReminder => "event_reminder",
            NotificationType::AttendanceConfirmation => "attendance_confirmation",
            NotificationType::EventUpdate => "event_update",
            NotificationType::EventCancellation => "event_cancellation",
            NotificationType::CustomMessage => "custom_message",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "event_reminder" => Some(NotificationType::EventReminder),
            "attendance_confirmation" => Some(NotificationType::AttendanceConfirmation),
            "event_update" => Some(NotificationType::EventUpdate),
            "event_cancellation" => Some(NotificationType::EventCancellation),
            "custom_message" => Some(NotificationType::CustomMessage),
            _ => None,
        }
    }
}

/// Who a notification targets. Resolved to concrete recipients exactly once,
/// at the first sweep that processes the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientRule {
    /// Every participant with a usable external handle.
    All,
    /// Participants of one organization.
    Organization { id: i64 },
    /// An explicit participant id list.
    ExplicitList { ids: Vec<i64> },
}

impl RecipientRule {
    /// A rule that can never target anyone is rejected at create time.
    pub fn is_trivially_empty(&self) -> bool {
        matches!(self, RecipientRule::ExplicitList { ids } if ids.is_empty())
    }
}

/// Notification lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Partial,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Partial => "partial",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "sent" => Some(NotificationStatus::Sent),
            "partial" => Some(NotificationStatus::Partial),
            "failed" => Some(NotificationStatus::Failed),
            "cancelled" => Some(NotificationStatus::Cancelled),
            _ => None,
        }
    }
}

/// Per-recipient delivery status. `Failed` sits outside the sent track;
/// everything else is ordered by `rank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Responded,
    Failed,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Delivered => "delivered",
            RecipientStatus::Read => "read",
            RecipientStatus::Responded => "responded",
            RecipientStatus::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecipientStatus::Pending),
            "sent" => Some(RecipientStatus::Sent),
            "delivered" => Some(RecipientStatus::Delivered),
            "read" => Some(RecipientStatus::Read),
            "responded" => Some(RecipientStatus::Responded),
            "failed" => Some(RecipientStatus::Failed),
            _ => None,
        }
    }

    /// Position on the sent track: pending=0, sent=1, delivered=2, read=3,
    /// responded=4. `Failed` has no rank.
    pub fn rank(&self) -> Option<u8> {
        match self {
            RecipientStatus::Pending => Some(0),
            RecipientStatus::Sent => Some(1),
            RecipientStatus::Delivered => Some(2),
            RecipientStatus::Read => Some(3),
            RecipientStatus::Responded => Some(4),
            RecipientStatus::Failed => None,
        }
    }

    /// True once the message left us successfully (sent or further).
    pub fn is_sent_track(&self) -> bool {
        self.rank().map(|r| r >= 1).unwrap_or(false)
    }
}

/// Outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed(String),
}

/// Asynchronous delivery callback from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Delivered,
    Read,
    Responded { text: String },
}

/// A planned broadcast, as persisted in the scheduling store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: i64,
    /// Owning event, if any — a notification may be free-standing.
    pub event_id: Option<i64>,
    pub notification_type: NotificationType,
    pub message_template: String,
    pub scheduled_at: DateTime<Utc>,
    pub rule: RecipientRule,
    pub status: NotificationStatus,
    /// Notification-level failure reason (e.g. "no recipients").
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a scheduled notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub event_id: Option<i64>,
    pub notification_type: NotificationType,
    pub message_template: String,
    pub scheduled_at: DateTime<Utc>,
    pub rule: RecipientRule,
}

/// A registered participant known to the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub organization_id: Option<i64>,
    pub display_name: String,
    /// Chat id on the messaging platform; participants without one
    /// cannot receive notifications.
    pub external_handle: Option<String>,
}

/// A concrete recipient identity, as resolved from a targeting rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub participant_id: Option<i64>,
    pub external_handle: String,
}

/// One (notification, recipient) ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientEntry {
    pub id: i64,
    pub notification_id: i64,
    pub participant_id: Option<i64>,
    pub external_handle: String,
    pub status: RecipientStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response_text: Option<String>,
    pub error_message: Option<String>,
}

/// Aggregate delivery counters for one notification. Derived on read from
/// the recipient ledger — never stored, so it cannot drift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: u64,
    pub sent: u64,
    pub delivered: u64,
    pub read: u64,
    pub responded: u64,
    pub failed: u64,
    pub sent_pct: f64,
    pub delivered_pct: f64,
    pub read_pct: f64,
    pub responded_pct: f64,
    pub failed_pct: f64,
}

impl NotificationStats {
    /// Build stats from raw counters, deriving percentages (0 when total=0).
    pub fn from_counts(
        total: u64,
        sent: u64,
        delivered: u64,
        read: u64,
        responded: u64,
        failed: u64,
    ) -> Self {
        let pct = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64 * 100.0
            }
        };
        Self {
            total,
            sent,
            delivered,
            read,
            responded,
            failed,
            sent_pct: pct(sent),
            delivered_pct: pct(delivered),
            read_pct: pct(read),
            responded_pct: pct(responded),
            failed_pct: pct(failed),
        }
    }
}
