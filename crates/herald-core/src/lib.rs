//! # Herald Core
//!
//! Shared foundation for the Herald notification service: the error type,
//! configuration, the notification/recipient data model, and the
//! `DeliveryChannel` trait that messaging platforms plug into.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    ChannelConfig, DispatchConfig, GatewayConfig, HeraldConfig, StorageConfig,
    TelegramChannelConfig, WebhookChannelConfig,
};
pub use error::{HeraldError, Result};
pub use traits::DeliveryChannel;
pub use types::{
    DeliveryEvent, NewNotification, NotificationStats, NotificationStatus, NotificationType,
    Participant, Recipient, RecipientEntry, RecipientRule, RecipientStatus, ScheduledNotification,
    SendOutcome,
};
