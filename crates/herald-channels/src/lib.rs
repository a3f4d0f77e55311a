//! # Herald Channels
//!
//! Concrete `DeliveryChannel` implementations. The engine only sees the
//! trait; which channel a deployment uses is a config decision.

pub mod telegram;
pub mod webhook;

pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;
