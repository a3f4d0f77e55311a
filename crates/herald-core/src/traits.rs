//! The delivery-channel seam. The dispatch engine never talks to a
//! messaging platform directly — it is handed a `DeliveryChannel`
//! capability, which keeps the engine deterministic under test.

use async_trait::async_trait;

use crate::error::Result;

/// A messaging platform capable of delivering one message to one recipient.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Channel name for logging ("telegram", "webhook", ...).
    fn name(&self) -> &str;

    /// Send `text` to the recipient identified by `handle` (e.g. a chat id).
    /// A returned error is that recipient's failure reason — it must never
    /// affect sibling recipients.
    async fn send(&self, handle: &str, text: &str) -> Result<()>;
}
