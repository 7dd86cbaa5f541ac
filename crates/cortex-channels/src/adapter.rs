use async_trait::async_trait;

use cortex_core::types::{Envelope, OutputTarget};

use crate::error::Result;
use crate::resolver::SenderResolver;

/// Common interface implemented by every transport (webchat, WhatsApp,
/// Telegram, cron, …).
///
/// Implementations must be `Send + Sync` so they can live in an
/// [`AdapterRegistry`](crate::registry::AdapterRegistry) and be driven from
/// the processing loop.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"whatsapp"`).
    fn channel_id(&self) -> &str;

    /// Produce a well-formed envelope from the transport's raw message shape.
    ///
    /// Implementations must resolve the sender through `resolver`, choose the
    /// priority from the resulting relationship (see
    /// [`Priority::for_sender`](cortex_core::types::Priority::for_sender)),
    /// and fill the reply context exactly — message id, thread id, account
    /// id — so the output router can address the originating conversation.
    fn to_envelope(
        &self,
        raw: &serde_json::Value,
        resolver: &dyn SenderResolver,
    ) -> Result<Envelope>;

    /// Deliver one output target to the transport.
    ///
    /// Inbound-only channels (cron) may no-op.
    async fn send(&self, target: &OutputTarget) -> Result<()>;

    /// Whether the transport is currently able to deliver.
    fn is_available(&self) -> bool {
        true
    }
}
