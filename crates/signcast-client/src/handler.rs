use async_trait::async_trait;

use signcast_core::protocol::Envelope;

use crate::session::ClientHandle;

/// Role-specific reaction to server envelopes.
///
/// Called in receipt order from a task separate from the channel, so a slow
/// handler (content lookup) never stalls heartbeats. Replies go through
/// `client.send`.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, env: Envelope, client: &ClientHandle);
}

/// Logs and discards everything.
#[derive(Debug, Default)]
pub struct LogOnly;

#[async_trait]
impl EnvelopeHandler for LogOnly {
    async fn handle(&self, env: Envelope, _client: &ClientHandle) {
        tracing::debug!(kind = env.kind(), "envelope received");
    }
}
