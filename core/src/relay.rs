use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("transport rejected message: {0}")]
    Rejected(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Outbound message delivery to the operator.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), RelayError>;
}

/// Delivery is best-effort: failures are logged and never surface to the
/// caller or get retried.
pub async fn send_best_effort(relay: &dyn Relay, text: &str) {
    if let Err(err) = relay.send(text).await {
        warn!(error = %err, "relay send failed");
    }
}
