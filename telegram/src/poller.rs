//! Long-polling loop that turns `getUpdates` results into inbound messages.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::api::TelegramApi;
use crate::api::TelegramError;
use crate::types::Update;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A text message as the controller sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Chat id rendered in decimal.
    pub sender: String,
    /// Trimmed message text.
    pub text: String,
}

/// Doubling retry delay, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// Polls until the receiving side goes away (`Ok`) or the bot token is
/// claimed by another poller (`Err(Conflict)`). Every other failure is
/// retried with backoff.
pub async fn poll_loop(
    api: Arc<TelegramApi>,
    poll_timeout: Duration,
    inbound_tx: mpsc::Sender<InboundMessage>,
) -> Result<(), TelegramError> {
    let mut offset: Option<i64> = None;
    let mut backoff = Backoff::default();
    info!(timeout_secs = poll_timeout.as_secs(), "telegram poller started");

    loop {
        let updates = match api.get_updates(offset, poll_timeout).await {
            Ok(updates) => {
                backoff.reset();
                updates
            }
            Err(TelegramError::Conflict) => return Err(TelegramError::Conflict),
            Err(err) => {
                let delay = backoff.next_delay();
                warn!(error = %err, backoff_secs = delay.as_secs(), "getUpdates failed, backing off");
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);
            let Some(message) = inbound_message(update) else {
                continue;
            };
            debug!(sender = %message.sender, "inbound message");
            if inbound_tx.send(message).await.is_err() {
                info!("inbound channel closed, stopping poller");
                return Ok(());
            }
        }
    }
}

fn inbound_message(update: Update) -> Option<InboundMessage> {
    let message = update.message?;
    let text = message.text?;
    Some(InboundMessage {
        sender: message.chat.id.to_string(),
        text: text.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::body_partial_json;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn forwards_text_and_acknowledges_until_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .and(body_partial_json(json!({"offset": 11})))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "ok": false,
                "error_code": 409,
                "description": "Conflict"
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {"update_id": 9, "message": {"message_id": 1, "chat": {"id": 42}, "text": "  list files \n"}},
                    {"update_id": 10, "message": {"message_id": 2, "chat": {"id": 7}}}
                ]
            })))
            .mount(&server)
            .await;

        let api = Arc::new(TelegramApi::with_base_url("TOKEN", &server.uri()));
        let (tx, mut rx) = mpsc::channel(8);
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            poll_loop(api, Duration::from_secs(1), tx),
        )
        .await
        .expect("poller must stop on conflict");

        assert!(matches!(result, Err(TelegramError::Conflict)));
        assert_eq!(
            rx.recv().await,
            Some(InboundMessage {
                sender: "42".to_string(),
                text: "list files".to_string(),
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn stops_cleanly_when_receiver_is_gone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {"update_id": 1, "message": {"message_id": 1, "chat": {"id": 42}, "text": "hi"}}
                ]
            })))
            .mount(&server)
            .await;

        let api = Arc::new(TelegramApi::with_base_url("TOKEN", &server.uri()));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = poll_loop(api, Duration::from_secs(1), tx).await;
        assert!(result.is_ok());
    }
}
