use std::sync::Arc;

use async_trait::async_trait;
use telecode_core::Relay;
use telecode_core::RelayError;

use crate::api::TelegramApi;
use crate::api::TelegramError;

/// Delivers controller and engine output to the operator chat.
pub struct TelegramRelay {
    api: Arc<TelegramApi>,
    chat_id: i64,
}

impl TelegramRelay {
    pub fn new(api: Arc<TelegramApi>, chat_id: i64) -> Self {
        Self { api, chat_id }
    }
}

#[async_trait]
impl Relay for TelegramRelay {
    async fn send(&self, text: &str) -> Result<(), RelayError> {
        self.api
            .send_message(self.chat_id, text)
            .await
            .map_err(|err| match err {
                TelegramError::Api(desc) => RelayError::Rejected(desc),
                other => RelayError::Unavailable(other.to_string()),
            })
    }
}
