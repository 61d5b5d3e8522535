//! Bot API calls over reqwest: `sendMessage` and long-polling `getUpdates`.

use std::time::Duration;

use reqwest::Client;
use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::types::ApiResponse;
use crate::types::Update;

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Slack on top of the long-poll timeout before the HTTP request is abandoned.
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TelegramError {
    /// Another process is polling with the same bot token.
    #[error("conflict: another instance is polling with this bot token")]
    Conflict,
    #[error("telegram api error: {0}")]
    Api(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct TelegramApi {
    client: Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(bot_token: &str) -> Self {
        Self::with_base_url(bot_token, DEFAULT_API_BASE_URL)
    }

    pub fn with_base_url(bot_token: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{bot_token}", base_url.trim_end_matches('/')),
        }
    }

    /// Sends plain text; no parse mode, so nothing needs escaping.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        debug!(chat_id, chars = text.chars().count(), "sendMessage");
        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await?;

        let api_resp: ApiResponse<serde_json::Value> = resp.json().await?;
        if !api_resp.ok {
            return Err(TelegramError::Api(api_resp.description.unwrap_or_default()));
        }
        Ok(())
    }

    /// Long-polls for updates after `offset`. A 409 becomes
    /// [`TelegramError::Conflict`].
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut body = json!({
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }

        let resp = self
            .client
            .post(format!("{}/getUpdates", self.base_url))
            .timeout(timeout + REQUEST_GRACE)
            .json(&body)
            .send()
            .await?;
        if resp.status() == StatusCode::CONFLICT {
            return Err(TelegramError::Conflict);
        }

        let api_resp: ApiResponse<Vec<Update>> = resp.json().await?;
        if !api_resp.ok {
            if api_resp.error_code == Some(i64::from(StatusCode::CONFLICT.as_u16())) {
                return Err(TelegramError::Conflict);
            }
            return Err(TelegramError::Api(api_resp.description.unwrap_or_default()));
        }
        Ok(api_resp.result.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::body_partial_json;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    #[tokio::test]
    async fn send_message_posts_plain_text_to_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({"chat_id": 42, "text": "hello"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": {"message_id": 1}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = TelegramApi::with_base_url("TOKEN", &server.uri());
        api.send_message(42, "hello").await.expect("send");
    }

    #[tokio::test]
    async fn send_message_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"ok": false, "error_code": 400, "description": "Bad Request: message is too long"}),
            ))
            .mount(&server)
            .await;

        let api = TelegramApi::with_base_url("TOKEN", &server.uri());
        let err = api.send_message(42, "x").await.expect_err("api error");
        match err {
            TelegramError::Api(desc) => assert_eq!(desc, "Bad Request: message is too long"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn get_updates_sends_offset_and_parses_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .and(body_partial_json(json!({"offset": 7, "timeout": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": [
                    {"update_id": 7, "message": {"message_id": 3, "chat": {"id": 42}, "text": "ls"}}
                ]
            })))
            .mount(&server)
            .await;

        let api = TelegramApi::with_base_url("TOKEN", &server.uri());
        let updates = api
            .get_updates(Some(7), Duration::from_secs(1))
            .await
            .expect("updates");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 7);
    }

    #[tokio::test]
    async fn http_409_is_a_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getUpdates"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "ok": false,
                "error_code": 409,
                "description": "Conflict: terminated by other getUpdates request"
            })))
            .mount(&server)
            .await;

        let api = TelegramApi::with_base_url("TOKEN", &server.uri());
        let err = api
            .get_updates(None, Duration::from_secs(1))
            .await
            .expect_err("conflict");
        assert!(matches!(err, TelegramError::Conflict), "{err}");
    }
}
