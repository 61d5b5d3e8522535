//! Telegram Bot API transport: long polling in, `sendMessage` out.

mod api;
mod poller;
mod relay;
mod types;

pub use api::DEFAULT_API_BASE_URL;
pub use api::TelegramApi;
pub use api::TelegramError;
pub use poller::Backoff;
pub use poller::InboundMessage;
pub use poller::poll_loop;
pub use relay::TelegramRelay;
