//! Bridge between a chat transport and an interactive assistant CLI running
//! under a pseudo-terminal.

pub mod assistant;
pub mod config;
pub mod controller;
pub mod danger;
pub mod engine;
pub mod framer;
pub mod relay;
pub mod sessions;

pub use assistant::AssistantCli;
pub use config::Config;
pub use config::ConfigError;
pub use config::ConfigOverrides;
pub use controller::Controller;
pub use controller::ControllerSettings;
pub use controller::ControllerState;
pub use controller::SafetyMode;
pub use danger::DangerClassifier;
pub use engine::EngineError;
pub use engine::EngineSettings;
pub use engine::ProcessEngine;
pub use engine::ProcessRunner;
pub use engine::RunInfo;
pub use engine::RunPhase;
pub use engine::RunRequest;
pub use framer::AnswerExtractor;
pub use framer::BannerAnswerExtractor;
pub use framer::Framer;
pub use relay::Relay;
pub use relay::RelayError;
pub use sessions::SessionRegistry;
pub use sessions::SessionSummary;
pub use sessions::StorageSessionRegistry;
