//! Layered configuration: built-in defaults, an optional `telecode.toml`,
//! environment variables, then command-line overrides.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::assistant::AssistantCli;
use crate::assistant::DEFAULT_ASSISTANT_PROGRAM;
use crate::assistant::MODELS_TIMEOUT;
use crate::controller::ApprovalTokens;
use crate::controller::ControllerSettings;
use crate::controller::DEFAULT_AFFIRMATIVE_TOKENS;
use crate::controller::DEFAULT_MODEL;
use crate::controller::DEFAULT_NEGATIVE_TOKENS;
use crate::controller::SafetyMode;
use crate::danger::DEFAULT_DANGER_PATTERNS;
use crate::danger::DangerClassifier;
use crate::engine::ACTION_REQUIRED_NOTICE;
use crate::engine::DEFAULT_POLL_INTERVAL;
use crate::engine::DEFAULT_PROMPT_MARKER;
use crate::engine::DEFAULT_READ_TIMEOUT;
use crate::engine::DEFAULT_SHELL;
use crate::engine::EngineSettings;
use crate::engine::FINISHED_NOTICE;
use crate::framer::AnswerExtractor;
use crate::framer::BannerAnswerExtractor;
use crate::framer::DEFAULT_ANSWER_SEPARATOR;
use crate::framer::DEFAULT_MAX_MESSAGE_LEN;
use crate::framer::Framer;
use crate::sessions::default_sessions_dir;

pub const CONFIG_TOML_FILE: &str = "telecode.toml";
pub const DEFAULT_TELEGRAM_API_BASE_URL: &str = "https://api.telegram.org";
pub const DEFAULT_TELEGRAM_POLL_TIMEOUT_SECS: u64 = 30;

pub const ENV_CONFIG: &str = "TELECODE_CONFIG";
pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
pub const ENV_OPERATOR_ID: &str = "YOUR_USER_ID";
pub const ENV_WORKING_DIR: &str = "TELECODE_WORKING_DIR";
pub const ENV_MODEL: &str = "TELECODE_MODEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{ENV_TELEGRAM_TOKEN} is not set")]
    MissingToken,
    #[error("{ENV_OPERATOR_ID} is not set")]
    MissingOperatorId,
    #[error("operator id `{0}` is not a non-zero integer chat id")]
    InvalidOperatorId(String),
    #[error("max_message_len must be greater than zero")]
    InvalidMaxMessageLen,
    #[error("working directory {} does not exist", .0.display())]
    WorkingDirMissing(PathBuf),
    #[error("cannot determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
    #[error("cannot locate the home directory for session storage; set `sessions_dir`")]
    NoSessionsDir,
}

/// Shape of `telecode.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    pub telegram_token: Option<String>,
    pub operator_id: Option<i64>,
    pub working_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub safety_mode: Option<SafetyMode>,
    pub assistant_program: Option<String>,
    pub shell: Option<String>,
    pub sessions_dir: Option<PathBuf>,
    pub max_message_len: Option<usize>,
    pub prompt_marker: Option<String>,
    pub answer_separator: Option<String>,
    pub danger_patterns: Option<Vec<String>>,
    pub affirmative_tokens: Option<Vec<String>>,
    pub negative_tokens: Option<Vec<String>>,
    pub read_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub models_timeout_secs: Option<u64>,
    pub mirror_stdout: Option<bool>,
    #[serde(default)]
    pub telegram: TelegramToml,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramToml {
    pub api_base_url: Option<String>,
    pub poll_timeout_secs: Option<u64>,
}

/// Values supplied on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub safety_mode: Option<SafetyMode>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    /// Operator chat id; the only sender whose messages are acted upon.
    pub operator_id: i64,
    pub working_dir: PathBuf,
    pub model: String,
    pub safety_mode: SafetyMode,
    pub assistant_program: String,
    pub shell: String,
    pub sessions_dir: PathBuf,
    pub max_message_len: usize,
    pub prompt_marker: String,
    pub answer_separator: String,
    pub danger_patterns: Vec<String>,
    pub affirmative_tokens: Vec<String>,
    pub negative_tokens: Vec<String>,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub models_timeout: Duration,
    pub mirror_stdout: bool,
    pub telegram_api_base_url: String,
    pub telegram_poll_timeout: Duration,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::load_with_env(overrides, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(overrides: ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cfg = match config_file_path(&overrides, &env) {
            Some(path) => load_config_toml(&path)?,
            None => ConfigToml::default(),
        };
        Self::load_from_base_config_with_overrides(cfg, overrides, env)
    }

    pub fn load_from_base_config_with_overrides<F>(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let telegram_token = env(ENV_TELEGRAM_TOKEN)
            .or(cfg.telegram_token)
            .ok_or(ConfigError::MissingToken)?;

        let operator_id = match env(ENV_OPERATOR_ID) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidOperatorId(raw.clone()))?,
            None => cfg.operator_id.ok_or(ConfigError::MissingOperatorId)?,
        };
        if operator_id == 0 {
            return Err(ConfigError::InvalidOperatorId(operator_id.to_string()));
        }

        let working_dir = match overrides
            .working_dir
            .or_else(|| env(ENV_WORKING_DIR).map(PathBuf::from))
            .or(cfg.working_dir)
        {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(ConfigError::CurrentDir)?,
        };
        if !working_dir.is_dir() {
            return Err(ConfigError::WorkingDirMissing(working_dir));
        }

        let max_message_len = cfg.max_message_len.unwrap_or(DEFAULT_MAX_MESSAGE_LEN);
        if max_message_len == 0 {
            return Err(ConfigError::InvalidMaxMessageLen);
        }

        let sessions_dir = match cfg.sessions_dir {
            Some(dir) => dir,
            None => default_sessions_dir().ok_or(ConfigError::NoSessionsDir)?,
        };

        Ok(Self {
            telegram_token,
            operator_id,
            working_dir,
            model: overrides
                .model
                .or_else(|| env(ENV_MODEL))
                .or(cfg.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            safety_mode: overrides
                .safety_mode
                .or(cfg.safety_mode)
                .unwrap_or_default(),
            assistant_program: cfg
                .assistant_program
                .unwrap_or_else(|| DEFAULT_ASSISTANT_PROGRAM.to_string()),
            shell: cfg.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string()),
            sessions_dir,
            max_message_len,
            prompt_marker: cfg
                .prompt_marker
                .unwrap_or_else(|| DEFAULT_PROMPT_MARKER.to_string()),
            answer_separator: cfg
                .answer_separator
                .unwrap_or_else(|| DEFAULT_ANSWER_SEPARATOR.to_string()),
            danger_patterns: cfg
                .danger_patterns
                .unwrap_or_else(|| to_owned_vec(DEFAULT_DANGER_PATTERNS)),
            affirmative_tokens: cfg
                .affirmative_tokens
                .unwrap_or_else(|| to_owned_vec(DEFAULT_AFFIRMATIVE_TOKENS)),
            negative_tokens: cfg
                .negative_tokens
                .unwrap_or_else(|| to_owned_vec(DEFAULT_NEGATIVE_TOKENS)),
            read_timeout: cfg
                .read_timeout_ms
                .map_or(DEFAULT_READ_TIMEOUT, Duration::from_millis),
            poll_interval: cfg
                .poll_interval_ms
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
            models_timeout: cfg
                .models_timeout_secs
                .map_or(MODELS_TIMEOUT, Duration::from_secs),
            mirror_stdout: cfg.mirror_stdout.unwrap_or(true),
            telegram_api_base_url: cfg
                .telegram
                .api_base_url
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE_URL.to_string()),
            telegram_poll_timeout: Duration::from_secs(
                cfg.telegram
                    .poll_timeout_secs
                    .unwrap_or(DEFAULT_TELEGRAM_POLL_TIMEOUT_SECS),
            ),
        })
    }

    /// Sender identity as the transport reports it.
    pub fn operator_identity(&self) -> String {
        self.operator_id.to_string()
    }

    pub fn framer(&self) -> Framer {
        Framer::new(self.max_message_len)
    }

    pub fn extractor(&self) -> Arc<dyn AnswerExtractor> {
        Arc::new(BannerAnswerExtractor::new(self.answer_separator.clone()))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            shell: self.shell.clone(),
            prompt_marker: self.prompt_marker.clone(),
            action_required_notice: ACTION_REQUIRED_NOTICE.to_string(),
            finished_notice: FINISHED_NOTICE.to_string(),
            read_timeout: self.read_timeout,
            poll_interval: self.poll_interval,
            mirror_stdout: self.mirror_stdout,
            framer: self.framer(),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            operator_id: self.operator_identity(),
            working_dir: self.working_dir.clone(),
            model: self.model.clone(),
            safety_mode: self.safety_mode,
            classifier: DangerClassifier::new(&self.danger_patterns),
            approval: ApprovalTokens::new(&self.affirmative_tokens, &self.negative_tokens),
            assistant: AssistantCli::new(self.assistant_program.clone())
                .with_models_timeout(self.models_timeout),
            framer: self.framer(),
        }
    }
}

/// `--config`, then `$TELECODE_CONFIG`, then `./telecode.toml` if present.
fn config_file_path<F>(overrides: &ConfigOverrides, env: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = &overrides.config_path {
        return Some(path.clone());
    }
    if let Some(path) = env(ENV_CONFIG).filter(|value| !value.trim().is_empty()) {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(CONFIG_TOML_FILE);
    local.is_file().then_some(local)
}

pub fn load_config_toml(path: &Path) -> Result<ConfigToml, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn to_owned_vec(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}
