use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "opencode/kimi-k2.5-free";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    /// Dangerous invocations wait for an explicit yes/no.
    #[default]
    Ask,
    Auto,
}

impl SafetyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyMode::Ask => "ask",
            SafetyMode::Auto => "auto",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            SafetyMode::Ask => "ask before dangerous operations",
            SafetyMode::Auto => "allow all operations automatically",
        }
    }
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown safety mode `{0}` (expected `ask` or `auto`)")]
pub struct ParseSafetyModeError(String);

impl FromStr for SafetyMode {
    type Err = ParseSafetyModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(SafetyMode::Ask),
            "auto" => Ok(SafetyMode::Auto),
            other => Err(ParseSafetyModeError(other.to_string())),
        }
    }
}

/// A dangerous invocation waiting for yes/no, with the model it was built
/// for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command: String,
    pub model: String,
}

/// Everything the operator can change at runtime. Lives for the process
/// lifetime and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerState {
    /// Session to continue; `None` continues the most recent one.
    pub active_session_id: Option<String>,
    /// Marker handed out by `/new`. Display only: the assistant assigns the
    /// real id when the next run creates the session.
    pub session_marker: Option<String>,
    pub model: String,
    pub safety_mode: SafetyMode,
    pub pending_command: Option<PendingCommand>,
}

impl ControllerState {
    pub fn new(model: impl Into<String>, safety_mode: SafetyMode) -> Self {
        Self {
            active_session_id: None,
            session_marker: None,
            model: model.into(),
            safety_mode,
            pending_command: None,
        }
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL, SafetyMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn safety_mode_parses_case_insensitively() {
        assert_eq!("AUTO".parse::<SafetyMode>(), Ok(SafetyMode::Auto));
        assert_eq!(" ask ".parse::<SafetyMode>(), Ok(SafetyMode::Ask));
        assert!("sometimes".parse::<SafetyMode>().is_err());
    }

    #[test]
    fn defaults_ask_with_default_model() {
        let state = ControllerState::default();
        assert_eq!(state.model, DEFAULT_MODEL);
        assert_eq!(state.safety_mode, SafetyMode::Ask);
        assert_eq!(state.pending_command, None);
        assert_eq!(state.active_session_id, None);
    }
}
