//! Knows how to talk to the assistant CLI: building `run` invocations and
//! calling its `models` subcommand.

use std::time::Duration;

use shlex::try_join;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_ASSISTANT_PROGRAM: &str = "opencode";
pub const MODELS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("message contains characters that cannot be passed to the shell")]
    Unquotable,
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program} models` did not finish within {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct AssistantCli {
    program: String,
    models_timeout: Duration,
}

impl AssistantCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            models_timeout: MODELS_TIMEOUT,
        }
    }

    pub fn with_models_timeout(mut self, models_timeout: Duration) -> Self {
        self.models_timeout = models_timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Operator text that already starts with the program name is run as-is.
    pub fn is_invocation(&self, text: &str) -> bool {
        text.trim_start()
            .to_lowercase()
            .starts_with(&self.program.to_lowercase())
    }

    /// `<program> run (--session <id> | --continue) --model <model> '<text>'`
    pub fn run_command(
        &self,
        session_id: Option<&str>,
        model: &str,
        instruction: &str,
    ) -> Result<String, AssistantError> {
        let mut tokens = vec![self.program.as_str(), "run"];
        match session_id {
            Some(id) => tokens.extend(["--session", id]),
            None => tokens.push("--continue"),
        }
        if !model.is_empty() {
            tokens.extend(["--model", model]);
        }
        tokens.push(instruction);
        try_join(tokens).map_err(|_| AssistantError::Unquotable)
    }

    /// Raw stdout of `<program> models`, trimmed.
    pub async fn list_models(&self) -> Result<String, AssistantError> {
        let child = Command::new(&self.program)
            .arg("models")
            .kill_on_drop(true)
            .output();
        let output = timeout(self.models_timeout, child)
            .await
            .map_err(|_| AssistantError::Timeout {
                program: self.program.clone(),
                timeout: self.models_timeout,
            })?
            .map_err(|source| AssistantError::Launch {
                program: self.program.clone(),
                source,
            })?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for AssistantCli {
    fn default() -> Self {
        Self::new(DEFAULT_ASSISTANT_PROGRAM)
    }
}
