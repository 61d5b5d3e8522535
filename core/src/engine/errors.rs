use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a process is already running")]
    AlreadyRunning,
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no process is running")]
    NotRunning,
    #[error("failed to write to the running process: {source}")]
    WriteInput {
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn spawn(command: &str, source: anyhow::Error) -> Self {
        Self::Spawn {
            command: command.to_string(),
            source,
        }
    }

    pub(crate) fn write_input(source: std::io::Error) -> Self {
        Self::WriteInput { source }
    }
}
