#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Test doubles for the seams of `telecode-core`.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use telecode_core::EngineError;
use telecode_core::ProcessRunner;
use telecode_core::Relay;
use telecode_core::RelayError;
use telecode_core::RunInfo;
use telecode_core::RunPhase;
use telecode_core::RunRequest;
use telecode_core::SessionRegistry;
use telecode_core::SessionSummary;
use tokio::sync::Notify;

/// Relay that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<String>>,
    fail: Mutex<bool>,
    notify: Notify,
}

impl RecordingRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every subsequent send is recorded and then reported as failed.
    pub fn fail_sends(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Waits until some message satisfies `predicate`, returning a snapshot
    /// of everything sent so far.
    pub async fn wait_for<P>(&self, timeout: Duration, predicate: P) -> Vec<String>
    where
        P: Fn(&str) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            let messages = self.messages();
            if messages.iter().any(|message| predicate(message)) {
                return messages;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!("timed out waiting for message; sent so far: {messages:?}");
            }
        }
    }
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn send(&self, text: &str) -> Result<(), RelayError> {
        self.sent.lock().unwrap().push(text.to_string());
        self.notify.notify_waiters();
        if *self.fail.lock().unwrap() {
            return Err(RelayError::Unavailable("recording relay set to fail".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRegistry {
    sessions: Mutex<Vec<SessionSummary>>,
}

impl InMemoryRegistry {
    /// `(id, title)` pairs, newest first.
    pub fn with_sessions(sessions: &[(&str, &str)]) -> Arc<Self> {
        let sessions = sessions
            .iter()
            .map(|(id, title)| SessionSummary {
                id: (*id).to_string(),
                title: (*title).to_string(),
                full_title: (*title).to_string(),
                created_at: None,
            })
            .collect();
        Arc::new(Self {
            sessions: Mutex::new(sessions),
        })
    }
}

impl SessionRegistry for InMemoryRegistry {
    fn list(&self) -> Vec<SessionSummary> {
        self.sessions.lock().unwrap().clone()
    }
}

/// Process runner that never spawns anything. A started run stays alive
/// until `finish` or `terminate` is called.
#[derive(Default)]
pub struct RecordingRunner {
    started: Mutex<Vec<RunRequest>>,
    inputs: Mutex<Vec<String>>,
    alive: Mutex<bool>,
    terminations: Mutex<usize>,
    fail_start: Mutex<bool>,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> Vec<RunRequest> {
        self.started.lock().unwrap().clone()
    }

    pub fn started_commands(&self) -> Vec<String> {
        self.started()
            .into_iter()
            .map(|request| request.command)
            .collect()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn terminations(&self) -> usize {
        *self.terminations.lock().unwrap()
    }

    pub fn finish(&self) {
        *self.alive.lock().unwrap() = false;
    }

    pub fn fail_next_start(&self) {
        *self.fail_start.lock().unwrap() = true;
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn start(&self, request: RunRequest) -> Result<RunInfo, EngineError> {
        if std::mem::take(&mut *self.fail_start.lock().unwrap()) {
            return Err(EngineError::spawn(
                &request.command,
                std::io::Error::other("spawn refused by test").into(),
            ));
        }
        let mut alive = self.alive.lock().unwrap();
        if *alive {
            return Err(EngineError::AlreadyRunning);
        }
        *alive = true;
        let mut started = self.started.lock().unwrap();
        started.push(request.clone());
        Ok(RunInfo {
            id: started.len() as u64,
            command: request.command,
        })
    }

    async fn feed_input(&self, text: &str) -> Result<(), EngineError> {
        if !*self.alive.lock().unwrap() {
            return Err(EngineError::NotRunning);
        }
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn terminate(&self) -> bool {
        let mut alive = self.alive.lock().unwrap();
        if !*alive {
            return false;
        }
        *alive = false;
        *self.terminations.lock().unwrap() += 1;
        true
    }

    async fn is_alive(&self) -> bool {
        *self.alive.lock().unwrap()
    }

    async fn phase(&self) -> RunPhase {
        if *self.alive.lock().unwrap() {
            RunPhase::Streaming
        } else if self.started.lock().unwrap().is_empty() {
            RunPhase::Idle
        } else {
            RunPhase::Finished
        }
    }
}
