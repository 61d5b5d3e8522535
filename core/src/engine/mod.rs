//! Pseudo-terminal process engine.
//!
//! One run at a time: `start` spawns the command under a PTY and hands the
//! output channel to a streaming task. The task relays prompt-flushes as they
//! happen and, once the stream ends, relays the extracted answer followed by
//! the finished notice.

mod errors;
mod pty;
mod utf8;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::framer::AnswerExtractor;
use crate::framer::Framer;
use crate::framer::strip;
use crate::relay::Relay;
use crate::relay::send_best_effort;

pub use errors::EngineError;
use pty::PtyProcess;
use pty::spawn_pty;
use utf8::Utf8Decoder;

pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_PROMPT_MARKER: &str = "(y/n)";
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const ACTION_REQUIRED_NOTICE: &str = "⚠️ Action Required: (y/n)";
pub const FINISHED_NOTICE: &str = "🏁 Process Finished.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunPhase {
    Idle = 0,
    Spawning = 1,
    Streaming = 2,
    Draining = 3,
    Finished = 4,
    Killed = 5,
}

impl RunPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Spawning,
            2 => Self::Streaming,
            3 => Self::Draining,
            4 => Self::Finished,
            5 => Self::Killed,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub shell: String,
    /// Case-insensitive; an empty marker disables prompt detection.
    pub prompt_marker: String,
    pub action_required_notice: String,
    pub finished_notice: String,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    /// Copy raw PTY output to our own stdout.
    pub mirror_stdout: bool,
    pub framer: Framer,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            prompt_marker: DEFAULT_PROMPT_MARKER.to_string(),
            action_required_notice: ACTION_REQUIRED_NOTICE.to_string(),
            finished_notice: FINISHED_NOTICE.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            mirror_stdout: true,
            framer: Framer::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub command: String,
    pub working_dir: PathBuf,
    /// Model the command runs with; used to locate the answer banner.
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub id: u64,
    pub command: String,
}

/// What the controller needs from a process engine.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn start(&self, request: RunRequest) -> Result<RunInfo, EngineError>;

    /// Writes `text` plus a newline to the running process.
    async fn feed_input(&self, text: &str) -> Result<(), EngineError>;

    /// Kills the live process, if any. Returns whether something was killed.
    async fn terminate(&self) -> bool;

    async fn is_alive(&self) -> bool;

    async fn phase(&self) -> RunPhase;
}

struct ActiveRun {
    id: u64,
    command: String,
    model: String,
    process: PtyProcess,
    cancelled: AtomicBool,
    phase: AtomicU8,
}

impl ActiveRun {
    fn is_alive(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && !self.process.has_exited()
    }

    fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Moves `from` to `to` atomically. `terminate` and the end of the
    /// stream race for a streaming run; exactly one of them wins.
    fn transition(&self, from: RunPhase, to: RunPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

struct EngineInner {
    settings: EngineSettings,
    relay: Arc<dyn Relay>,
    extractor: Arc<dyn AnswerExtractor>,
    next_run_id: AtomicU64,
    current: Mutex<Option<Arc<ActiveRun>>>,
    /// Phase of the most recent run once it has left the slot.
    last_phase: AtomicU8,
}

impl EngineInner {
    fn mirror(&self, text: &str) {
        trace!(chunk = text, "pty output");
        if !self.settings.mirror_stdout {
            return;
        }
        if let Err(err) = mirror_to(&mut std::io::stdout().lock(), text) {
            debug!(error = %err, "failed to mirror pty output");
        }
    }

    async fn relay(&self, text: &str) {
        send_best_effort(self.relay.as_ref(), text).await;
    }

    async fn release(&self, run: &ActiveRun, phase: RunPhase) {
        run.phase.store(phase as u8, Ordering::SeqCst);
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|active| active.id == run.id) {
            *current = None;
            self.last_phase.store(phase as u8, Ordering::SeqCst);
        }
    }
}

#[derive(Clone)]
pub struct ProcessEngine {
    inner: Arc<EngineInner>,
}

impl ProcessEngine {
    pub fn new(
        settings: EngineSettings,
        relay: Arc<dyn Relay>,
        extractor: Arc<dyn AnswerExtractor>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                settings,
                relay,
                extractor,
                next_run_id: AtomicU64::new(1),
                current: Mutex::new(None),
                last_phase: AtomicU8::new(RunPhase::Idle as u8),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }
}

#[async_trait]
impl ProcessRunner for ProcessEngine {
    async fn start(&self, request: RunRequest) -> Result<RunInfo, EngineError> {
        let mut current = self.inner.current.lock().await;
        if current.as_ref().is_some_and(|run| run.is_alive()) {
            return Err(EngineError::AlreadyRunning);
        }

        let id = self.inner.next_run_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .last_phase
            .store(RunPhase::Spawning as u8, Ordering::SeqCst);
        info!(run_id = id, command = %request.command, cwd = %request.working_dir.display(), "launching pty");

        let (process, output_rx) = spawn_pty(
            &self.inner.settings.shell,
            &request.command,
            &request.working_dir,
        )
        .map_err(|source| {
            self.inner
                .last_phase
                .store(RunPhase::Idle as u8, Ordering::SeqCst);
            EngineError::spawn(&request.command, source)
        })?;

        let run = Arc::new(ActiveRun {
            id,
            command: request.command.clone(),
            model: request.model,
            process,
            cancelled: AtomicBool::new(false),
            phase: AtomicU8::new(RunPhase::Streaming as u8),
        });
        *current = Some(Arc::clone(&run));
        drop(current);

        tokio::spawn(stream_run(Arc::clone(&self.inner), run, output_rx));

        Ok(RunInfo {
            id,
            command: request.command,
        })
    }

    async fn feed_input(&self, text: &str) -> Result<(), EngineError> {
        let run = self.inner.current.lock().await.clone();
        let Some(run) = run.filter(|run| run.is_alive() && run.phase() == RunPhase::Streaming)
        else {
            return Err(EngineError::NotRunning);
        };

        let writer = run.process.writer();
        let line = format!("{text}\n");
        debug!(run_id = run.id, "feeding input to pty");
        tokio::task::spawn_blocking(move || {
            let mut guard = writer
                .lock()
                .map_err(|_| std::io::Error::other("pty writer lock poisoned"))?;
            guard.write_all(line.as_bytes())?;
            guard.flush()
        })
        .await
        .map_err(|err| EngineError::write_input(std::io::Error::other(err)))?
        .map_err(EngineError::write_input)
    }

    async fn terminate(&self) -> bool {
        let mut current = self.inner.current.lock().await;
        let Some(run) = current.as_ref().filter(|run| run.is_alive()).cloned() else {
            return false;
        };
        // A run whose stream already ended keeps its slot so the answer goes
        // out.
        if !run.transition(RunPhase::Streaming, RunPhase::Killed) {
            return false;
        }
        run.cancelled.store(true, Ordering::SeqCst);
        *current = None;
        drop(current);

        if let Err(err) = run.process.kill() {
            warn!(run_id = run.id, error = %err, "failed to kill pty child");
        }
        self.inner
            .last_phase
            .store(RunPhase::Killed as u8, Ordering::SeqCst);
        info!(run_id = run.id, command = %run.command, "run killed");
        true
    }

    async fn is_alive(&self) -> bool {
        self.inner
            .current
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| run.is_alive())
    }

    async fn phase(&self) -> RunPhase {
        match self.inner.current.lock().await.as_ref() {
            Some(run) => run.phase(),
            None => RunPhase::from_u8(self.inner.last_phase.load(Ordering::SeqCst)),
        }
    }
}

enum StreamEnd {
    EndOfStream,
    Killed,
}

async fn stream_run(
    inner: Arc<EngineInner>,
    run: Arc<ActiveRun>,
    mut output_rx: mpsc::Receiver<Vec<u8>>,
) {
    let settings = &inner.settings;
    let marker = settings.prompt_marker.to_lowercase();
    let mut decoder = Utf8Decoder::default();
    let mut since_flush = String::new();
    let mut full_output = String::new();

    let end = loop {
        if run.cancelled.load(Ordering::SeqCst) {
            break StreamEnd::Killed;
        }
        match timeout(settings.read_timeout, output_rx.recv()).await {
            Ok(Some(bytes)) => {
                let text = decoder.push(&bytes);
                if text.is_empty() {
                    continue;
                }
                inner.mirror(&text);
                let scan_from = floor_char_boundary(
                    &since_flush,
                    since_flush.len().saturating_sub(marker.len()),
                );
                since_flush.push_str(&text);
                full_output.push_str(&text);

                if run.cancelled.load(Ordering::SeqCst) {
                    break StreamEnd::Killed;
                }
                if !marker.is_empty() && since_flush[scan_from..].to_lowercase().contains(&marker)
                {
                    debug!(run_id = run.id, "confirmation prompt detected");
                    if let Some(flushed) = settings.framer.prompt_flush(&since_flush) {
                        inner.relay(&flushed).await;
                    }
                    inner.relay(&settings.action_required_notice).await;
                    since_flush.clear();
                }
            }
            // Killing the child also closes the stream.
            Ok(None) if run.transition(RunPhase::Streaming, RunPhase::Draining) => {
                break StreamEnd::EndOfStream;
            }
            Ok(None) => break StreamEnd::Killed,
            Err(_) => sleep(settings.poll_interval).await,
        }
    };

    match end {
        StreamEnd::Killed => {
            debug!(run_id = run.id, "stream abandoned after kill");
        }
        StreamEnd::EndOfStream => {
            full_output.push_str(&decoder.finish());
            let answer = inner
                .extractor
                .extract(&strip(&full_output), &run.model);
            for piece in settings.framer.answer(&answer) {
                inner.relay(&piece).await;
            }
            inner.relay(&settings.finished_notice).await;
            inner.release(&run, RunPhase::Finished).await;
            info!(run_id = run.id, output_bytes = full_output.len(), "run finished");
        }
    }
}

fn mirror_to<W: Write>(writer: &mut W, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes())?;
    writer.flush()
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
