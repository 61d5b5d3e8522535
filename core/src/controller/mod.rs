//! The per-message state machine that sits between the operator and the
//! process engine.
//!
//! Classification order, first match wins: meta-command, pending approval,
//! stop, live input to a running process, new command.

mod command;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use tracing::info;

use crate::assistant::AssistantCli;
use crate::danger::DangerClassifier;
use crate::engine::EngineError;
use crate::engine::ProcessRunner;
use crate::engine::RunRequest;
use crate::framer::Framer;
use crate::relay::Relay;
use crate::relay::send_best_effort;
use crate::sessions::SessionRegistry;

pub use command::Approval;
pub use command::ApprovalTokens;
pub use command::DEFAULT_AFFIRMATIVE_TOKENS;
pub use command::DEFAULT_NEGATIVE_TOKENS;
pub use command::MetaCommand;
pub use command::STOP_TOKENS;
pub use command::is_stop;
pub use command::parse_meta;
pub use state::ControllerState;
pub use state::DEFAULT_MODEL;
pub use state::ParseSafetyModeError;
pub use state::PendingCommand;
pub use state::SafetyMode;

const MAX_LISTED_SESSIONS: usize = 10;
const APPROVAL_PREVIEW_CHARS: usize = 200;
const AVAILABLE_COMMANDS: &str = "/s, /models, /m <name>, /safety, /info, /new, /stop";

/// Static inputs of a [`Controller`]; the mutable part is [`ControllerState`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Exact sender identity whose messages are acted upon.
    pub operator_id: String,
    pub working_dir: PathBuf,
    pub model: String,
    pub safety_mode: SafetyMode,
    pub classifier: DangerClassifier,
    pub approval: ApprovalTokens,
    pub assistant: AssistantCli,
    pub framer: Framer,
}

pub struct Controller {
    settings: ControllerSettings,
    state: ControllerState,
    relay: Arc<dyn Relay>,
    registry: Arc<dyn SessionRegistry>,
    runner: Arc<dyn ProcessRunner>,
}

impl Controller {
    pub fn new(
        settings: ControllerSettings,
        relay: Arc<dyn Relay>,
        registry: Arc<dyn SessionRegistry>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let state = ControllerState::new(settings.model.clone(), settings.safety_mode);
        Self {
            settings,
            state,
            relay,
            registry,
            runner,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Kills any live run. Used on shutdown.
    pub async fn shutdown(&self) -> bool {
        self.runner.terminate().await
    }

    pub async fn handle(&mut self, text: &str, sender: &str) {
        if sender != self.settings.operator_id {
            debug!(sender, "ignoring message from unknown sender");
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        info!(text, "operator message");

        if let Some(command) = parse_meta(text, &self.settings.approval) {
            self.handle_meta(command).await;
            return;
        }

        if let Some(pending) = self.state.pending_command.clone() {
            self.handle_pending(text, pending).await;
            return;
        }

        if is_stop(text) {
            self.handle_stop().await;
            return;
        }

        if self.runner.is_alive().await {
            self.handle_live_input(text).await;
            return;
        }

        self.handle_new_command(text).await;
    }

    async fn reply(&self, text: &str) {
        if let Some(message) = self.settings.framer.reply(text) {
            send_best_effort(self.relay.as_ref(), &message).await;
        }
    }

    async fn handle_meta(&mut self, command: MetaCommand) {
        match command {
            MetaCommand::NewSession => {
                let marker = format!("ses_{}", Utc::now().timestamp());
                self.state.active_session_id = None;
                self.state.session_marker = Some(marker.clone());
                info!(marker = %marker, "new session requested");
                self.reply(&format!("🆕 New session started\nID: {marker}"))
                    .await;
            }
            MetaCommand::SetModel(name) if name.is_empty() => {
                self.reply("❌ Usage: /model <name> (or /m <name>)").await;
            }
            MetaCommand::SetModel(name) => {
                info!(model = %name, "model changed");
                self.reply(&format!("🤖 Model updated\nNow using: {name}"))
                    .await;
                self.state.model = name;
            }
            MetaCommand::ListModels => self.list_models().await,
            MetaCommand::ListSessions => self.list_sessions().await,
            MetaCommand::SwitchSession(arg) => self.switch_session(&arg).await,
            MetaCommand::ShowSafety => {
                let mode = self.state.safety_mode;
                self.reply(&format!(
                    "🛡️ Safety mode\nCurrent: {mode}\n({})\n\nChoose mode:\n🔒 /safety_ask - Ask for confirmation\n🚀 /safety_auto - Allow everything",
                    mode.description()
                ))
                .await;
            }
            MetaCommand::SetSafety(mode) => {
                self.state.safety_mode = mode;
                info!(%mode, "safety mode changed");
                self.reply(&format!(
                    "🛡️ Safety mode changed to: {mode}\n\nWill {}",
                    mode.description()
                ))
                .await;
            }
            MetaCommand::SafetyUsage => {
                self.reply("❌ Usage: /safety, /safety_ask or /safety_auto")
                    .await;
            }
            MetaCommand::Status => self.status().await,
            MetaCommand::Unknown(text) => {
                self.reply(&format!(
                    "❓ Unknown command: {text}\nAvailable: {AVAILABLE_COMMANDS}"
                ))
                .await;
            }
        }
    }

    async fn list_models(&self) {
        match self.settings.assistant.list_models().await {
            Ok(models) if models.is_empty() => {
                self.reply("❌ Could not fetch models list.").await;
            }
            Ok(models) => self.reply(&models).await,
            Err(err) => {
                self.reply(&format!("❌ Error fetching models: {err}"))
                    .await;
            }
        }
    }

    /// Title of the selected session, its id when the registry no longer
    /// knows it, or `None` when continuing the most recent session.
    fn current_session_label(&self, max_id_chars: Option<usize>) -> Option<String> {
        let id = self.state.active_session_id.as_deref()?;
        Some(match self.registry.find(id) {
            Some(session) => session.title,
            None => match max_id_chars {
                Some(max) if id.chars().count() > max => {
                    format!("{}...", id.chars().take(max).collect::<String>())
                }
                _ => id.to_string(),
            },
        })
    }

    async fn list_sessions(&self) {
        let sessions = self.registry.list();
        if sessions.is_empty() {
            self.reply("📭 No sessions found. Send any message to create one.")
                .await;
            return;
        }
        let listing = sessions
            .iter()
            .take(MAX_LISTED_SESSIONS)
            .enumerate()
            .map(|(idx, session)| format!("{}. {}", idx + 1, session.title))
            .collect::<Vec<_>>()
            .join("\n");
        let current = self
            .current_session_label(Some(30))
            .unwrap_or_else(|| "Continuing last session".to_string());
        self.reply(&format!(
            "📋 Available sessions:\n{listing}\n\nCurrent: {current}\n\nUse /s <number> to switch (e.g. /s 1)"
        ))
        .await;
    }

    async fn switch_session(&mut self, arg: &str) {
        let Ok(index) = arg.parse::<i64>() else {
            self.reply("❌ Usage: /s <number> (e.g. /s 1)").await;
            return;
        };
        let sessions = self.registry.list();
        let selected = usize::try_from(index)
            .ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|idx| sessions.get(idx));
        match selected {
            Some(session) => {
                info!(session_id = %session.id, "session selected");
                self.state.active_session_id = Some(session.id.clone());
                self.reply(&format!(
                    "✅ Switched to: {}\n\nNext message will use this session.",
                    session.title
                ))
                .await;
            }
            None => {
                self.reply("❌ Invalid session number. Use /s to see available sessions.")
                    .await;
            }
        }
    }

    async fn status(&self) {
        let session = self
            .current_session_label(None)
            .unwrap_or_else(|| "Continuing last session".to_string());
        let run = if self.runner.is_alive().await {
            "running"
        } else {
            "idle"
        };
        let pending = if self.state.pending_command.is_some() {
            "yes"
        } else {
            "no"
        };
        self.reply(&format!(
            "ℹ️ TeleCode status\n\n🤖 Model: {}\n📁 Session: {session}\n🛡️ Safety: {}\n📍 Working dir: {}\n⚙️ Process: {run}\n⏳ Approval pending: {pending}\n\nSettings: /safety | /models | /s",
            self.state.model,
            self.state.safety_mode,
            self.settings.working_dir.display(),
        ))
        .await;
    }

    async fn handle_pending(&mut self, text: &str, pending: PendingCommand) {
        match self.settings.approval.classify(text) {
            Some(Approval::Approve) => {
                self.state.pending_command = None;
                info!(command = %pending.command, "pending command approved");
                self.reply("✅ Approved. Executing...").await;
                self.launch(pending.command, pending.model).await;
            }
            Some(Approval::Reject) => {
                self.state.pending_command = None;
                info!(command = %pending.command, "pending command rejected");
                self.reply("❌ Operation cancelled.").await;
            }
            None => {
                self.reply("⚠️ Waiting for approval!\nPlease reply /yes or /no.")
                    .await;
            }
        }
    }

    async fn handle_stop(&mut self) {
        if self.runner.terminate().await {
            self.reply("🛑 Killed.").await;
        } else {
            self.reply("🛑 Nothing is running.").await;
        }
    }

    async fn handle_live_input(&self, text: &str) {
        match self.runner.feed_input(text).await {
            Ok(()) => self.reply("✅ Sent.").await,
            Err(EngineError::NotRunning) => {
                self.reply("❌ The process is no longer running.").await;
            }
            Err(err) => self.reply(&format!("❌ Could not send input: {err}")).await,
        }
    }

    async fn handle_new_command(&mut self, text: &str) {
        let command = if self.settings.assistant.is_invocation(text) {
            text.to_string()
        } else {
            match self.settings.assistant.run_command(
                self.state.active_session_id.as_deref(),
                &self.state.model,
                text,
            ) {
                Ok(command) => command,
                Err(err) => {
                    self.reply(&format!("❌ {err}")).await;
                    return;
                }
            }
        };

        if self.state.safety_mode == SafetyMode::Ask
            && self.settings.classifier.is_dangerous(&command)
        {
            info!(command = %command, "dangerous command held for approval");
            let preview: String = command.chars().take(APPROVAL_PREVIEW_CHARS).collect();
            let ellipsis = if preview.len() < command.len() {
                "..."
            } else {
                ""
            };
            self.reply(&format!(
                "⚠️ Dangerous operation detected:\n{preview}{ellipsis}\n\nAllow execution?\n✅ /yes  |  ❌ /no\n\nMode: {} (change: /safety)",
                self.state.safety_mode
            ))
            .await;
            self.state.pending_command = Some(PendingCommand {
                command,
                model: self.state.model.clone(),
            });
            return;
        }

        self.reply(&format!("🚀 Queueing: {command}")).await;
        self.launch(command, self.state.model.clone()).await;
    }

    async fn launch(&self, command: String, model: String) {
        let request = RunRequest {
            command,
            working_dir: self.settings.working_dir.clone(),
            model,
        };
        match self.runner.start(request).await {
            Ok(run) => debug!(run_id = run.id, "run started"),
            Err(err) => self.reply(&format!("❌ Failed to start: {err}")).await,
        }
    }
}
