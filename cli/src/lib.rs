use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use telecode_core::Config;
use telecode_core::ConfigOverrides;
use telecode_core::Controller;
use telecode_core::ProcessEngine;
use telecode_core::Relay;
use telecode_core::SafetyMode;
use telecode_core::StorageSessionRegistry;
use telecode_telegram::InboundMessage;
use telecode_telegram::TelegramApi;
use telecode_telegram::TelegramError;
use telecode_telegram::TelegramRelay;
use telecode_telegram::poll_loop;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Drive a local coding assistant from Telegram.
#[derive(Debug, Parser)]
#[command(name = "telecode", version)]
pub struct Cli {
    /// Path to a TOML config file. Defaults to `$TELECODE_CONFIG`, then
    /// `./telecode.toml` when present.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory the assistant runs in.
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Initial model, e.g. `opencode/kimi-k2.5-free`.
    #[arg(long)]
    pub model: Option<String>,

    /// Initial safety mode: `ask` or `auto`.
    #[arg(long, value_name = "MODE")]
    pub safety: Option<SafetyMode>,

    /// Default tracing directive when `RUST_LOG` is unset.
    #[arg(long, value_name = "DIRECTIVE", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            working_dir: self.workdir.clone(),
            model: self.model.clone(),
            safety_mode: self.safety,
        }
    }
}

/// Logs go to stderr; stdout carries the mirrored terminal output.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_overrides(cli.config_overrides())
        .context("failed to load configuration")?;
    info!(
        working_dir = %config.working_dir.display(),
        model = %config.model,
        safety = %config.safety_mode,
        "telecode starting"
    );

    let api = Arc::new(TelegramApi::with_base_url(
        &config.telegram_token,
        &config.telegram_api_base_url,
    ));
    let relay: Arc<dyn Relay> =
        Arc::new(TelegramRelay::new(Arc::clone(&api), config.operator_id));
    let engine = ProcessEngine::new(
        config.engine_settings(),
        Arc::clone(&relay),
        config.extractor(),
    );
    let registry = StorageSessionRegistry::new(config.sessions_dir.clone());
    let mut controller = Controller::new(
        config.controller_settings(),
        relay,
        Arc::new(registry),
        Arc::new(engine),
    );

    let (inbound_tx, mut inbound_rx) =
        mpsc::channel::<InboundMessage>(INBOUND_CHANNEL_CAPACITY);
    let mut poller = tokio::spawn(poll_loop(api, config.telegram_poll_timeout, inbound_tx));

    let outcome = loop {
        tokio::select! {
            Some(message) = inbound_rx.recv() => {
                controller.handle(&message.text, &message.sender).await;
            }
            result = &mut poller => {
                break result;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                poller.abort();
                break Ok(Ok(()));
            }
        }
    };

    if controller.shutdown().await {
        info!("terminated the running process");
    }

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(TelegramError::Conflict)) => {
            warn!("bot conflict detected: another instance is running; stopping");
            Ok(())
        }
        Ok(Err(err)) => Err(err).context("telegram poller failed"),
        Err(join_err) => Err(join_err).context("telegram poller panicked"),
    }
}
