use clap::Parser;
use telecode_cli::Cli;
use telecode_cli::init_tracing;
use telecode_cli::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing `.env` is fine; the environment may already be set.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    run_main(cli).await
}
