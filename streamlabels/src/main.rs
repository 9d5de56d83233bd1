use clap::{CommandFactory, Parser};
use std::io::IsTerminal;
use streamlabels::cli::Cli;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let cli = Cli::parse();

    if cli.logout {
        streamlabels::logout()?;
        println!("Logged out.");
        return Ok(());
    }

    if cli.labels().is_empty() {
        tracing::error!(
            "nothing to do, pass at least one of --newest-follower, --newest-subscriber or --bits-leaderboard"
        );
        Cli::command().print_help()?;
        return Ok(());
    }

    let config = streamlabels::config::load(cli.config.as_deref())?;
    streamlabels::run(&cli, config).await
}
