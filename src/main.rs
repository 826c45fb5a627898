mod cli;
mod cluster;
mod config;
mod logs;
mod web;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "loggerator=debug"
    } else {
        "loggerator=info"
    };
    // stderr keeps `tail --json` / `cluster` output on stdout clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::run(cli).await
}
