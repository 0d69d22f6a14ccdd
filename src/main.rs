use anyhow::Result;
use clap::Parser;

use devjail::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))?;

    // Exit codes are part of the wrapper contracts (2 = violation,
    // 127 = command not found), so they flow out explicitly.
    std::process::exit(code)
}

async fn async_main(cli: Cli) -> Result<i32> {
    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Jail(args) => devjail::cli::jail::run(args, &cli.globals).await,
        Commands::Net(args) => devjail::cli::net::run(args, &cli.globals).await,
        Commands::Guard(args) => devjail::cli::guard::run(args, &cli.globals).await,
        Commands::Sample(args) => devjail::cli::sample::run(args, &cli.globals).await,
        Commands::Alerts(args) => devjail::cli::alerts::run(args, &cli.globals).await,
        Commands::Status => devjail::cli::status::run(&cli.globals).await,
    }
}
