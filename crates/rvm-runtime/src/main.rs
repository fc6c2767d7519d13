//! rvmd: reverse-vending machine controller binary.

use clap::Parser;
use rvm_runtime::{cli, client, daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("RVM_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!(version = env!("CARGO_PKG_VERSION"), "rvmd daemon starting");
            daemon::run_daemon(args.listen, opts).await?;
        }
        cli::Command::Send(opts) => {
            client::cmd_send(args.listen, &opts.name, &opts.message, opts.listen_secs).await?;
        }
        cli::Command::Listen(opts) => {
            client::cmd_listen(args.listen, &opts.name, opts.secs).await?;
        }
    }

    Ok(())
}
