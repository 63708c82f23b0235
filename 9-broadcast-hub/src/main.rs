use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use broadcast_hub::{
    cli::{Cli, Command, ServerArgs},
    client,
    server::Server,
};

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// Logs go to stderr so the chat client's stdout only carries messages.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn serve(args: ServerArgs) -> Result<()> {
    let config = args.hub_config();
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = Server::new(listener, config.clone());

    info!(
        addr = %server.local_addr()?,
        event_capacity = config.event_capacity,
        send_timeout = ?config.send_timeout,
        failure_policy = ?config.failure_policy,
        "hub server listening"
    );

    server.run_until_ctrl_c().await.inspect_err(|err| {
        error!("server exited with error: {err:?}");
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            init_tracing("info");
            serve(args).await
        }
        Command::Client(args) => {
            init_tracing("warn");
            client::run(args).await
        }
    }
}
