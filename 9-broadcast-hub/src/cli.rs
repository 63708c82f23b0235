use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::hub::{DEFAULT_EVENT_CAPACITY, FailurePolicy, HubConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast server, accepting WebSocket connections.
    Server(ServerArgs),
    /// Connect to a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:9000")]
    pub listen: SocketAddr,

    /// Number of hub events that may queue before handlers wait.
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY)]
    pub event_capacity: usize,

    /// Per-recipient send timeout in milliseconds; 0 disables it.
    #[arg(long, default_value_t = 5000)]
    pub send_timeout_ms: u64,

    /// Keep recipients whose send failed instead of evicting them.
    #[arg(long)]
    pub retain_failed: bool,
}

impl ServerArgs {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            event_capacity: self.event_capacity,
            send_timeout: (self.send_timeout_ms > 0)
                .then(|| Duration::from_millis(self.send_timeout_ms)),
            failure_policy: if self.retain_failed {
                FailurePolicy::Retain
            } else {
                FailurePolicy::Evict
            },
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Server to connect to, as host:port.
    #[arg(long, default_value = "127.0.0.1:9000")]
    pub server: String,

    /// Display name attached to outgoing messages. Prompted for when absent
    /// or blank, falling back to the local IP address.
    #[arg(long)]
    pub name: Option<String>,
}

impl ClientArgs {
    pub fn url(&self) -> String {
        format!("ws://{}/", self.server)
    }
}
