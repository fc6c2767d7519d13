//! CLI definition using clap derive.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use rvm_core::{APP_PEER, DetectionPolicy, EngineConfig, MAX_TIMEOUT_MS};

#[derive(Parser)]
#[command(name = "rvmd", about = "Reverse-vending machine controller")]
pub struct Cli {
    /// Bus address: where the daemon listens and where clients connect
    #[arg(long, short = 'l', global = true, env = "RVM_LISTEN", default_value = "127.0.0.1:8765")]
    pub listen: SocketAddr,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the controller (bus server + polling loop + state machine)
    Daemon(DaemonOpts),
    /// Register as a peer, send one message and print what comes back
    Send(SendOpts),
    /// Register as a peer and print incoming events
    Listen(ListenOpts),
}

#[derive(clap::Args, Debug, Clone)]
pub struct DaemonOpts {
    /// State machine tick period in milliseconds
    #[arg(long, env = "RVM_TICK_MS", default_value = "100")]
    pub tick_ms: u64,

    /// Field controller poll period in milliseconds
    #[arg(long, env = "RVM_POLL_MS", default_value = "100")]
    pub poll_ms: u64,

    /// How long to wait for the vision verdict
    #[arg(
        long,
        env = "RVM_VISION_TIMEOUT_MS",
        default_value = "2000",
        value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_MS)
    )]
    pub vision_timeout_ms: u64,

    /// How long a carriage move may take before it counts as jammed
    #[arg(
        long,
        env = "RVM_DUMP_TIMEOUT_MS",
        default_value = "3000",
        value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_MS)
    )]
    pub dump_timeout_ms: u64,

    /// How long get_photo waits for the vision peer
    #[arg(
        long,
        env = "RVM_PHOTO_TIMEOUT_MS",
        default_value = "2000",
        value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_MS)
    )]
    pub photo_timeout_ms: u64,

    /// What starts a detection cycle: curtain-or-presence | curtain-and-presence
    #[arg(long, env = "RVM_DETECTION_POLICY", default_value = "curtain-or-presence")]
    pub detection_policy: DetectionPolicy,

    /// Maximum concurrent peer connections
    #[arg(long, env = "RVM_MAX_PEERS", default_value = "16")]
    pub max_peers: usize,

    /// Status heartbeat period in seconds (0 disables)
    #[arg(long, default_value = "30")]
    pub status_interval_secs: u64,
}

impl Default for DaemonOpts {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            tick_ms: engine.tick_interval_ms,
            poll_ms: 100,
            vision_timeout_ms: engine.vision_timeout_ms,
            dump_timeout_ms: engine.dump_timeout_ms,
            photo_timeout_ms: engine.photo_timeout_ms,
            detection_policy: engine.detection_policy,
            max_peers: rvm_bus::DEFAULT_MAX_PEERS,
            status_interval_secs: 30,
        }
    }
}

impl DaemonOpts {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tick_interval_ms: self.tick_ms.max(1),
            vision_timeout_ms: self.vision_timeout_ms,
            dump_timeout_ms: self.dump_timeout_ms,
            photo_timeout_ms: self.photo_timeout_ms,
            detection_policy: self.detection_policy,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct SendOpts {
    /// Raw message: `name`, `name:param`, or a JSON object
    pub message: String,

    /// Peer name to register as (`sim` patches the simulated sensors)
    #[arg(long = "as", default_value = APP_PEER)]
    pub name: String,

    /// Seconds to keep printing events after sending
    #[arg(long, default_value = "2")]
    pub listen_secs: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ListenOpts {
    /// Peer name to register as
    #[arg(long = "as", default_value = APP_PEER)]
    pub name: String,

    /// Stop after this many seconds (default: until interrupted)
    #[arg(long)]
    pub secs: Option<u64>,
}
