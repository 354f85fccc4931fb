use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Coordinator and agent for a long-lived bidirectional control stream.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// TOML configuration file with [coordinator] and [agent] tables
    #[arg(long, global = true, env = "FLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to a timestamp-named file in this directory
    #[arg(long, global = true, env = "FLEET_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Accept agent streams and push periodic commands to them
    Coordinator(CoordinatorArgs),
    /// Connect to a coordinator and run the agent protocol
    Agent(AgentArgs),
}

/// Options left unset fall back to the config file, then to built-in defaults.
#[derive(Args, Clone, Debug, Default)]
pub struct CoordinatorArgs {
    /// Bind address [default: 127.0.0.1]
    #[arg(long, env = "FLEET_BIND")]
    pub bind: Option<String>,

    /// Port to listen on [default: 50051]
    #[arg(long, env = "FLEET_PORT")]
    pub port: Option<u16>,

    /// Identity stamped on coordinator envelopes [default: coordinator]
    #[arg(long, env = "FLEET_COORDINATOR_ID")]
    pub coordinator_id: Option<String>,

    /// Seconds between command pushes to each agent [default: 30]
    #[arg(long, env = "FLEET_PUSH_INTERVAL_SECS")]
    pub push_interval_secs: Option<u64>,

    /// Push when the wall-clock second is a multiple of the push interval
    #[arg(long, env = "FLEET_WALL_CLOCK_PUSH")]
    pub wall_clock_push: bool,

    /// Write timeout for one outbound envelope, in milliseconds [default: 5000]
    #[arg(long, env = "FLEET_PUSH_WRITE_TIMEOUT_MS")]
    pub push_write_timeout_ms: Option<u64>,

    /// Capacity of each session's outbound queue [default: 100]
    #[arg(long, env = "FLEET_OUTBOUND_BUFFER")]
    pub outbound_buffer: Option<usize>,
}

#[derive(Args, Clone, Debug, Default)]
pub struct AgentArgs {
    /// Coordinator URL [default: http://127.0.0.1:50051]
    #[arg(long, env = "FLEET_COORDINATOR")]
    pub coordinator: Option<String>,

    /// Agent id [default: agent-<random>]
    #[arg(long, env = "FLEET_AGENT_ID")]
    pub id: Option<String>,

    /// Seconds between periodic messages [default: 10]
    #[arg(long, env = "FLEET_TICK_INTERVAL_SECS")]
    pub tick_interval_secs: Option<u64>,

    /// First reconnect delay, in milliseconds [default: 1000]
    #[arg(long, env = "FLEET_RECONNECT_INITIAL_MS")]
    pub reconnect_initial_ms: Option<u64>,

    /// Upper bound on the reconnect delay, in seconds [default: 30]
    #[arg(long, env = "FLEET_RECONNECT_MAX_SECS")]
    pub reconnect_max_secs: Option<u64>,

    /// Give up after this many consecutive failed connections [default: never]
    #[arg(long, env = "FLEET_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,
}
