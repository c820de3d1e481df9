//! # CLI Interface
//!
//! Defines the command-line argument structure for `tangle-relay` using
//! `clap` derive. Every `run` setting can come from a flag or from the
//! environment variable of the same name, so container deployments need no
//! flags at all.

use clap::{Parser, Subcommand};

use tangle_relay::config::{RawRelaySettings, DEFAULT_BROADCAST_DEADLINE_MS, DEFAULT_METRICS_PORT};

/// Tangle relay gateway.
///
/// Accepts tryte-encoded transactions over HTTP, performs proof of work
/// locally and broadcasts the result to a ledger node without making the
/// caller wait for either.
#[derive(Parser, Debug)]
#[command(
    name = "tangle-relay",
    about = "PoW-sealing broadcast relay for tangle ledger nodes",
    version,
    propagate_version = true
)]
pub struct RelayCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the relay gateway.
    Run(RunArgs),
    /// Show which PoW implementation this host would use.
    Pow,
    /// Query a running relay's host stats.
    Stats(StatsArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Port for the gateway API. Required.
    #[arg(long, env = "PORT")]
    pub port: u16,

    /// Ledger node URL. A known public node is picked at random when unset.
    #[arg(long, env = "PROVIDER")]
    pub provider: Option<String>,

    /// Tip-selection depth. Missing or unparsable values fall back to 0.
    #[arg(long, env = "MIN_DEPTH")]
    pub min_depth: Option<String>,

    /// PoW difficulty. Missing or unparsable values fall back to 0.
    #[arg(long, env = "MIN_WEIGHT_MAGNITUDE")]
    pub min_weight_magnitude: Option<String>,

    /// Webhook that receives a JSON report for every failed batch.
    #[arg(long, env = "ERROR_SINK_URL")]
    pub error_sink_url: Option<String>,

    /// How long the submit endpoint waits for a broadcast before answering.
    #[arg(long = "deadline-ms", env = "BROADCAST_DEADLINE_MS", default_value_t = DEFAULT_BROADCAST_DEADLINE_MS)]
    pub deadline_ms: u64,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl RunArgs {
    pub fn relay_settings(&self) -> RawRelaySettings {
        RawRelaySettings {
            provider: self.provider.clone(),
            min_depth: self.min_depth.clone(),
            min_weight_magnitude: self.min_weight_magnitude.clone(),
            deadline_ms: self.deadline_ms,
            error_sink_url: self.error_sink_url.clone(),
        }
    }
}

/// Arguments for the `stats` subcommand.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Base URL of the running relay.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub url: String,
}
