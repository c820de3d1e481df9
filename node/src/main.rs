// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tangle Relay Gateway
//!
//! Entry point for the `tangle-relay` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the dispatcher to a ledger node and
//! serves the gateway API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the gateway
//! - `pow`     — show the PoW implementation this host would use
//! - `stats`   — query a running gateway's host stats
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use tangle_relay::config::{RelayConfig, REPORT_DRAIN_GRACE};
use tangle_relay::dispatch::{Dispatcher, DispatcherConfig};
use tangle_relay::ledger::HttpLedgerClient;
use tangle_relay::pow;
use tangle_relay::report::{self, LogSink, ReportSink, WebhookSink};
use tangle_relay::stats::ProcStatsCollector;

use cli::{Commands, RelayCli};
use logging::{LogFormat, DEFAULT_LOG_FILTER};
use metrics::{MetricsSink, RelayMetrics};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RelayCli::parse();

    match cli.command {
        Commands::Run(args) => run_relay(args).await,
        Commands::Pow => {
            print_pow();
            Ok(())
        }
        Commands::Stats(args) => query_stats(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the gateway: report queue, dispatcher, API server and metrics
/// endpoint.
async fn run_relay(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(DEFAULT_LOG_FILTER, LogFormat::from_str_lossy(&args.log_format));

    let config = RelayConfig::resolve(args.relay_settings());
    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        provider = %config.provider,
        min_depth = config.min_depth,
        min_weight_magnitude = config.min_weight_magnitude,
        deadline_ms = config.deadline.as_millis() as u64,
        "starting tangle-relay"
    );

    // --- Metrics ---
    let relay_metrics = Arc::new(RelayMetrics::new());

    // --- Error reporting ---
    let (reporter, report_queue) = report::channel();
    let mut sinks: Vec<Arc<dyn ReportSink>> = vec![
        Arc::new(LogSink),
        Arc::new(MetricsSink::new(Arc::clone(&relay_metrics))),
    ];
    if let Some(url) = &config.error_sink_url {
        let webhook = WebhookSink::new(url.clone()).context("failed to build error sink client")?;
        sinks.push(Arc::new(webhook));
        tracing::info!(url = %url, "error reports will be posted to webhook");
    }
    let report_worker = report_queue.spawn(sinks);

    // --- Dispatcher ---
    let ledger = HttpLedgerClient::new(config.provider.clone())
        .with_context(|| format!("failed to build ledger client for {}", config.provider))?;
    let dispatcher = Dispatcher::new(Arc::new(ledger), reporter, DispatcherConfig::from(&config));
    tracing::info!(pow = dispatcher.pow_variant().name(), "dispatcher ready");

    // --- Application state ---
    let app_state = api::AppState {
        dispatcher: Arc::new(dispatcher),
        collector: Arc::new(ProcStatsCollector::new()),
        metrics: Arc::clone(&relay_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&relay_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    // In-flight submissions are detached tasks; they die with the runtime.
    report::drain(report_worker, REPORT_DRAIN_GRACE).await;
    tracing::info!("tangle-relay stopped");
    Ok(())
}

/// Prints the PoW variant this host would select and every one it could run.
fn print_pow() {
    let best = pow::select_best_variant();
    let available: Vec<_> = pow::available_variants().iter().map(|v| v.name()).collect();

    println!("selected   {}", best.name());
    println!("available  {}", available.join(", "));
    println!("cpus       {}", num_cpus::get());
}

/// Queries a running gateway's `/stats` endpoint and prints the result.
async fn query_stats(args: cli::StatsArgs) -> Result<()> {
    let url = format!("{}/stats", args.url.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .with_context(|| format!("invalid JSON from {}", url))?;
    if !status.is_success() {
        anyhow::bail!("{} returned {}: {}", url, status, body);
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("tangle-relay {}", env!("CARGO_PKG_VERSION"));
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
