//! CLI entry point for the netwatch scan engine.

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use ipnet::Ipv4Net;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use netwatch_core::types::{ScanTarget, SweepTarget};
use netwatch_store::RecordKind;

use netwatch_engine::{spawn_forwarder, Engine, EngineConfig, ScanHandle, ScanOutcome, TracingSink};

#[derive(Parser)]
#[command(name = "netwatch")]
#[command(about = "Port scans, subnet sweeps, and scheduled re-scans")]
struct Cli {
    /// Config file prefix (default: netwatch).
    #[arg(short, long, default_value = "netwatch", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a TCP port range on one host.
    Ports {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 1)]
        start: u16,
        #[arg(long, default_value_t = 1024)]
        end: u16,
    },
    /// Find live hosts on a subnet.
    Sweep {
        /// Address prefix including the trailing dot, e.g. 192.168.1.
        #[arg(long, conflicts_with = "cidr", required_unless_present = "cidr")]
        prefix: Option<String>,
        #[arg(long, default_value_t = 1)]
        lo: u8,
        #[arg(long, default_value_t = 254)]
        hi: u8,
        /// An IPv4 /24, swept over .1 to .254.
        #[arg(long)]
        cidr: Option<String>,
    },
    /// Check whether one host is alive.
    Ping {
        #[arg(long)]
        host: String,
    },
    /// Run the configured scheduled jobs until interrupted.
    Daemon,
    /// Search stored results (host for ports/pings/jobs, prefix for sweeps).
    Search { kind: Kind, query: String },
    /// Delete every stored record of one kind.
    Clear { kind: Kind },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Ports,
    Sweeps,
    Pings,
    Jobs,
}

impl Kind {
    fn record_kind(self) -> Option<RecordKind> {
        match self {
            Kind::Ports => Some(RecordKind::PortScan),
            Kind::Sweeps => Some(RecordKind::NetworkScan),
            Kind::Pings => Some(RecordKind::Ping),
            Kind::Jobs => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config: EngineConfig = netwatch_core::config::load_section(&cli.config, "engine")?;
    let engine = Engine::from_config(config)?;

    let shutdown = CancellationToken::new();
    let forwarder = spawn_forwarder(engine.bus(), Arc::new(TracingSink), shutdown.clone());

    let outcome = run(&engine, cli.command).await;

    shutdown.cancel();
    forwarder.await?;
    outcome
}

async fn run(engine: &Engine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ports { host, start, end } => {
            let handle = engine
                .start_port_scan(ScanTarget::new(host, start, end))
                .await?;
            let outcome = wait_or_interrupt(engine, handle).await?;
            print_outcome(&outcome)
        }
        Command::Sweep {
            prefix,
            lo,
            hi,
            cidr,
        } => {
            let target = match (prefix, cidr) {
                (_, Some(cidr)) => sweep_target_from_cidr(&cidr)?,
                (Some(prefix), None) => SweepTarget::new(prefix, lo, hi),
                (None, None) => anyhow::bail!("Specify --prefix or --cidr"),
            };
            let handle = engine.start_sweep(target).await?;
            let outcome = wait_or_interrupt(engine, handle).await?;
            print_outcome(&outcome)
        }
        Command::Ping { host } => print_json(&engine.ping(&host).await?),
        Command::Daemon => {
            let ids = engine
                .scheduler()
                .register_configured(&engine.config().jobs);
            if ids.is_empty() {
                tracing::warn!("No scheduled jobs configured");
            }
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            engine.shutdown().await;
            Ok(())
        }
        Command::Search { kind, query } => match kind {
            Kind::Ports => print_json(&engine.search_ports(&query)?),
            Kind::Sweeps => print_json(&engine.search_sweeps(&query)?),
            Kind::Pings => print_json(&engine.search_pings(&query)?),
            Kind::Jobs => print_json(&engine.search_jobs(&query)?),
        },
        Command::Clear { kind } => {
            let removed = match kind.record_kind() {
                Some(record_kind) => engine.clear_results(record_kind)?,
                None => engine.clear_jobs().await?,
            };
            println!("{removed}");
            Ok(())
        }
    }
}

/// Wait for a scan, cancelling it on Ctrl-C.
async fn wait_or_interrupt<T>(
    engine: &Engine,
    handle: ScanHandle<T>,
) -> anyhow::Result<ScanOutcome<T>> {
    let scan_id = handle.scan_id();
    let mut wait = Box::pin(handle.wait());
    tokio::select! {
        outcome = &mut wait => return Ok(outcome?),
        _ = tokio::signal::ctrl_c() => {
            engine.cancel_scan(scan_id);
        }
    }
    Ok(wait.await?)
}

fn print_outcome<T: Serialize>(outcome: &ScanOutcome<T>) -> anyhow::Result<()> {
    if outcome.is_cancelled() {
        tracing::warn!("Scan cancelled, partial result not stored");
    }
    print_json(outcome.result())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Map an IPv4 /24 onto its dotted prefix and the usable host range.
fn sweep_target_from_cidr(cidr: &str) -> anyhow::Result<SweepTarget> {
    let net: Ipv4Net = cidr.parse()?;
    if net.prefix_len() != 24 {
        anyhow::bail!("Only /24 networks can be swept, got /{}", net.prefix_len());
    }
    let [a, b, c, _] = net.network().octets();
    Ok(SweepTarget::new(format!("{a}.{b}.{c}."), 1, 254))
}
