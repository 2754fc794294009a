//! Main entry point for the netpulse binary.
//!
//! Binds a capture session to a network interface, drains the async packet
//! sequence, and reports running and peak throughput statistics:
//! - `netpulse list` enumerates capture-capable interfaces
//! - `netpulse capture -i <iface>` captures until ctrl-c or `--duration`
//!
//! Per-packet failures never abort a run; they are collected in the session
//! metrics and summarized at the end.

use crate::error::AppError;
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use netpulse_capture::device::PcapDevice;
use netpulse_capture::session::CaptureSession;
use netpulse_core::config::{CaptureConfig, DEFAULT_READ_TIMEOUT_MS, DEFAULT_SNAPLEN};
use netpulse_core::error::{CoreError, CoreErrorKind};
use netpulse_core::interface::{find_interface, list_interfaces};
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

mod error;

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Optional `.env` file path for loading environment variables.
    #[clap(short, long, value_name = "ENV_FILE")]
    env_file: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List capture-capable network interfaces.
    List,
    /// Capture packets from an interface and report throughput statistics.
    Capture {
        /// Interface to capture from, e.g. eth0.
        #[clap(short, long, value_name = "INTERFACE", env = "NETPULSE_INTERFACE")]
        interface: String,

        /// Filter expression passed verbatim to the capture device.
        #[clap(short, long, value_name = "FILTER", env = "NETPULSE_FILTER")]
        filter: Option<String>,

        /// Disable promiscuous mode.
        #[clap(
            long,
            value_name = "NO_PROMISCUOUS",
            env = "NETPULSE_NO_PROMISCUOUS",
            action = clap::ArgAction::SetTrue,
        )]
        no_promiscuous: bool,

        /// Device read timeout in milliseconds.
        #[clap(
            long,
            value_name = "READ_TIMEOUT_MS",
            env = "NETPULSE_READ_TIMEOUT_MS",
            default_value_t = DEFAULT_READ_TIMEOUT_MS
        )]
        read_timeout_ms: i32,

        /// Maximum bytes captured per frame.
        #[clap(
            long,
            value_name = "SNAPLEN",
            env = "NETPULSE_SNAPLEN",
            default_value_t = DEFAULT_SNAPLEN
        )]
        snaplen: i32,

        /// Stop after this many seconds; runs until ctrl-c when omitted.
        #[clap(short, long, value_name = "DURATION_SECS", env = "NETPULSE_DURATION")]
        duration: Option<u64>,

        /// Seconds between periodic statistics reports.
        #[clap(
            long,
            value_name = "STATS_INTERVAL_SECS",
            env = "NETPULSE_STATS_INTERVAL",
            default_value = "5"
        )]
        stats_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Some(env_file) = &cli.env_file {
        dotenvy::from_filename(env_file).expect("failed to load .env file");
    }

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("NETPULSE_LOG_LEVEL", "info")
            .write_style("NETPULSE_LOG_STYLE"),
    )
    .init();

    match cli.command {
        Command::List => {
            for interface in list_interfaces() {
                let state = if interface.is_up { "up" } else { "down" };
                let ips = interface
                    .ips
                    .iter()
                    .map(|ip| ip.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("{:<16} {:<5} {}", interface.name, state, ips);
            }
            Ok(())
        }
        Command::Capture {
            interface,
            filter,
            no_promiscuous,
            read_timeout_ms,
            snaplen,
            duration,
            stats_interval,
        } => {
            let config = CaptureConfig {
                filter,
                promiscuous: !no_promiscuous,
                read_timeout_ms,
                snaplen,
                immediate_mode: true,
            };
            run_capture(&interface, config, duration, stats_interval).await
        }
    }
}

async fn run_capture(
    interface: &str,
    config: CaptureConfig,
    duration: Option<u64>,
    stats_interval: u64,
) -> Result<(), AppError> {
    let info = find_interface(interface)?;
    if !info.is_up {
        return Err(AppError::from(CoreError::new(
            CoreErrorKind::NetworkInterfaceError,
            &format!("Interface {interface} is not up"),
        )));
    }

    let mut session = CaptureSession::new(config);
    session.set_device(Box::new(PcapDevice::new(interface)))?;
    session.start()?;
    info!("Capturing on {interface}; stop with ctrl-c");

    let metrics = session
        .metrics()
        .cloned()
        .expect("metrics exist once capture has started");

    let consumer_token = CancellationToken::new();
    let deadline = deadline_after(duration);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    let mut stream = session.packet_stream(consumer_token.clone())?;
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(packet)) => {
                    debug!(
                        "{:?} frame, {} bytes{}",
                        packet.link_type,
                        packet.length,
                        if packet.is_truncated() { " (truncated)" } else { "" }
                    );
                }
                Some(Err(e)) if e.is_cancelled() => break,
                Some(Err(e)) => {
                    warn!("Capture loop died: {e}");
                    break;
                }
                None => {
                    info!("Capture source exhausted");
                    break;
                }
            },
            _ = ticker.tick() => {
                let snapshot = metrics.snapshot();
                info!(
                    "{} packets, {} bytes, {:.1} pps (peak {} pps)",
                    snapshot.total_packets,
                    snapshot.total_bytes,
                    snapshot.average_packets_per_second,
                    snapshot.max_packets_per_second,
                );
            }
            _ = &mut deadline => {
                info!("Capture duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    drop(stream);

    // Read the device's drop counters before the handle is closed by stop.
    let device_stats = session.device_stats();
    session.stop().await;

    let mut snapshot = metrics.snapshot();
    snapshot.merge_device_stats(device_stats);
    println!("{}", snapshot.format());

    for error in metrics.errors() {
        warn!("Capture-time failure: {error}");
    }
    Ok(())
}

async fn deadline_after(duration: Option<u64>) {
    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}
