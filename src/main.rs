//! MIDI Chain Node - host runner
//!
//! Runs a chain of proximity nodes on a workstation: the head node talks to
//! the host over a virtual USB endpoint (or real MIDI ports), the others are
//! linked behind it with in-memory Plug/Socket links and simulated sensors.

use anyhow::{Context, Result};
use clap::Parser;
use midi_chain_node::config::{ConfigRecord, FileStore};
use midi_chain_node::device::ProximityDevice;
use midi_chain_node::midi::format_hex;
use midi_chain_node::sensor::{NullIndicator, SensorAdapter, SweepSensor};
use midi_chain_node::transport::{midi_port, LinkEnd, UsbEndpoint, UsbHost, VirtualUsb};
use midi_chain_node::{Configuration, Node};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Daisy-chained proximity sensor node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration document imported at boot
    #[arg(short, long)]
    config: Option<String>,

    /// Persisted configuration record
    #[arg(long, env = "NODE_STORE", default_value = ".state/node.cfg")]
    store: String,

    /// Product identifier the record magic is derived from
    #[arg(long, default_value = "proximity-node")]
    product_id: String,

    /// Number of nodes in the simulated chain
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u8).range(1..=15))]
    chain_length: u8,

    /// Scheduling cycle period in milliseconds
    #[arg(long, default_value = "10")]
    cycle_ms: u64,

    /// Send the head node's USB traffic to MIDI output ports matching this name
    #[arg(long)]
    midi_out: Option<String>,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Print the configuration document and exit
    #[arg(long)]
    export: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_ports {
        return midi_port::list_ports();
    }

    let config = load_config(&args)?;

    if args.export {
        println!("{}", serde_json::to_string_pretty(&config.export())?);
        return Ok(());
    }

    info!("Starting MIDI chain node ({} node(s))...", args.chain_length);

    let (mut nodes, mut host) = build_chain(&args, config)?;

    let period = Duration::from_millis(args.cycle_ms.max(1));
    run_loop(&mut nodes, host.as_mut(), period, shutdown_signal()).await;

    for (index, node) in nodes.iter().enumerate() {
        let summary = json!({
            "node": index,
            "mode": node.mode(),
            "routes": node.stats(),
            "sent": node.device().sent_count(),
        });
        info!("📊 {}", summary);
    }

    info!("MIDI chain node shutdown complete");
    Ok(())
}

/// Boot configuration: stored record, then the optional JSON document on top
fn load_config(args: &Args) -> Result<Configuration> {
    let record = ConfigRecord::new(&args.product_id);
    let mut store = FileStore::new(&args.store);
    let mut config = record.load_or_default(&mut store)?;

    if let Some(path) = &args.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let raw: Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON config: {}", path))?;

        config = config.import(&raw);
        record.store(&mut store, &config)?;
        info!("Configuration imported from {} and saved to {}", path, args.store);
    }

    Ok(config)
}

fn build_chain(args: &Args, config: Configuration) -> Result<(Vec<Node>, Option<UsbHost>)> {
    let mut host = None;
    let head_usb: Box<dyn UsbEndpoint> = match &args.midi_out {
        Some(pattern) => Box::new(midi_port::MidirUsb::connect(pattern)?),
        None => {
            let (usb, virtual_host) = VirtualUsb::new();
            host = Some(virtual_host);
            Box::new(usb)
        }
    };

    let mut nodes = Vec::with_capacity(usize::from(args.chain_length));
    let mut usb = Some(head_usb);
    let mut plug = LinkEnd::unplugged();

    for index in 0..args.chain_length {
        let controller = i64::from(config.controller) + i64::from(index);
        let node_config = config.import(&json!({ "controller": controller }));
        let last = index + 1 == args.chain_length;

        let (socket, next_plug) = if last {
            (LinkEnd::unplugged(), LinkEnd::unplugged())
        } else {
            LinkEnd::pair()
        };

        let device = ProximityDevice::new(
            node_config,
            SensorAdapter::new(Box::new(NullIndicator::default())),
            Box::new(SweepSensor::new(node_config.range, 3.0 + 2.0 * f32::from(index))),
        );
        let node_usb: Box<dyn UsbEndpoint> = match usb.take() {
            Some(head) => head,
            None => Box::new(VirtualUsb::detached()),
        };

        debug!(
            "Node {} ready (channel {}, controller {})",
            index,
            node_config.display_channel(),
            node_config.controller
        );
        nodes.push(Node::new(device, node_usb, Box::new(plug), Box::new(socket)));
        plug = next_plug;
    }

    Ok((nodes, host))
}

async fn run_loop(
    nodes: &mut [Node],
    mut host: Option<&mut UsbHost>,
    period: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for node in nodes.iter_mut() {
                    node.poll();
                }

                if let Some(host) = host.as_deref_mut() {
                    while let Some(event) = host.recv() {
                        info!("🎹 USB ← {} [{}]", event, format_hex(&event.to_bytes()));
                    }
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping node loop");
                break;
            }
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
