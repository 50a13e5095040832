//! Sensor Mesh Command-Line Interface
//!
//! This CLI provides tools for:
//! - Running a mesh node over a local UDP stand-in for the broadcast radio
//! - Simulating a multi-node mesh in virtual time
//! - Encoding and decoding individual wire frames
//! - Printing and checking node configuration files
//!
//! Status lines go to stdout, one JSON object per line; logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tmesh_core::mesh::simulation::{MeshSimulator, SimConfig, Topology};
use tmesh_core::mesh::{
    CipherKey, Clock, Frame, FrameCodec, FrameValidator, MsgType, NodeId, Radio, WireFrame,
};
use tmesh_core::sensor::SimulatedAht;
use tmesh_core::status::{Action, JsonLineSink, StatusLine};
use tmesh_core::{Button, NodeConfig, RadioError, SensorNode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::signal;
use tracing::{debug, info, trace, warn};

#[derive(Parser)]
#[command(name = "tmesh")]
#[command(author, version, about = "Sensor mesh relay node CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node, using localhost UDP as the radio
    Node {
        /// Device id (1-99); overrides the config file
        #[arg(short, long)]
        id: Option<u8>,

        /// Node configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Each node listens on base-port + device id
        #[arg(long, default_value = "47000")]
        base_port: u16,

        /// Ids to broadcast to (default: every other id)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<u8>,

        /// Simulated sensor temperature (C)
        #[arg(long, default_value = "21.5", allow_negative_numbers = true)]
        temperature: f32,

        /// Simulated sensor humidity (%)
        #[arg(long, default_value = "45.0")]
        humidity: f32,

        /// Override the transmit interval (ms)
        #[arg(long)]
        tx_interval_ms: Option<u64>,
    },

    /// Simulate a mesh in virtual time
    Simulate {
        /// Device ids, one node each
        #[arg(short, long, value_delimiter = ',', default_value = "5,7,9")]
        nodes: Vec<u8>,

        /// Link topology
        #[arg(short, long, value_enum, default_value = "line")]
        topology: TopologyKind,

        /// Radio range for the random topology (m, in a 1000 x 1000 area)
        #[arg(long, default_value = "400")]
        range: f64,

        /// Simulated duration (ms)
        #[arg(short, long, default_value = "1200000")]
        duration_ms: u64,

        /// Press button A on this node index at 1 s
        #[arg(long)]
        press: Option<usize>,

        /// Per-link frame loss probability
        #[arg(long, default_value = "0.0")]
        loss: f64,

        /// Airtime per frame (ms)
        #[arg(long, default_value = "50")]
        airtime_ms: u64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Override the transmit interval (ms)
        #[arg(long)]
        tx_interval_ms: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Wire frame tools
    Frame {
        #[command(subcommand)]
        action: FrameAction,
    },

    /// Print the default configuration, or check a file
    Config {
        /// Device id for the printed default
        #[arg(short, long, default_value = "1")]
        id: u8,

        /// Check this file instead of printing the default
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum FrameAction {
    /// Encode a reading to a hex wire frame
    Encode {
        /// Origin device id
        #[arg(short, long)]
        origin: u8,

        /// Message type character
        #[arg(short = 't', long = "type", default_value = "t")]
        msg_type: char,

        /// Payload value
        #[arg(long, allow_negative_numbers = true)]
        value: f32,

        /// Relay ids already in the hop trace
        #[arg(long, value_delimiter = ',')]
        hops: Vec<u8>,

        /// IV byte (random when omitted)
        #[arg(long)]
        iv: Option<u8>,

        /// Cipher key as 38 hex digits (default: all zero)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Decode and validate a hex wire frame
    Decode {
        /// 19-byte wire frame as 38 hex digits
        wire: String,

        /// Cipher key as 38 hex digits (default: all zero)
        #[arg(short, long)]
        key: Option<String>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Timeline and summary table
    Text,
    /// One JSON summary document
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyKind {
    /// Each node hears its index neighbors only
    Line,
    /// Every node hears every other node
    Full,
    /// Random placement with a radio range
    Random,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Node {
            id,
            config,
            base_port,
            peers,
            temperature,
            humidity,
            tx_interval_ms,
        } => cmd_node(
            id,
            config,
            base_port,
            peers,
            temperature,
            humidity,
            tx_interval_ms,
        ),

        Commands::Simulate {
            nodes,
            topology,
            range,
            duration_ms,
            press,
            loss,
            airtime_ms,
            seed,
            tx_interval_ms,
            format,
        } => cmd_simulate(
            nodes,
            topology,
            range,
            duration_ms,
            press,
            loss,
            airtime_ms,
            seed,
            tx_interval_ms,
            format,
        ),

        Commands::Frame { action } => match action {
            FrameAction::Encode {
                origin,
                msg_type,
                value,
                hops,
                iv,
                key,
            } => cmd_frame_encode(origin, msg_type, value, hops, iv, key),
            FrameAction::Decode { wire, key } => cmd_frame_decode(wire, key),
        },

        Commands::Config { id, check } => cmd_config(id, check),
    }
}

fn parse_key(key: Option<String>) -> Result<CipherKey> {
    match key {
        None => Ok(CipherKey::default()),
        Some(hex_key) => {
            let bytes = hex::decode(hex_key.trim()).context("Invalid hex key")?;
            Ok(CipherKey::from_slice(&bytes)?)
        }
    }
}

fn load_config(id: Option<u8>, path: Option<PathBuf>) -> Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_file(&path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => NodeConfig::default(),
    };
    if let Some(id) = id {
        config.device_id = id;
    }
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Node over UDP
// ============================================================================

/// Broadcast radio stand-in: one datagram to every peer port on localhost
struct UdpRadio {
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    group: u8,
}

impl Radio for UdpRadio {
    fn send(&mut self, frame: &WireFrame) -> Result<(), RadioError> {
        let mut delivered = 0;
        let mut last_error = None;
        for peer in &self.peers {
            match self.socket.try_send_to(frame.as_bytes(), *peer) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    trace!(%peer, "send failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if delivered == 0 => Err(match e.kind() {
                ErrorKind::WouldBlock => RadioError::TxRefused(e.to_string()),
                _ => RadioError::Unavailable(e.to_string()),
            }),
            _ => Ok(()),
        }
    }

    fn group(&self) -> u8 {
        self.group
    }
}

/// Wall clock since node start
///
/// `delay` blocks the runtime thread, so every handler runs to completion
/// before the next datagram or key press is looked at.
struct SystemClock {
    start: Instant,
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type UdpNode = SensorNode<UdpRadio, SimulatedAht, SystemClock>;

fn cmd_node(
    id: Option<u8>,
    config: Option<PathBuf>,
    base_port: u16,
    peers: Vec<u8>,
    temperature: f32,
    humidity: f32,
    tx_interval_ms: Option<u64>,
) -> Result<()> {
    let mut config = load_config(id, config)?;
    if let Some(interval) = tx_interval_ms {
        config.schedule.tx_interval_ms = interval;
        config.validate()?;
    }

    let own = config.device_id;
    let peer_ids: Vec<u8> = if peers.is_empty() {
        (1..=NodeId::MAX).filter(|&p| p != own).collect()
    } else {
        peers.into_iter().filter(|&p| p != own).collect()
    };
    let port = |id: u8| -> Result<u16> {
        base_port
            .checked_add(u16::from(id))
            .context("base port + device id overflows")
    };
    let local = SocketAddr::from((Ipv4Addr::LOCALHOST, port(own)?));
    let peer_addrs = peer_ids
        .iter()
        .map(|&p| Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port(p)?))))
        .collect::<Result<Vec<_>>>()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(start_node(config, local, peer_addrs, temperature, humidity))
}

async fn start_node(
    config: NodeConfig,
    local: SocketAddr,
    peers: Vec<SocketAddr>,
    temperature: f32,
    humidity: f32,
) -> Result<()> {
    let socket = Arc::new(
        UdpSocket::bind(local)
            .await
            .with_context(|| format!("Failed to bind UDP socket {}", local))?,
    );
    let radio = UdpRadio {
        socket: Arc::clone(&socket),
        peers,
        group: config.radio.group,
    };
    let sensor = SimulatedAht::new(temperature, humidity);
    let clock = SystemClock {
        start: Instant::now(),
    };
    let node = SensorNode::new(config, radio, sensor, clock)?;

    eprintln!(
        "Mesh node {} on {} (group {})",
        node.node_id(),
        local,
        node.radio().group()
    );
    eprintln!("Type 'a' or 'b' + Enter to press a button. Ctrl+C to stop.");
    run_node(node, socket).await
}

async fn run_node(mut node: UdpNode, socket: Arc<UdpSocket>) -> Result<()> {
    let mut sink = JsonLineSink::new(std::io::stdout());
    node.boot(&mut sink);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut buf = [0u8; 64];

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        node.poll(&mut sink);

        let now = node.clock().now_ms();
        let wait = node
            .next_due()
            .map(|due| due.saturating_sub(now))
            .unwrap_or(1000);

        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => match WireFrame::from_slice(&buf[..len]) {
                    Some(wire) => node.deliver(wire),
                    None => debug!(%from, len, "dropping datagram of wrong size"),
                },
                Err(e) => warn!("UDP receive failed: {}", e),
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "a" | "A" => node.press_button(Button::A),
                    "b" | "B" => node.press_button(Button::B),
                    "" => {}
                    other => warn!("unknown input {:?}; use 'a' or 'b'", other),
                },
                Ok(None) => {
                    info!("stdin closed, buttons disabled");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    let stats = node.relay_stats();
    eprintln!();
    eprintln!("Node {} statistics:", node.node_id());
    eprintln!("  Received:     {}", stats.frames_rx);
    eprintln!("  Forwarded:    {}", stats.forwarded);
    eprintln!("  Suppressed:   {}", stats.suppressed);
    eprintln!("  Own id:       {}", stats.own_origin);
    eprintln!("  Garbage:      {}", stats.garbage);
    eprintln!("  Invalid:      {}", stats.invalid);
    eprintln!("  Sent:         {}", stats.sent);
    eprintln!("  TX errors:    {}", stats.tx_errors);
    eprintln!("  Boots:        {}", node.boot_count());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {}", err);
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Simulation
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    ids: Vec<u8>,
    topology: TopologyKind,
    range: f64,
    duration_ms: u64,
    press: Option<usize>,
    loss: f64,
    airtime_ms: u64,
    seed: u64,
    tx_interval_ms: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    if ids.is_empty() {
        bail!("At least one node is required");
    }

    let configs = ids
        .iter()
        .map(|&id| {
            let mut config = NodeConfig::for_device(id);
            if let Some(interval) = tx_interval_ms {
                config.schedule.tx_interval_ms = interval;
            }
            config
        })
        .collect::<Vec<_>>();

    let n = configs.len();
    let topology = match topology {
        TopologyKind::Line => Topology::line(n),
        TopologyKind::Full => Topology::full(n),
        TopologyKind::Random => Topology::random_geometric(n, 1000.0, 1000.0, range, seed).0,
    };
    if !topology.is_connected() {
        warn!("topology is not connected; some readings cannot reach every node");
    }

    let sim_config = SimConfig::default()
        .with_airtime(airtime_ms)
        .with_loss_rate(loss)
        .with_seed(seed);
    let mut sim = MeshSimulator::new(sim_config, configs, topology)
        .context("Failed to build simulation")?;

    if let Some(idx) = press {
        if idx >= n {
            bail!("--press index {} out of range (0..{})", idx, n);
        }
        sim.run_until(1000);
        sim.press_button(idx, Button::A);
    }
    sim.run_until(duration_ms);

    if format == OutputFormat::Json {
        let summary = SimSummary {
            duration_ms,
            frames_transmitted: sim.stats().frames_transmitted,
            deliveries: sim.stats().deliveries,
            frames_lost: sim.stats().frames_lost,
            nodes: ids
                .iter()
                .enumerate()
                .filter_map(|(idx, &device_id)| {
                    sim.relay_stats(idx).map(|relay| NodeSummary {
                        device_id,
                        frames_rx: relay.frames_rx,
                        forwarded: relay.forwarded,
                        suppressed: relay.suppressed,
                        own_origin: relay.own_origin,
                        sent: relay.sent,
                        restarts: sim.restarts(idx),
                        status_lines: sim.status_lines(idx).to_vec(),
                    })
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for entry in sim.timeline() {
        println!(
            "[{:>9} ms] node {:>2}  {}",
            entry.at,
            ids[entry.node_idx],
            entry.line.to_json()
        );
    }

    let stats = sim.stats();
    println!();
    println!("=== Simulation Summary ===");
    println!("Duration:       {} ms", duration_ms);
    println!("Transmitted:    {}", stats.frames_transmitted);
    println!("Delivered:      {}", stats.deliveries);
    println!("Lost:           {}", stats.frames_lost);
    println!();
    println!("{:<6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>8}", "Node", "Rx", "Fwd", "Dup", "Own", "Sent", "Restarts");
    println!("{}", "-".repeat(50));
    for (idx, id) in ids.iter().enumerate() {
        if let Some(relay) = sim.relay_stats(idx) {
            println!(
                "{:<6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>8}",
                id,
                relay.frames_rx,
                relay.forwarded,
                relay.suppressed,
                relay.own_origin,
                relay.sent,
                sim.restarts(idx)
            );
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct SimSummary {
    duration_ms: u64,
    frames_transmitted: u64,
    deliveries: u64,
    frames_lost: u64,
    nodes: Vec<NodeSummary>,
}

#[derive(Serialize)]
struct NodeSummary {
    device_id: u8,
    frames_rx: u64,
    forwarded: u64,
    suppressed: u64,
    own_origin: u64,
    sent: u64,
    restarts: u32,
    status_lines: Vec<StatusLine>,
}

// ============================================================================
// Frame tools
// ============================================================================

fn cmd_frame_encode(
    origin: u8,
    msg_type: char,
    value: f32,
    hops: Vec<u8>,
    iv: Option<u8>,
    key: Option<String>,
) -> Result<()> {
    let origin = NodeId::new(origin).context("Origin must be 1-99")?;
    let msg_type = MsgType::from_char(msg_type).context("Type must be a printable ASCII character")?;
    let codec = FrameCodec::new(parse_key(key)?);

    let mut frame = Frame::new(origin, msg_type, value);
    for hop in hops {
        let hop = NodeId::new(hop).with_context(|| format!("Hop id {} must be 1-99", hop))?;
        if !frame.append_hop(hop) {
            bail!("Hop trace is full");
        }
    }

    let wire = match iv {
        Some(iv) => codec.encode_with_iv(&frame, iv),
        None => codec.encode(&frame, &mut rand::thread_rng()),
    };

    println!("{}", hex::encode(wire.as_bytes()));
    info!(frame = %hex::encode(frame.as_bytes()), "plaintext");
    Ok(())
}

fn cmd_frame_decode(wire: String, key: Option<String>) -> Result<()> {
    let bytes = hex::decode(wire.trim()).context("Invalid hex wire frame")?;
    let wire = WireFrame::from_slice(&bytes)
        .with_context(|| format!("Wire frame must be 19 bytes, got {}", bytes.len()))?;
    let codec = FrameCodec::new(parse_key(key)?);
    let frame = codec.decode(&wire);

    println!("Frame:      {}", hex::encode(frame.as_bytes()));
    println!("Origin:     {}", frame.raw_origin());
    println!("Type:       {:?}", char::from(frame.msg_type().as_byte()));
    println!("Value:      {}", frame.value());
    println!("Hops:       {:?}", frame.forwarded_via());
    println!("Terminator: {}", frame.terminator());

    match FrameValidator::default().validate(&frame) {
        Ok(()) => {
            println!("Verdict:    valid");
            println!("{}", StatusLine::new(&frame, Action::Forward).to_json());
        }
        Err(reason) => {
            println!("Verdict:    {} ({})", Action::from(reason), reason);
        }
    }
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

fn cmd_config(id: u8, check: Option<PathBuf>) -> Result<()> {
    match check {
        Some(path) => {
            let config = NodeConfig::from_file(&path)
                .with_context(|| format!("Invalid config {:?}", path))?;
            println!(
                "{:?}: ok (device {}, flood window {} ms)",
                path,
                config.device_id,
                config.flood_window().as_millis()
            );
        }
        None => {
            let config = NodeConfig::for_device(id);
            config.validate()?;
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
