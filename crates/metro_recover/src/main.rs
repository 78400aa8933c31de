// Metronome WAL recovery node binary entry point.
//
// This file wires together the segment codec, the Metronome schedule, the
// gRPC WALService server, and the one-shot recovery coordinator. It also
// hosts the CLI and peer-list loading.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use metro_wal::wal::{codec, Metronome, NodeLog};
use tokio::sync::Mutex;

include!(concat!(env!("OUT_DIR"), "/volo_gen.rs"));

mod recovery;
mod rpc_service;
mod transport;

use recovery::RecoveryConfig;
use rpc_service::RpcService;

/// Process-wide state behind the RPC server.
///
/// The log is loaded once at startup and is read-only afterwards; the mutex
/// guards it against any future write path. The `recover` mode constructs
/// its own `NodeLog` and never shares this state.
pub struct NodeState {
    pub log: Mutex<NodeLog>,
}

/// CLI options for the recovery node.
#[derive(Parser, Debug)]
#[command(name = "metro-recover")]
#[command(about = "WAL recovery server and one-shot recovery client", long_about = None)]
struct Args {
    /// `server` runs the long-lived WALService endpoint; `recover` performs
    /// one recovery cycle and exits.
    #[arg(long, value_enum, default_value_t = Mode::Server)]
    mode: Mode,

    /// RPC listen port; also used to derive the self address for peer
    /// filtering.
    #[arg(long, default_value_t = 50051)]
    port: u16,

    /// Segment directory holding this node's WAL.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Newline-delimited `host:port` peer list.
    #[arg(long, default_value = "")]
    peers_file: PathBuf,

    /// Hostname or IP of this node, required for peer filtering.
    #[arg(long, default_value = "")]
    ip: String,

    /// Optional CSV file receiving one row per recovery cycle.
    #[arg(long)]
    stats_file: Option<PathBuf>,

    /// Quorum size Q of the Metronome schedule, typically N/2+1.
    #[arg(long, default_value_t = 0)]
    quorum_size: usize,

    /// This node's 1-based position in the Metronome schedule.
    #[arg(long, default_value_t = 1)]
    pid: u64,

    /// Suppress all logs.
    #[arg(long, default_value_t = false)]
    release: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Server,
    Recover,
}

#[tokio::main]
/// Parse CLI args, initialize logging, and run the requested mode.
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let filter = if args.release {
        tracing_subscriber::EnvFilter::new("off")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(filter)
        .init();

    anyhow::ensure!(!args.ip.is_empty(), "required field missing: --ip");
    anyhow::ensure!(
        !args.peers_file.as_os_str().is_empty(),
        "required field missing: --peers-file"
    );
    anyhow::ensure!(
        !args.data_dir.as_os_str().is_empty(),
        "required field missing: --data-dir"
    );

    let self_addr = format!("{}:{}", args.ip, args.port);
    let peers = read_peers_file(&args.peers_file, &self_addr)?;

    match args.mode {
        Mode::Server => run_server(&args, peers).await,
        Mode::Recover => {
            recovery::run(
                RecoveryConfig {
                    data_dir: args.data_dir,
                    stats_file: args.stats_file,
                    quorum_size: args.quorum_size,
                    pid: args.pid,
                },
                peers,
            )
            .await
        }
    }
}

/// Load the local log and serve `GetMissingEntries` until shut down.
async fn run_server(args: &Args, peers: Vec<String>) -> anyhow::Result<()> {
    let log = codec::read_node_log(&args.data_dir, codec::Snapshot::default())
        .context("read local segment log")?;
    tracing::info!(
        node = %log.node_name,
        entries = log.entries.len(),
        commit = log.state.commit,
        "serving segment log"
    );

    if args.quorum_size > 0 {
        // Log the schedule this node would recover under; useful when
        // diagnosing a later recovery run against this server.
        let metronome = Metronome::new(args.pid, peers.len() as u64 + 1, args.quorum_size);
        tracing::info!(
            nodes = peers.len() + 1,
            quorum = args.quorum_size,
            schedule_len = metronome.total_len,
            critical_len = metronome.critical_len,
            "metronome schedule"
        );
    }

    let state = Arc::new(NodeState {
        log: Mutex::new(log),
    });

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port)
        .parse()
        .context("parse listen address")?;
    tracing::info!(addr = %addr, "gRPC server listening");

    let svc = volo_gen::metro_recover::rpc::WalServiceServer::new(RpcService { state });
    let svc = volo_grpc::server::ServiceBuilder::new(svc).build::<
        volo_gen::metro_recover::rpc::WalServiceRequestRecv,
        volo_gen::metro_recover::rpc::WalServiceResponseSend,
    >();
    volo_grpc::server::Server::new()
        .add_service(svc)
        .run(volo::net::Address::from(addr))
        .await
        .map_err(|err| anyhow::anyhow!("gRPC server failed: {err}"))
}

/// Read peer addresses from a file, excluding this node's own address.
fn read_peers_file(path: &Path, self_addr: &str) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read peers file {}", path.display()))?;
    let peers: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != self_addr)
        .map(str::to_string)
        .collect();
    tracing::info!(count = peers.len(), "loaded peer list");
    Ok(peers)
}
