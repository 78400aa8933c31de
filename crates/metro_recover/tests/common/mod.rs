//! Shared helpers for integration tests.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metro_wal::wal::{codec, Entry, EntryKind, HardState, NodeLog};

/// Timeout for server startup and recovery round-trips.
pub const IO_TIMEOUT: Duration = Duration::from_secs(20);

/// Simple wrapper around a spawned server process and its log paths.
pub struct ServerProcess {
    pub child: Child,
    stderr_path: PathBuf,
    stdout_path: PathBuf,
}

impl ServerProcess {
    /// Best-effort read of the captured stderr log.
    pub fn read_stderr(&self) -> String {
        std::fs::read_to_string(&self.stderr_path).unwrap_or_default()
    }

    /// Best-effort read of the captured stdout log.
    pub fn read_stdout(&self) -> String {
        std::fs::read_to_string(&self.stdout_path).unwrap_or_default()
    }

    /// Panic if the process has already exited.
    pub fn assert_running(&mut self, context: &str) {
        if let Ok(Some(status)) = self.child.try_wait() {
            let stdout = self.read_stdout();
            let stderr = self.read_stderr();
            panic!(
                "metro-recover exited early ({context}) with status {status}\nstdout:\n{stdout}\nstderr:\n{stderr}"
            );
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Build a per-test data directory under the system temp folder.
pub fn test_dir(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let pid = std::process::id();
    std::env::temp_dir()
        .join("metro-recover-tests")
        .join(format!("{name}-{pid}-{ts}"))
}

/// Best-effort cleanup of a test directory.
pub fn cleanup_dir(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

/// Reserve an ephemeral TCP port.
pub fn pick_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Wait for a TCP port to accept connections.
pub fn wait_for_port(addr: SocketAddr, timeout: Duration) {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("port {addr} did not open in time");
}

/// Locate the metro-recover binary built by cargo.
pub fn metro_recover_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_metro-recover"))
}

/// Build a log holding the given indices, with deterministic terms and
/// payloads shared by every test log so overlapping entries are identical
/// across nodes.
pub fn make_log(name: &str, indexes: &[u64], commit: u64) -> NodeLog {
    let entries = indexes
        .iter()
        .map(|&index| Entry {
            index,
            term: 1 + index / 4,
            kind: EntryKind::Normal,
            data: format!("op-{index}").into_bytes(),
        })
        .collect();
    NodeLog {
        node_name: name.to_string(),
        metadata: format!("cluster-meta-{name}").into_bytes(),
        state: HardState {
            term: 1 + commit / 4,
            vote: 1,
            commit,
        },
        entries,
    }
}

/// Persist a log into a segment directory.
pub fn write_log(dir: &Path, log: &NodeLog) {
    codec::rewrite(dir, log).expect("write segment log");
}

/// Write a newline-delimited peers file.
pub fn write_peers_file(path: &Path, peers: &[String]) {
    let body = peers.join("\n") + "\n";
    std::fs::write(path, body).expect("write peers file");
}

/// Spawn a `--mode server` process serving the given segment directory.
pub fn spawn_server(
    data_dir: &Path,
    port: u16,
    peers_file: &Path,
    quorum_size: usize,
) -> ServerProcess {
    let log_dir = data_dir.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let stdout_path = log_dir.join("server.out.log");
    let stderr_path = log_dir.join("server.err.log");
    let stdout_file = std::fs::File::create(&stdout_path).expect("open stdout log");
    let stderr_file = std::fs::File::create(&stderr_path).expect("open stderr log");

    let child = Command::new(metro_recover_bin())
        .arg("--mode")
        .arg("server")
        .arg("--port")
        .arg(port.to_string())
        .arg("--ip")
        .arg("127.0.0.1")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--peers-file")
        .arg(peers_file)
        .arg("--quorum-size")
        .arg(quorum_size.to_string())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .expect("failed to spawn metro-recover server");

    ServerProcess {
        child,
        stderr_path,
        stdout_path,
    }
}

/// Run one `--mode recover` cycle to completion and return its status.
pub fn run_recover(
    data_dir: &Path,
    port: u16,
    peers_file: &Path,
    quorum_size: usize,
    stats_file: Option<&Path>,
) -> (ExitStatus, String) {
    let mut cmd = Command::new(metro_recover_bin());
    cmd.arg("--mode")
        .arg("recover")
        .arg("--port")
        .arg(port.to_string())
        .arg("--ip")
        .arg("127.0.0.1")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--peers-file")
        .arg(peers_file)
        .arg("--quorum-size")
        .arg(quorum_size.to_string());
    if let Some(stats) = stats_file {
        cmd.arg("--stats-file").arg(stats);
    }
    let output = cmd.output().expect("failed to run metro-recover recover");
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    (output.status, stderr)
}
