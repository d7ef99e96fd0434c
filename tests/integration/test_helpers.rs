//! Shared helpers for end-to-end tests: a full host (TCP + UDP + background
//! tasks) on ephemeral ports, backed by a scratch database.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sengoo::config::Config;
use sengoo::core::state::ServerState;
use sengoo::server::{connection_loop, initialization, spawner};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestHost {
    pub state: Arc<ServerState>,
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

pub async fn start_host() -> TestHost {
    start_host_with(|_| {}).await
}

pub async fn start_host_with(f: impl FnOnce(&mut Config)) -> TestHost {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        tcp_port: 0,
        udp_port: 0,
        db_path: dir.path().join("host.db"),
        script_path: Some(dir.path().join("runtime.lua")),
        tick_interval_ms: 10,
        ..Config::default()
    };
    f(&mut config);

    let mut ctx = initialization::setup(config).await.expect("host setup failed");
    let tcp_addr = ctx.tcp_addr().unwrap();
    let udp_addr = ctx.udp_addr().unwrap();
    let state = ctx.state.clone();
    spawner::spawn_all(&mut ctx);
    let server = tokio::spawn(connection_loop::run(ctx));

    TestHost {
        state,
        tcp_addr,
        udp_addr,
        server,
        _dir: dir,
    }
}

impl TestHost {
    /// Requests a stop and waits for the full shutdown sequence.
    pub async fn stop(self) {
        self.state.request_stop();
        let _ = tokio::time::timeout(IO_TIMEOUT, self.server).await;
    }

    /// True once the server task has finished its shutdown sequence.
    pub async fn wait_for_exit(self) -> bool {
        tokio::time::timeout(IO_TIMEOUT, self.server).await.is_ok()
    }

    /// Opens one connection, then sends each command and reads its reply in
    /// order, exercising the per-connection serialization.
    pub async fn tcp_session(&self, commands: &[&str]) -> Vec<String> {
        let stream = TcpStream::connect(self.tcp_addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut replies = Vec::new();
        for command in commands {
            write_half
                .write_all(format!("{command}\n").as_bytes())
                .await
                .unwrap();
            replies.push(read_reply(&mut reader).await);
        }
        replies
    }

    pub async fn tcp_command(&self, command: &str) -> String {
        self.tcp_session(&[command]).await.remove(0)
    }

    /// Sends one datagram and returns the reply datagram.
    pub async fn udp_exchange(&self, payload: &[u8]) -> Vec<u8> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(payload, self.udp_addr).await.unwrap();
        let mut buf = vec![0u8; 64 * 1024];
        let (len, _) = tokio::time::timeout(IO_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for UDP reply")
            .unwrap();
        buf.truncate(len);
        buf
    }

    pub async fn metrics(&self) -> serde_json::Value {
        serde_json::from_str(&self.tcp_command("__METRICS__").await).unwrap()
    }
}

pub async fn read_reply<R>(reader: &mut BufReader<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    tokio::time::timeout(IO_TIMEOUT, reader.read_line(&mut line))
        .await
        .expect("timed out waiting for reply")
        .unwrap();
    line.trim_end_matches('\n').to_string()
}
