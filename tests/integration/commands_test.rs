//! End-to-end text command scenarios over real sockets.

use super::test_helpers::{read_reply, start_host, start_host_with};
use sengoo::config::DriftMode;
use sengoo::core::store::route_id_for;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_tcp_conn_ping() {
    let host = start_host().await;
    assert_eq!(host.tcp_command("M1_CONN_PING").await, "M1_CONN_PONG");
    host.stop().await;
}

#[tokio::test]
async fn test_udp_ping() {
    let host = start_host().await;
    let reply = host.udp_exchange(b"M1_UDP_PING\n").await;
    assert_eq!(reply, b"M1_UDP_PONG\n");
    host.stop().await;
}

#[tokio::test]
async fn test_state_round_trip_and_delete() {
    let host = start_host().await;
    let replies = host
        .tcp_session(&[
            "M4_SAVE_STATE:alpha",
            "M4_LOAD_STATE",
            "M4_DELETE_STATE",
            "M4_LOAD_STATE",
        ])
        .await;
    assert_eq!(
        replies,
        vec![
            "M4_SAVE_OK:alpha",
            "M4_LOAD_OK:alpha",
            "M4_DELETE_OK",
            "M4_LOAD_OK:unset",
        ]
    );
    host.stop().await;
}

#[tokio::test]
async fn test_route_thread_is_stable_and_matches_crc() {
    let host = start_host().await;
    let replies = host
        .tcp_session(&["M4_ROUTE_THREAD:room-42", "M4_ROUTE_THREAD:room-42"])
        .await;
    let expected = format!("M4_ROUTE_OK:thread-{}", route_id_for("room-42", 4));
    assert_eq!(replies, vec![expected.clone(), expected]);
    host.stop().await;
}

#[tokio::test]
async fn test_oversize_line_keeps_connection_open() {
    let host = start_host().await;

    let stream = TcpStream::connect(host.tcp_addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut big = vec![b'A'; 4096];
    big.push(b'\n');
    write_half.write_all(&big).await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "ERR_CODEC_COMMAND_TOO_LARGE");

    // The same connection still serves commands.
    write_half.write_all(b"M1_CONN_PING\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "M1_CONN_PONG");

    let metrics = host.metrics().await;
    assert!(metrics["codec_error_count"].as_i64().unwrap() >= 1);
    host.stop().await;
}

#[tokio::test]
async fn test_unknown_command_is_transport_flavored() {
    let host = start_host().await;
    assert_eq!(host.tcp_command("BOGUS").await, "ERR_UNKNOWN_TCP");
    assert_eq!(host.udp_exchange(b"BOGUS\n").await, b"ERR_UNKNOWN_UDP\n");
    host.stop().await;
}

#[tokio::test]
async fn test_register_and_script_commands() {
    let host = start_host().await;
    let replies = host
        .tcp_session(&[
            "M3_REGISTER_FUNC:on_join",
            "M3_REGISTER_FUNC:on_join",
            "M3_LUA_HELLO",
            "M3_HOT_RELOAD",
            "M3_LUA_HELLO",
            "M3_LUA_HELLO_ASYNC",
        ])
        .await;
    assert_eq!(
        replies,
        vec![
            "M3_REGISTER_OK:on_join",
            "M3_REGISTER_FAIL:on_join",
            "M3_LUA_ACK:v0",
            "M3_HOT_RELOAD_OK",
            "M3_LUA_ACK:v1",
            "M3_LUA_ASYNC_ACK:v1",
        ]
    );
    host.stop().await;
}

#[tokio::test]
async fn test_scenario_probes_and_flow_drift() {
    let host = start_host().await;
    assert_eq!(host.tcp_command("M5_FLOW_ROOM").await, "M5_FLOW_OK");
    assert_eq!(host.tcp_command("M6_STABILITY").await, "M6_OK");
    host.stop().await;

    let drifted = start_host_with(|cfg| cfg.drift_mode = DriftMode::Flow).await;
    assert_eq!(drifted.tcp_command("M5_FLOW_ROOM").await, "M5_FLOW_FAIL");
    drifted.stop().await;
}

#[tokio::test]
async fn test_metrics_snapshot_reflects_traffic() {
    let host = start_host().await;
    host.tcp_command("M1_CONN_PING").await;
    host.udp_exchange(b"M1_UDP_PING\n").await;

    let metrics = host.metrics().await;
    assert!(metrics["tcp_rx_packet_count"].as_i64().unwrap() >= 2);
    assert!(metrics["udp_rx_datagram_count"].as_i64().unwrap() >= 1);
    assert!(metrics["accepted_connections"].as_i64().unwrap() >= 2);
    assert_eq!(metrics["runtime_name"], "sengoo");
    assert_eq!(
        metrics["tcp_port"].as_u64().unwrap(),
        u64::from(host.tcp_addr.port())
    );
    assert_eq!(
        metrics["udp_port"].as_u64().unwrap(),
        u64::from(host.udp_addr.port())
    );
    assert!(
        metrics["max_active_connections"].as_i64().unwrap()
            >= metrics["active_connections"].as_i64().unwrap()
    );
    assert!(
        metrics["async_schedule_count"].as_i64().unwrap()
            >= metrics["async_complete_count"].as_i64().unwrap()
                + metrics["inflight_async_tasks"].as_i64().unwrap()
    );
    host.stop().await;
}

#[tokio::test]
async fn test_route_persists_across_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("host.db");

    let host = start_host_with(|cfg| cfg.db_path = db_path.clone()).await;
    let first = host.tcp_command("M4_ROUTE_THREAD:lobby").await;
    host.stop().await;

    // A new process generation with the same db_path answers identically,
    // even with a different thread count.
    let host = start_host_with(|cfg| {
        cfg.db_path = db_path.clone();
        cfg.thread_count = 16;
    })
    .await;
    assert_eq!(host.tcp_command("M4_ROUTE_THREAD:lobby").await, first);
    host.stop().await;
}
