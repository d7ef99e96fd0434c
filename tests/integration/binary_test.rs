//! End-to-end binary fixture scenarios on both transports.

use super::test_helpers::{IO_TIMEOUT, start_host, start_host_with};
use sengoo::config::DriftMode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const CANONICAL_REQUEST: &[u8] = &[0x0a, 0x03, b'f', b'o', b'o', 0x10, 0x07, 0x18, 0x01];
const CANONICAL_RESPONSE: &[u8] = &[0x0a, 0x03, b'F', b'O', b'O', 0x10, 0x07, 0x18, 0x01];
const DRIFTED_RESPONSE: &[u8] = &[0x0a, 0x03, b'f', b'o', b'o', 0x10, 0x07, 0x18, 0x01];
// Same shape as the fixture but seq=8; the host must reject it.
const WRONG_SEQ_REQUEST: &[u8] = &[0x0a, 0x03, b'f', b'o', b'o', 0x10, 0x08, 0x18, 0x01];

async fn tcp_binary_exchange(addr: std::net::SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    // The binary path answers once and closes the connection.
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("timed out waiting for binary reply")
        .unwrap();
    response
}

#[tokio::test]
async fn test_tcp_binary_fixture_round_trip() {
    let host = start_host().await;
    let response = tcp_binary_exchange(host.tcp_addr, CANONICAL_REQUEST).await;
    assert_eq!(response, CANONICAL_RESPONSE);

    let metrics = host.metrics().await;
    assert_eq!(metrics["protobuf_request_count"], 1);
    assert_eq!(metrics["protobuf_response_count"], 1);
    assert_eq!(metrics["codec_error_count"], 0);
    host.stop().await;
}

#[tokio::test]
async fn test_tcp_binary_rejects_wrong_fixture_values() {
    let host = start_host().await;
    let response = tcp_binary_exchange(host.tcp_addr, WRONG_SEQ_REQUEST).await;
    assert!(response.is_empty(), "no reply on a rejected binary request");

    let metrics = host.metrics().await;
    assert_eq!(metrics["protobuf_request_count"], 1);
    assert_eq!(metrics["protobuf_response_count"], 0);
    assert!(metrics["codec_error_count"].as_i64().unwrap() >= 1);
    host.stop().await;
}

#[tokio::test]
async fn test_tcp_binary_drift_changes_only_payload_casing() {
    let host = start_host_with(|cfg| cfg.drift_mode = DriftMode::Protobuf).await;
    let response = tcp_binary_exchange(host.tcp_addr, CANONICAL_REQUEST).await;
    assert_eq!(response, DRIFTED_RESPONSE);
    assert_eq!(response.len(), CANONICAL_RESPONSE.len());
    host.stop().await;
}

#[tokio::test]
async fn test_udp_binary_fixture_round_trip() {
    let host = start_host().await;
    let response = host.udp_exchange(CANONICAL_REQUEST).await;
    assert_eq!(response, CANONICAL_RESPONSE);
    host.stop().await;
}

#[tokio::test]
async fn test_text_still_served_after_binary_connection() {
    let host = start_host().await;
    let _ = tcp_binary_exchange(host.tcp_addr, CANONICAL_REQUEST).await;
    // The binary exchange closed its own connection only.
    assert_eq!(host.tcp_command("M1_CONN_PING").await, "M1_CONN_PONG");
    host.stop().await;
}
