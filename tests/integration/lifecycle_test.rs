//! Lifecycle scenarios: in-band stop, drain, and post-shutdown behavior.

use super::test_helpers::{IO_TIMEOUT, read_reply, start_host};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_stop_command_shuts_the_host_down() {
    let host = start_host().await;

    let stream = TcpStream::connect(host.tcp_addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"__STOP__\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "__STOP_OK__");

    // The reply arrives before the connection closes, and the whole server
    // task then runs its drain sequence to completion.
    let tcp_addr = host.tcp_addr;
    assert!(host.wait_for_exit().await, "server task did not exit");
    assert!(
        TcpStream::connect(tcp_addr).await.is_err(),
        "acceptor should be closed after shutdown"
    );
}

#[tokio::test]
async fn test_transaction_counters_balance_after_traffic() {
    let host = start_host().await;
    host.tcp_session(&[
        "M4_SAVE_STATE:one",
        "M4_SAVE_STATE:two",
        "M4_DELETE_STATE",
        "M4_ROUTE_THREAD:lobby",
    ])
    .await;

    let metrics = host.metrics().await;
    assert_eq!(
        metrics["db_transaction_begin_count"],
        metrics["db_commit_count"].as_i64().unwrap() + metrics["db_rollback_count"].as_i64().unwrap()
    );
    host.stop().await;
}

#[tokio::test]
async fn test_timer_tick_advances() {
    let host = start_host().await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let metrics = host.metrics().await;
    assert!(metrics["timer_tick_count"].as_i64().unwrap() >= 1);
    assert_eq!(metrics["timer_tick_count"], metrics["io_poll_count"]);
    host.stop().await;
}

#[tokio::test]
async fn test_half_closed_text_line_still_dispatches() {
    let host = start_host().await;

    let stream = TcpStream::connect(host.tcp_addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // No trailing newline; shutting down the write side signals EOF.
    write_half.write_all(b"M1_CONN_PING").await.unwrap();
    write_half.shutdown().await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "M1_CONN_PONG");
    host.stop().await;
}

#[tokio::test]
async fn test_truncated_binary_request_closes_silently() {
    let host = start_host().await;

    let mut stream = TcpStream::connect(host.tcp_addr).await.unwrap();
    stream.write_all(&[0x0a, 0x03]).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut rest = Vec::new();
    use tokio::io::AsyncReadExt;
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut rest))
        .await
        .expect("timed out waiting for close")
        .unwrap();
    assert!(rest.is_empty());

    let metrics = host.metrics().await;
    assert!(metrics["rejected_command_count"].as_i64().unwrap() >= 1);
    host.stop().await;
}
