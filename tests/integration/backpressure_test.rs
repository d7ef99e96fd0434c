//! End-to-end back-pressure scenarios: an exhausted task budget answers
//! `ERR_BACKPRESSURE` on the wire, counts the drop, and leaves the
//! transport in service.

use super::test_helpers::{TestHost, read_reply, start_host_with};
use sengoo::core::HostError;
use sengoo::core::state::spawn_dispatch;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Occupies the host's single budget permit with a unit that stays in
/// flight until released, scheduled through the same path the transports
/// schedule dispatches on.
fn hold_budget(host: &TestHost) -> (oneshot::Sender<()>, JoinHandle<Option<()>>) {
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let held = spawn_dispatch(&host.state, async move {
        release_rx.await.ok();
        Ok::<_, HostError>(())
    })
    .expect("budget permit should be available at startup");
    (release_tx, held)
}

#[tokio::test]
async fn test_tcp_backpressure_reply_on_exhausted_budget() {
    let host = start_host_with(|cfg| cfg.task_budget = 1).await;
    let (release_tx, held) = hold_budget(&host);

    // Two concurrent connections both hit the exhausted budget.
    let first = TcpStream::connect(host.tcp_addr).await.unwrap();
    let second = TcpStream::connect(host.tcp_addr).await.unwrap();
    let (read1, mut write1) = first.into_split();
    let (read2, mut write2) = second.into_split();
    let mut reader1 = BufReader::new(read1);
    let mut reader2 = BufReader::new(read2);

    write1.write_all(b"M1_CONN_PING\n").await.unwrap();
    write2.write_all(b"M1_CONN_PING\n").await.unwrap();
    assert_eq!(read_reply(&mut reader1).await, "ERR_BACKPRESSURE");
    assert_eq!(read_reply(&mut reader2).await, "ERR_BACKPRESSURE");

    // Releasing the held unit returns the permit; the same connections are
    // still open and get served.
    release_tx.send(()).unwrap();
    held.await.unwrap();
    write1.write_all(b"M1_CONN_PING\n").await.unwrap();
    assert_eq!(read_reply(&mut reader1).await, "M1_CONN_PONG");
    write2.write_all(b"M1_CONN_PING\n").await.unwrap();
    assert_eq!(read_reply(&mut reader2).await, "M1_CONN_PONG");

    let metrics = host.metrics().await;
    assert!(metrics["backpressure_drop_count"].as_i64().unwrap() >= 2);
    assert!(metrics["rejected_command_count"].as_i64().unwrap() >= 2);
    assert!(
        metrics["async_schedule_count"].as_i64().unwrap()
            >= metrics["async_complete_count"].as_i64().unwrap()
                + metrics["inflight_async_tasks"].as_i64().unwrap()
    );
    host.stop().await;
}

#[tokio::test]
async fn test_udp_backpressure_reply_on_exhausted_budget() {
    let host = start_host_with(|cfg| cfg.task_budget = 1).await;
    let (release_tx, held) = hold_budget(&host);

    // The datagram is counted as received, then dropped at the scheduler.
    let reply = host.udp_exchange(b"M1_UDP_PING\n").await;
    assert_eq!(reply, b"ERR_BACKPRESSURE\n");

    release_tx.send(()).unwrap();
    held.await.unwrap();
    let reply = host.udp_exchange(b"M1_UDP_PING\n").await;
    assert_eq!(reply, b"M1_UDP_PONG\n");

    let metrics = host.metrics().await;
    assert!(metrics["backpressure_drop_count"].as_i64().unwrap() >= 1);
    assert!(metrics["udp_rx_datagram_count"].as_i64().unwrap() >= 2);
    host.stop().await;
}
