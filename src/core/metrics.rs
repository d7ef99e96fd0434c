// src/core/metrics.rs

//! The process-wide counter table and its consistent snapshot.
//!
//! All counters live in one insertion-ordered map guarded by the shared host
//! lock (see `core::state`), so a snapshot observes every update made before
//! it acquired the lock and none made after. The snapshot is the payload of
//! the in-band `__METRICS__` command, the host's sole diagnostic channel.

use indexmap::IndexMap;
use serde::Serialize;

use crate::core::HostError;

/// Number of rolled-back write transactions after which the store alert latches.
pub const DB_ROLLBACK_ALERT_THRESHOLD: i64 = 3;

// The closed set of counter names. Unknown names are still created on first
// write, but everything the host itself touches goes through these.
pub const ACCEPTED_CONNECTIONS: &str = "accepted_connections";
pub const ACTIVE_CONNECTIONS: &str = "active_connections";
pub const MAX_ACTIVE_CONNECTIONS: &str = "max_active_connections";
pub const TCP_ACCEPT_COUNT: &str = "tcp_accept_count";
pub const TCP_RX_PACKET_COUNT: &str = "tcp_rx_packet_count";
pub const TCP_TX_PACKET_COUNT: &str = "tcp_tx_packet_count";
pub const TCP_RX_BYTES: &str = "tcp_rx_bytes";
pub const TCP_TX_BYTES: &str = "tcp_tx_bytes";
pub const UDP_RX_DATAGRAM_COUNT: &str = "udp_rx_datagram_count";
pub const UDP_TX_DATAGRAM_COUNT: &str = "udp_tx_datagram_count";
pub const UDP_RX_BYTES: &str = "udp_rx_bytes";
pub const UDP_TX_BYTES: &str = "udp_tx_bytes";
pub const REJECTED_COMMAND_COUNT: &str = "rejected_command_count";
pub const BACKPRESSURE_DROP_COUNT: &str = "backpressure_drop_count";
pub const LUA_HELLO_COUNT: &str = "lua_hello_count";
pub const LUA_HOT_RELOAD_COUNT: &str = "lua_hot_reload_count";
pub const SAVE_STATE_COUNT: &str = "save_state_count";
pub const LOAD_STATE_COUNT: &str = "load_state_count";
pub const ROUTE_LOOKUP_COUNT: &str = "route_lookup_count";
pub const PROTOBUF_REQUEST_COUNT: &str = "protobuf_request_count";
pub const PROTOBUF_RESPONSE_COUNT: &str = "protobuf_response_count";
pub const PROTOBUF_UNAVAILABLE_COUNT: &str = "protobuf_unavailable_count";
pub const CODEC_FRAME_PARSE_COUNT: &str = "codec_frame_parse_count";
pub const CODEC_FRAME_BUILD_COUNT: &str = "codec_frame_build_count";
pub const CODEC_ERROR_COUNT: &str = "codec_error_count";
pub const SCENARIO_FLOW_COUNT: &str = "scenario_flow_count";
pub const STABILITY_PING_COUNT: &str = "stability_ping_count";
pub const FFI_REGISTERED_FUNCTION_COUNT: &str = "ffi_registered_function_count";
pub const FFI_SYNC_CALL_COUNT: &str = "ffi_sync_call_count";
pub const FFI_ASYNC_CALL_COUNT: &str = "ffi_async_call_count";
pub const FFI_CALLBACK_DISPATCH_COUNT: &str = "ffi_callback_dispatch_count";
pub const FFI_ASYNC_INFLIGHT_COUNT: &str = "ffi_async_inflight_count";
pub const DB_TRANSACTION_BEGIN_COUNT: &str = "db_transaction_begin_count";
pub const DB_COMMIT_COUNT: &str = "db_commit_count";
pub const DB_ROLLBACK_COUNT: &str = "db_rollback_count";
pub const IO_POLL_COUNT: &str = "io_poll_count";
pub const TIMER_TICK_COUNT: &str = "timer_tick_count";
pub const ASYNC_SCHEDULE_COUNT: &str = "async_schedule_count";
pub const ASYNC_COMPLETE_COUNT: &str = "async_complete_count";
pub const INFLIGHT_ASYNC_TASKS: &str = "inflight_async_tasks";
pub const ERROR_COUNT: &str = "error_count";

/// All counter names in snapshot order.
pub const COUNTER_NAMES: &[&str] = &[
    ACCEPTED_CONNECTIONS,
    ACTIVE_CONNECTIONS,
    MAX_ACTIVE_CONNECTIONS,
    TCP_ACCEPT_COUNT,
    TCP_RX_PACKET_COUNT,
    TCP_TX_PACKET_COUNT,
    TCP_RX_BYTES,
    TCP_TX_BYTES,
    UDP_RX_DATAGRAM_COUNT,
    UDP_TX_DATAGRAM_COUNT,
    UDP_RX_BYTES,
    UDP_TX_BYTES,
    REJECTED_COMMAND_COUNT,
    BACKPRESSURE_DROP_COUNT,
    LUA_HELLO_COUNT,
    LUA_HOT_RELOAD_COUNT,
    SAVE_STATE_COUNT,
    LOAD_STATE_COUNT,
    ROUTE_LOOKUP_COUNT,
    PROTOBUF_REQUEST_COUNT,
    PROTOBUF_RESPONSE_COUNT,
    PROTOBUF_UNAVAILABLE_COUNT,
    CODEC_FRAME_PARSE_COUNT,
    CODEC_FRAME_BUILD_COUNT,
    CODEC_ERROR_COUNT,
    SCENARIO_FLOW_COUNT,
    STABILITY_PING_COUNT,
    FFI_REGISTERED_FUNCTION_COUNT,
    FFI_SYNC_CALL_COUNT,
    FFI_ASYNC_CALL_COUNT,
    FFI_CALLBACK_DISPATCH_COUNT,
    FFI_ASYNC_INFLIGHT_COUNT,
    DB_TRANSACTION_BEGIN_COUNT,
    DB_COMMIT_COUNT,
    DB_ROLLBACK_COUNT,
    IO_POLL_COUNT,
    TIMER_TICK_COUNT,
    ASYNC_SCHEDULE_COUNT,
    ASYNC_COMPLETE_COUNT,
    INFLIGHT_ASYNC_TASKS,
    ERROR_COUNT,
];

/// The mutable counter table. Not internally synchronized: the owner
/// (`core::state::HostCore`) serializes all access behind the shared lock.
#[derive(Debug)]
pub struct MetricsTable {
    counters: IndexMap<String, i64>,
}

impl Default for MetricsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsTable {
    /// Creates the table with every known counter present at zero.
    pub fn new() -> Self {
        let counters = COUNTER_NAMES.iter().map(|n| (n.to_string(), 0)).collect();
        Self { counters }
    }

    /// Adds `delta` to a counter, creating it on first write.
    /// `inflight_async_tasks` is the only counter allowed to move down, and
    /// it floors at zero.
    pub fn increment(&mut self, name: &str, delta: i64) {
        let entry = self.entry_mut(name);
        *entry += delta;
        if name == INFLIGHT_ASYNC_TASKS && *entry < 0 {
            *entry = 0;
        }
    }

    /// Adds a byte count to a counter, clamping negative inputs to zero.
    pub fn add_bytes(&mut self, name: &str, byte_count: i64) {
        *self.entry_mut(name) += byte_count.max(0);
    }

    /// Bumps `active_connections` by `delta` and maintains the high-water mark.
    pub fn update_active_connections(&mut self, delta: i64) {
        let current = {
            let entry = self.entry_mut(ACTIVE_CONNECTIONS);
            *entry += delta;
            *entry
        };
        let max = self.entry_mut(MAX_ACTIVE_CONNECTIONS);
        if current > *max {
            *max = current;
        }
    }

    /// Sets a counter to an absolute value (registry sizes).
    pub fn set(&mut self, name: &str, value: i64) {
        *self.entry_mut(name) = value;
    }

    pub fn get(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// True once the rollback counter has reached the alert threshold.
    pub fn db_alert_active(&self) -> bool {
        self.get(DB_ROLLBACK_COUNT) >= DB_ROLLBACK_ALERT_THRESHOLD
    }

    /// Copies the table and attaches the derived fields. The caller supplies
    /// the store-side counts so they come from the same critical section.
    pub fn snapshot(&self, derived: DerivedFields) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            thread_route_count: derived.thread_route_count,
            persisted_state_count: derived.persisted_state_count,
            db_alert_active: i64::from(self.db_alert_active()),
            uptime_ms: derived.uptime_ms,
            runtime_name: derived.runtime_name,
            tcp_port: derived.tcp_port,
            udp_port: derived.udp_port,
        }
    }

    fn entry_mut(&mut self, name: &str) -> &mut i64 {
        if !self.counters.contains_key(name) {
            self.counters.insert(name.to_string(), 0);
        }
        self.counters.get_mut(name).unwrap()
    }
}

/// Snapshot inputs that are not plain counters.
#[derive(Debug, Clone)]
pub struct DerivedFields {
    pub thread_route_count: i64,
    pub persisted_state_count: i64,
    pub uptime_ms: i64,
    pub runtime_name: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

/// A consistent, point-in-time copy of the counter table plus derived fields.
/// Serializes to the compact JSON object the `__METRICS__` command replies with.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    counters: IndexMap<String, i64>,
    pub thread_route_count: i64,
    pub persisted_state_count: i64,
    pub db_alert_active: i64,
    pub uptime_ms: i64,
    pub runtime_name: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String, HostError> {
        Ok(serde_json::to_string(self)?)
    }
}
