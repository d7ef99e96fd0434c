// src/core/handler.rs

//! Executes parsed text commands against the host state.
//!
//! Every command produces a single-line reply and a should-close flag. Store
//! failures are fatal only for the current command: the transactional
//! routine has already counted them, the reply degrades to `ERR_STORE`, and
//! the connection survives. Other errors (script file I/O, snapshot
//! serialization) propagate to the scheduled task wrapper, which counts them
//! as task errors.

use std::sync::Arc;

use tracing::debug;

use crate::config::DriftMode;
use crate::core::HostError;
use crate::core::commands::{TextCommand, TransportKind};
use crate::core::metrics;
use crate::core::state::ServerState;

/// Reply when a state-store write was rolled back under the current command.
pub const ERR_STORE: &str = "ERR_STORE";

/// Executes one command, returning `(reply, should_close)`.
pub async fn execute(
    state: &Arc<ServerState>,
    command: TextCommand,
    transport: TransportKind,
) -> Result<(String, bool), HostError> {
    debug!("Dispatching {} from {}", command.name(), transport.label());

    match command {
        TextCommand::ConnPing => Ok(("M1_CONN_PONG".to_string(), false)),

        TextCommand::UdpPing => Ok(("M1_UDP_PONG".to_string(), false)),

        TextCommand::RegisterFunc(name) => {
            let registered = state.with_core(|core| {
                if core.ffi.register(&name) {
                    let count = core.ffi.len() as i64;
                    core.metrics
                        .set(metrics::FFI_REGISTERED_FUNCTION_COUNT, count);
                    true
                } else {
                    core.metrics.increment(metrics::REJECTED_COMMAND_COUNT, 1);
                    false
                }
            });
            if registered {
                Ok((format!("M3_REGISTER_OK:{name}"), false))
            } else {
                Ok((format!("M3_REGISTER_FAIL:{name}"), false))
            }
        }

        TextCommand::LuaHello => {
            state.with_core(|core| {
                core.metrics.increment(metrics::FFI_SYNC_CALL_COUNT, 1);
                core.metrics.increment(metrics::LUA_HELLO_COUNT, 1);
            });
            let version = state.oracle.read_version().await;
            Ok((format!("M3_LUA_ACK:{version}"), false))
        }

        TextCommand::LuaHelloAsync => {
            state.with_core(|core| {
                core.metrics.increment(metrics::FFI_ASYNC_CALL_COUNT, 1);
                core.metrics.increment(metrics::FFI_ASYNC_INFLIGHT_COUNT, 1);
            });
            let version = state.oracle.read_version().await;
            state.with_core(|core| {
                core.metrics
                    .increment(metrics::FFI_CALLBACK_DISPATCH_COUNT, 1);
                core.metrics.increment(metrics::FFI_ASYNC_INFLIGHT_COUNT, -1);
            });
            Ok((format!("M3_LUA_ASYNC_ACK:{version}"), false))
        }

        TextCommand::HotReload => {
            state.increment(metrics::LUA_HOT_RELOAD_COUNT, 1);
            state.oracle.hot_reload()?;
            Ok(("M3_HOT_RELOAD_OK".to_string(), false))
        }

        TextCommand::SaveState(value) => {
            let result = state.with_core(|core| {
                core.metrics.increment(metrics::SAVE_STATE_COUNT, 1);
                let (metrics, store) = core.split_mut();
                store.save_state(metrics, &value)
            });
            match result {
                Ok(()) => Ok((format!("M4_SAVE_OK:{value}"), false)),
                Err(HostError::Store(_)) => Ok((ERR_STORE.to_string(), false)),
                Err(e) => Err(e),
            }
        }

        TextCommand::LoadState => {
            let result = state.with_core(|core| {
                core.metrics.increment(metrics::LOAD_STATE_COUNT, 1);
                core.store.load_state()
            });
            match result {
                Ok(value) => Ok((format!("M4_LOAD_OK:{value}"), false)),
                Err(HostError::Store(_)) => Ok((ERR_STORE.to_string(), false)),
                Err(e) => Err(e),
            }
        }

        TextCommand::DeleteState => {
            let result = state.with_core(|core| {
                let (metrics, store) = core.split_mut();
                store.delete_state(metrics)
            });
            match result {
                Ok(()) => Ok(("M4_DELETE_OK".to_string(), false)),
                Err(HostError::Store(_)) => Ok((ERR_STORE.to_string(), false)),
                Err(e) => Err(e),
            }
        }

        TextCommand::DbHealth => {
            let alert = state.with_core(|core| core.metrics.db_alert_active());
            if alert {
                Ok(("M4_DB_ALERT".to_string(), false))
            } else {
                Ok(("M4_DB_HEALTHY".to_string(), false))
            }
        }

        TextCommand::RouteThread(room_key) => {
            // The true id is computed and persisted inside the critical
            // section; route drift offsets only the displayed value.
            let result = state.with_core(|core| {
                core.metrics.increment(metrics::ROUTE_LOOKUP_COUNT, 1);
                let (metrics, store) = core.split_mut();
                store.route_thread(metrics, &room_key)
            });
            match result {
                Ok(mut thread_id) => {
                    if state.config.drift_mode == DriftMode::Route {
                        thread_id += 1;
                    }
                    Ok((format!("M4_ROUTE_OK:thread-{thread_id}"), false))
                }
                Err(HostError::Store(_)) => Ok((ERR_STORE.to_string(), false)),
                Err(e) => Err(e),
            }
        }

        TextCommand::FlowRoom => {
            state.increment(metrics::SCENARIO_FLOW_COUNT, 1);
            if state.config.drift_mode == DriftMode::Flow {
                Ok(("M5_FLOW_FAIL".to_string(), false))
            } else {
                Ok(("M5_FLOW_OK".to_string(), false))
            }
        }

        TextCommand::Stability => {
            state.increment(metrics::STABILITY_PING_COUNT, 1);
            Ok(("M6_OK".to_string(), false))
        }

        TextCommand::Metrics => {
            let snapshot = state.snapshot()?;
            Ok((snapshot.to_json()?, false))
        }

        TextCommand::Stop => {
            state.request_stop();
            Ok(("__STOP_OK__".to_string(), true))
        }

        TextCommand::Unknown(raw) => {
            debug!("Unknown command: {raw:?}");
            state.increment(metrics::REJECTED_COMMAND_COUNT, 1);
            Ok((format!("ERR_UNKNOWN_{}", transport.label()), false))
        }
    }
}
