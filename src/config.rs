// src/config.rs

//! Manages host configuration: loading, resolving dynamic values, and validation.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

/// Debug switch making the host return deliberately incorrect replies on one
/// command class. Used by end-to-end regression tests; counters still move
/// as if the reply were correct.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriftMode {
    #[default]
    None,
    /// Thread-route replies are offset by one (the persisted id is untouched).
    Route,
    /// `M5_FLOW_ROOM` answers `M5_FLOW_FAIL`.
    Flow,
    /// The binary response carries a lowercased payload.
    Protobuf,
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_tcp_port")]
    tcp_port: u16,
    /// `0` derives the UDP port from the TCP port at bind time.
    #[serde(default)]
    udp_port: u16,
    #[serde(default = "default_runtime_name")]
    runtime_name: String,
    #[serde(default = "default_db_path")]
    db_path: PathBuf,
    #[serde(default = "default_thread_count")]
    thread_count: u32,
    #[serde(default = "default_tick_interval_ms")]
    tick_interval_ms: u64,
    #[serde(default = "default_task_budget")]
    task_budget: usize,
    #[serde(default)]
    script_path: Option<PathBuf>,
    #[serde(default)]
    interpreter_command: String,
    #[serde(default)]
    drift_mode: DriftMode,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_tcp_port() -> u16 {
    7700
}
fn default_runtime_name() -> String {
    "sengoo".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("sengoo_data/runtime_host.db")
}
fn default_thread_count() -> u32 {
    4
}
fn default_tick_interval_ms() -> u64 {
    50
}
fn default_task_budget() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The final, validated, and resolved host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    /// `0` binds an OS-assigned port; the resolved port is written back
    /// before the readiness banner is emitted.
    pub tcp_port: u16,
    /// `0` resolves to `tcp_port + 1` once the TCP port is known.
    pub udp_port: u16,
    pub runtime_name: String,
    pub db_path: PathBuf,
    pub thread_count: u32,
    pub tick_interval_ms: u64,
    pub task_budget: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
    pub interpreter_command: String,
    pub drift_mode: DriftMode,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            tcp_port: default_tcp_port(),
            udp_port: 0,
            runtime_name: default_runtime_name(),
            db_path: default_db_path(),
            thread_count: default_thread_count(),
            tick_interval_ms: default_tick_interval_ms(),
            task_budget: default_task_budget(),
            script_path: None,
            interpreter_command: String::new(),
            drift_mode: DriftMode::None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            host: raw.host,
            tcp_port: raw.tcp_port,
            udp_port: raw.udp_port,
            runtime_name: raw.runtime_name,
            db_path: raw.db_path,
            thread_count: floored(raw.thread_count, 1, "thread_count"),
            tick_interval_ms: floored(raw.tick_interval_ms, 1, "tick_interval_ms"),
            task_budget: floored(raw.task_budget, 1, "task_budget"),
            script_path: raw.script_path,
            interpreter_command: raw.interpreter_command,
            drift_mode: raw.drift_mode,
            log_level: raw.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.runtime_name.trim().is_empty() {
            return Err(anyhow!("runtime_name cannot be empty"));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(anyhow!("db_path cannot be empty"));
        }
        if self.udp_port != 0 && self.udp_port == self.tcp_port {
            return Err(anyhow!("udp_port cannot be the same as tcp_port"));
        }
        if self.script_path.is_none() && !self.interpreter_command.trim().is_empty() {
            warn!("interpreter_command is set but script_path is not; version probing stays static");
        }
        Ok(())
    }
}

/// Clamps a numeric option to its documented floor, warning on adjustment.
fn floored<T: Ord + Copy + std::fmt::Display>(value: T, floor: T, name: &str) -> T {
    if value < floor {
        warn!("{name} below minimum ({value}); using {floor}");
        floor
    } else {
        value
    }
}
