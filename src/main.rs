// src/main.rs

//! The main entry point for the sengoo runtime host.

use anyhow::Result;
use sengoo::config::Config;
use sengoo::server;
use std::env;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    // Collect command-line arguments to decide the execution mode.
    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("sengoo runtime host version {VERSION}");
        return Ok(());
    }

    // Determine the configuration path. It can be provided via a --config
    // flag; otherwise it defaults to "config.toml". A missing default file
    // falls back to built-in defaults so a bare invocation still serves.
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let mut config = match config_path {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{path}\": {e}");
                std::process::exit(1);
            }
        },
        None if std::path::Path::new("config.toml").exists() => {
            match Config::from_file("config.toml") {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("Failed to load configuration from \"config.toml\": {e}");
                    std::process::exit(1);
                }
            }
        }
        None => Config::default(),
    };

    // Override the TCP port if provided as a command-line argument.
    if let Some(port_index) = args.iter().position(|arg| arg == "--tcp-port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.tcp_port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--tcp-port flag requires a value");
            std::process::exit(1);
        }
    }

    // Setup logging. Diagnostics go to stderr: stdout carries only the
    // readiness banner, which the watchdog greps.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(false)
        .init();

    if let Err(e) = server::run(config).await {
        error!("Host runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
