// src/main.rs

//! The entry point for the SpinelBridge demo server.

use anyhow::Result;
use spinelbridge::config::Config;
use spinelbridge::server;
use std::env;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str = "Usage: spinelbridge [--config path] [--port N] [VALUE...]";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version") {
        println!("SpinelBridge version {VERSION}");
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    // Split flags from request values.
    let mut config_path: Option<String> = None;
    let mut port_override: Option<u16> = None;
    let mut values = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => match iter.next() {
                Some(path) => config_path = Some(path),
                None => {
                    eprintln!("--config flag requires a value\n{USAGE}");
                    std::process::exit(1);
                }
            },
            "--port" => match iter.next().map(|p| p.parse::<u16>()) {
                Some(Ok(port)) => port_override = Some(port),
                Some(Err(_)) | None => {
                    eprintln!("--port flag requires a valid port number\n{USAGE}");
                    std::process::exit(1);
                }
            },
            _ => values.push(arg),
        }
    }

    // An explicit --config must load; the default file is optional.
    let mut config = match config_path {
        Some(path) => load_config(&path),
        None if Path::new("bridge.toml").exists() => load_config("bridge.toml"),
        None => Config::default(),
    };

    if let Some(port) = port_override {
        config.backend.port = port;
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true),
        )
        .init();

    info!(
        "Starting SpinelBridge {} against backend {}:{}",
        VERSION, config.backend.host, config.backend.port
    );

    if let Err(e) = server::run(config, values).await {
        error!("Bridge runtime error: {}", e);
        return Err(e);
    }
    Ok(())
}

fn load_config(path: &str) -> Config {
    match Config::from_file(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{path}\": {e:#}");
            std::process::exit(1);
        }
    }
}
