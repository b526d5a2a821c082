//! ASCII broadcast server
//!
//! Run with: cargo run --example broadcast_server [BIND_ADDR] [RECORDINGS_DIR]
//!
//! Examples:
//!   cargo run --example broadcast_server                  # binds to 0.0.0.0:8080
//!   cargo run --example broadcast_server localhost:9000   # binds to 127.0.0.1:9000
//!
//! Frames come from a synthetic test pattern. Set `ASCII_STREAM_API_KEY` to
//! use a fixed key; otherwise a random one is printed at startup.
//!
//! ## Controlling the stream
//!
//! Connect to `ws://localhost:8080/stream` and send:
//!
//! ```text
//! {"type":"auth","api_key":"<key>","role":"controller"}
//! {"type":"config","camera_index":0,"resolution":"120x90","fps":10}
//! {"type":"record_start"}
//! ```
//!
//! Viewers authenticate with `"role":"viewer"` and receive every frame.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use ascii_stream_rs::capture::{AsciiRenderer, TestPatternDevice};
use ascii_stream_rs::registry::DEFAULT_RECORDINGS_DIR;
use ascii_stream_rs::server::{API_KEY_ENV, DEFAULT_PORT};
use ascii_stream_rs::{ApiKey, BroadcastHub, HubConfig, ServerConfig, StreamServer};

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:8080
/// - "127.0.0.1:9000" -> 127.0.0.1:9000
/// - "0.0.0.0" -> 0.0.0.0:8080
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: broadcast_server [BIND_ADDR] [RECORDINGS_DIR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR       Address to bind to (default: 0.0.0.0:{})", DEFAULT_PORT);
    eprintln!("  RECORDINGS_DIR  Where recordings are written (default: {})", DEFAULT_RECORDINGS_DIR);
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  {}  Fixed API key (default: random)", API_KEY_ENV);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
    };

    let recordings_dir = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDINGS_DIR));

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ascii_stream_rs=info".parse()?)
                .add_directive("broadcast_server=info".parse()?),
        )
        .init();

    let mut config = ServerConfig::with_addr(bind_addr);
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        config = config.api_key(ApiKey::new(key));
    }

    let hub = BroadcastHub::with_config(
        Box::new(TestPatternDevice::new()),
        Box::new(AsciiRenderer::new()),
        HubConfig::default().recordings_dir(recordings_dir.clone()),
    );
    let server = StreamServer::with_hub(config, Arc::new(hub));

    println!("Starting ASCII stream server on {}", bind_addr);
    println!("API key:    {}", server.api_key());
    println!("Recordings: {}", recordings_dir.display());
    println!();
    println!("Live:     ws://{}/stream", bind_addr);
    println!("Playback: ws://{}/playback", bind_addr);
    println!();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    if let Err(e) = server.run_until(shutdown).await {
        eprintln!("Server error: {}", e);
    }

    let stats = server.hub().stats().await;
    println!(
        "Stopped: viewers={} frames={} errors={}",
        stats.viewer_count, stats.capture.frames_captured, stats.capture.capture_errors
    );

    Ok(())
}
