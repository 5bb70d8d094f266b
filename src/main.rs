//! Streaming chat relay for a local Ollama backend
//!
//! (c) tokio-ollama-relay authors 2025

use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio_ollama_relay::api::{self, AppState};
use tokio_ollama_relay::config::RelayConfig;
use tokio_ollama_relay::infrastructure::ollama::OllamaClient;
use tokio_ollama_relay::tunnel;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Listen on the loopback interface only
    Local,
    /// Listen on all interfaces
    Lan,
    /// Expose the server through an ngrok endpoint (needs NGROK_AUTHTOKEN)
    Ngrok,
}

#[derive(Debug, Parser)]
#[command(about = "Relays WebSocket chat messages to an Ollama backend")]
struct Args {
    #[arg(value_enum, default_value_t = Mode::Local)]
    mode: Mode,

    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    check_ollama();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(web_server_task(args))
}

async fn web_server_task(args: Args) -> anyhow::Result<()> {
    let config = Arc::new(RelayConfig::from_env());
    info!(
        "relaying to {} (model {}, window {})",
        config.upstream_url, config.model, config.window_size
    );

    let backend = Arc::new(OllamaClient::new(config.clone()));
    let app = api::app(AppState::new(backend, config));

    let bind_ip = match args.mode {
        Mode::Local => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Mode::Lan => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        Mode::Ngrok => {
            info!("Exposing server via ngrok...");
            tunnel::serve(app).await?;
            info!("Shutting down...");
            return Ok(());
        }
    };
    let listener = tokio::net::TcpListener::bind((bind_ip, args.port))
        .await
        .with_context(|| format!("failed to bind {bind_ip}:{}", args.port))?;

    if bind_ip.is_loopback() {
        info!("Local server running at http://localhost:{}", args.port);
    } else {
        info!("LAN server running at http://{}:{}", lan_ip(), args.port);
    }

    axum::serve(listener, app).await?;
    info!("Shutting down...");
    Ok(())
}

/// Address other machines on the LAN can reach us at. Connecting a UDP socket sends nothing, it
/// only selects the outbound interface.
fn lan_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn check_ollama() {
    let binary = if cfg!(windows) { "ollama.exe" } else { "ollama" };
    let found = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false);

    if found {
        info!("Ollama found.");
        return;
    }

    warn!("Ollama is not installed or not in your PATH.");
    if cfg!(target_os = "windows") {
        warn!("Download: https://ollama.com/download/windows");
    } else if cfg!(target_os = "macos") {
        warn!("Download: https://ollama.com/download/mac");
    } else {
        warn!("Run: curl -fsSL https://ollama.com/install.sh | sh");
    }
}
