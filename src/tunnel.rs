//! Public exposure through an ngrok HTTP endpoint.

use anyhow::{Context, bail};
use axum::Router;
use futures_util::StreamExt;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use log::{debug, info};
use ngrok::prelude::*;

pub const AUTHTOKEN_VAR: &str = "NGROK_AUTHTOKEN";

/// Validates the ngrok authtoken read from the environment.
pub fn authtoken(value: Option<String>) -> anyhow::Result<String> {
    match value.map(|token| token.trim().to_owned()) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => bail!("{AUTHTOKEN_VAR} is empty, export it before running in ngrok mode"),
    }
}

/// Opens an ngrok HTTP endpoint and serves `app` on every connection it forwards.
///
/// Connections are served with upgrades enabled so the relay WebSocket works through the tunnel.
pub async fn serve(app: Router) -> anyhow::Result<()> {
    let token = authtoken(std::env::var(AUTHTOKEN_VAR).ok())?;

    debug!("connecting to ngrok");
    let session = ngrok::Session::builder()
        .authtoken(token)
        .connect()
        .await
        .context("failed to connect to ngrok")?;
    let tunnel = session
        .http_endpoint()
        .listen()
        .await
        .context("failed to open ngrok endpoint")?;
    info!("Ingress established at: {}", tunnel.url());

    let mut tunnel = Box::pin(tunnel);
    while let Some(conn) = tunnel.next().await {
        let conn = conn.context("ngrok tunnel failed")?;
        let service = TowerToHyperService::new(app.clone());

        tokio::spawn(async move {
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(Box::pin(conn)), service)
                .await
            {
                debug!("tunnel connection ended: {e}");
            }
        });
    }

    info!("ngrok tunnel closed");
    Ok(())
}
