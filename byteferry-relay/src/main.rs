use std::sync::Arc;

use byteferry_relay::{Relay, RelayConfig};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = RelayConfig::parse();

    let tcp_listener = match TcpListener::bind((cfg.host.as_str(), cfg.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}:{}: {}", cfg.host, cfg.port, err);
            std::process::exit(1);
        }
    };
    let ws_listener = match TcpListener::bind((cfg.host.as_str(), cfg.ws_port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}:{}: {}", cfg.host, cfg.ws_port, err);
            std::process::exit(1);
        }
    };

    let relay = Arc::new(Relay::new(cfg));
    if let Err(err) = relay.serve(tcp_listener, ws_listener).await {
        warn!("relay server exited: {}", err);
    }
}
