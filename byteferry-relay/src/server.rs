use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use byteferry_core::{ClientRequest, ErrorReason, ServerMessage, decode_request};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::conn::Connection;
use crate::rate_limit::RateLimiter;
use crate::registry::RoomRegistry;
use crate::transport;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct Relay {
    pub(crate) cfg: RelayConfig,
    pub(crate) registry: RoomRegistry,
    limiter: RateLimiter,
}

impl Relay {
    #[must_use]
    pub fn new(cfg: RelayConfig) -> Self {
        let registry = RoomRegistry::new(cfg.max_rooms, cfg.ttl());
        let limiter = RateLimiter::new(cfg.rate_window(), cfg.rate_limit_max);
        Self {
            cfg,
            registry,
            limiter,
        }
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.registry.len()
    }

    /// Runs both listeners plus the TTL sweeper until one listener fails.
    pub async fn serve(
        self: Arc<Self>,
        tcp_listener: TcpListener,
        ws_listener: TcpListener,
    ) -> io::Result<()> {
        let tcp_addr = tcp_listener.local_addr()?;
        let ws_addr = ws_listener.local_addr()?;
        info!("relay listening on {} (tcp) and {} (ws)", tcp_addr, ws_addr);

        tokio::spawn(sweep_loop(Arc::clone(&self)));

        let router = build_router(Arc::clone(&self));
        let ws_server =
            axum::serve(ws_listener, router.into_make_service_with_connect_info::<SocketAddr>());

        tokio::select! {
            result = self.accept_tcp(tcp_listener) => result,
            result = async move { ws_server.await } => result,
        }
    }

    async fn accept_tcp(self: &Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let relay = Arc::clone(self);
            tokio::spawn(async move {
                let (reader, writer) = transport::split_tcp(stream, relay.cfg.max_msg_size);
                let conn = Arc::new(Connection::new(
                    reader,
                    writer,
                    peer_addr.ip(),
                    relay.cfg.max_msg_size,
                ));
                relay.handle_connection(conn).await;
            });
        }
    }

    /// Admission and dispatch for one connection, regardless of transport.
    pub(crate) async fn handle_connection(self: &Arc<Self>, conn: Arc<Connection>) {
        debug!("{} connected from {}", conn.id(), conn.peer_ip());
        if !self.limiter.try_admit(conn.peer_ip()) {
            warn!("rate limited {} from {}", conn.id(), conn.peer_ip());
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: ErrorReason::RateLimited,
                })
                .await;
            conn.close().await;
            return;
        }

        let Some(frame) = conn.recv_frame().await else {
            conn.close().await;
            return;
        };
        match decode_request(&frame) {
            Ok(ClientRequest::CreateRoom) => self.handle_create(conn).await,
            Ok(ClientRequest::JoinRoom { room_id }) => self.handle_join(conn, &room_id).await,
            Err(err) => {
                debug!("{} sent an invalid request: {}", conn.id(), err);
                let _ = conn
                    .send(&ServerMessage::Error {
                        reason: ErrorReason::InvalidRequest,
                    })
                    .await;
                conn.close().await;
            }
        }
    }

    /// One sweep pass: snapshot under the registry lock, close outside it.
    pub async fn sweep_once(&self) {
        for room in self.registry.expired() {
            info!("room {} expired after {:?}", room.id(), room.age());
            self.close_room(&room).await;
        }
    }
}

pub fn build_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(relay)
}

async fn healthz_handler(State(relay): State<Arc<Relay>>) -> impl IntoResponse {
    Json(serde_json::json!({"ok": true, "rooms": relay.room_count()}))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(relay): State<Arc<Relay>>,
) -> impl IntoResponse {
    let max_msg_size = relay.cfg.max_msg_size;
    ws.max_frame_size(max_msg_size)
        .max_message_size(max_msg_size)
        .on_upgrade(move |socket| async move {
            let (reader, writer) = transport::split_ws(socket, max_msg_size);
            let conn = Arc::new(Connection::new(
                reader,
                writer,
                peer_addr.ip(),
                max_msg_size,
            ));
            relay.handle_connection(conn).await;
        })
}

async fn sweep_loop(relay: Arc<Relay>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.tick().await; // skip first immediate tick
    loop {
        interval.tick().await;
        relay.sweep_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_reports_room_count() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let relay = Arc::new(Relay::new(RelayConfig::default()));
        let app = build_router(Arc::clone(&relay));

        let request = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["rooms"], 0);
    }
}
