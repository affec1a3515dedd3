use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use byteferry_core::ServerMessage;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::transport::{FrameReader, FrameWriter};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

// One admitted peer. The reader and writer halves sit behind async mutexes so
// the handler, the sender loop, and the relay forwarders can share the
// connection; the protocol guarantees their usage windows do not overlap.
pub struct Connection {
    id: String,
    peer_ip: IpAddr,
    max_msg_size: usize,
    reader: Mutex<FrameReader>,
    writer: Mutex<FrameWriter>,
    closed: CancellationToken,
    relay_done: CancellationToken,
}

impl Connection {
    pub fn new(
        reader: FrameReader,
        writer: FrameWriter,
        peer_ip: IpAddr,
        max_msg_size: usize,
    ) -> Self {
        let id = format!("conn-{}", NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            peer_ip,
            max_msg_size,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            relay_done: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn relay_done(&self) -> &CancellationToken {
        &self.relay_done
    }

    /// Fires the relay-done latch, releasing a receiver parked on its room.
    pub fn release(&self) {
        self.relay_done.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.relay_done.is_cancelled()
    }

    pub async fn send(&self, message: &ServerMessage) -> bool {
        let Ok(body) = byteferry_core::encode_message(message) else {
            return false;
        };
        if body.len() > self.max_msg_size {
            return false;
        }
        self.forward_frame(Bytes::from(body)).await
    }

    pub async fn forward_frame(&self, frame: Bytes) -> bool {
        let mut writer = self.writer.lock().await;
        match writer.send_frame(frame).await {
            Ok(()) => true,
            Err(err) => {
                trace!("send on {} failed: {}", self.id, err);
                self.closed.cancel();
                false
            }
        }
    }

    pub async fn recv_frame(&self) -> Option<Bytes> {
        let mut reader = self.reader.lock().await;
        match reader.next_frame().await {
            Ok(frame) => Some(frame),
            Err(err) => {
                trace!("recv on {} ended: {}", self.id, err);
                self.closed.cancel();
                None
            }
        }
    }

    pub async fn close(&self) {
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        writer.shutdown().await;
    }
}


#[cfg(test)]
mod tests {
    use byteferry_core::{ErrorReason, ServerMessage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::testutil::connection_pair;

    #[tokio::test]
    async fn send_writes_a_framed_json_message() {
        let (conn, mut client) = connection_pair(1024).await;

        assert!(
            conn.send(&ServerMessage::Error {
                reason: ErrorReason::RoomNotFound,
            })
            .await
        );

        let mut len_buf = [0_u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0_u8; len];
        client.read_exact(&mut body).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["type"], "ERROR");
        assert_eq!(value["reason"], "room_not_found");
    }

    #[tokio::test]
    async fn oversized_send_is_refused_without_touching_the_wire() {
        let (conn, _client) = connection_pair(8).await;
        assert!(
            !conn
                .send(&ServerMessage::RoomCreated {
                    room_id: "abc123".to_owned(),
                })
                .await
        );
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn recv_failure_fires_the_closed_latch() {
        let (conn, mut client) = connection_pair(1024).await;
        assert!(!conn.is_closed());

        client.shutdown().await.unwrap();
        assert!(conn.recv_frame().await.is_none());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn release_is_idempotent_and_observable() {
        let (conn, _client) = connection_pair(1024).await;
        assert!(!conn.is_released());
        conn.release();
        conn.release();
        assert!(conn.is_released());
        conn.relay_done().cancelled().await;
    }

    #[tokio::test]
    async fn connection_ids_are_unique() {
        let (a, _ca) = connection_pair(64).await;
        let (b, _cb) = connection_pair(64).await;
        assert_ne!(a.id(), b.id());
    }
}
