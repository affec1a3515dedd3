use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use byteferry_core::{ErrorReason, RoomId, ServerMessage, is_valid_room_id};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conn::Connection;
use crate::server::Relay;

pub type ReceiverQueue = mpsc::UnboundedReceiver<Arc<Connection>>;

// One rendezvous session: a sender, a FIFO of pending receivers, and at most
// one active receiver. The queue's receiving half is owned exclusively by the
// sender loop; JOIN handlers only ever enqueue.
pub struct Room {
    id: RoomId,
    sender: Arc<Connection>,
    created_at: Instant,
    queue_tx: mpsc::UnboundedSender<Arc<Connection>>,
    active_receiver: Mutex<Option<Arc<Connection>>>,
    closed: CancellationToken,
    close_claimed: AtomicBool,
}

impl Room {
    pub fn new(id: RoomId, sender: Arc<Connection>) -> (Self, ReceiverQueue) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let room = Self {
            id,
            sender,
            created_at: Instant::now(),
            queue_tx,
            active_receiver: Mutex::new(None),
            closed: CancellationToken::new(),
            close_claimed: AtomicBool::new(false),
        };
        (room, queue_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &Arc<Connection> {
        &self.sender
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Returns true for exactly one caller; that caller performs the teardown.
    pub fn begin_close(&self) -> bool {
        if self.close_claimed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.closed.cancel();
        true
    }

    /// Fails once the sender loop has exited and dropped the queue.
    pub fn enqueue_receiver(&self, receiver: Arc<Connection>) -> bool {
        self.queue_tx.send(receiver).is_ok()
    }

    pub fn set_active(&self, receiver: &Arc<Connection>) {
        *self.active_receiver.lock() = Some(Arc::clone(receiver));
    }

    /// Fires the receiver's relay-done latch while it still holds the active
    /// slot, so a parked JOIN task can never observe its connection as
    /// neither active nor released.
    pub fn detach_active(&self) -> Option<Arc<Connection>> {
        let mut active = self.active_receiver.lock();
        if let Some(receiver) = active.as_ref() {
            receiver.release();
        }
        active.take()
    }

    pub fn is_active(&self, conn: &Connection) -> bool {
        self.active_receiver
            .lock()
            .as_ref()
            .is_some_and(|active| active.id() == conn.id())
    }
}

impl Relay {
    pub(crate) async fn handle_create(self: &Arc<Self>, conn: Arc<Connection>) {
        let Some((room, queue)) = self.registry.create(Arc::clone(&conn)) else {
            warn!("room capacity reached, rejecting {}", conn.id());
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: ErrorReason::TooManyRooms,
                })
                .await;
            conn.close().await;
            return;
        };
        info!("room {} created by {}", room.id(), conn.id());
        let _ = conn
            .send(&ServerMessage::RoomCreated {
                room_id: room.id().to_owned(),
            })
            .await;

        // Converts sender EOF into room closure even while the sender loop is
        // busy elsewhere; the second branch ends the task once the room is
        // gone so it never outlives the closure.
        let monitor = tokio::spawn({
            let relay = Arc::clone(self);
            let room = Arc::clone(&room);
            async move {
                tokio::select! {
                    _ = room.sender().closed().cancelled() => relay.close_room(&room).await,
                    _ = room.closed().cancelled() => {}
                }
            }
        });

        self.sender_loop(&room, queue).await;
        self.close_room(&room).await;
        let _ = monitor.await;
    }

    pub(crate) async fn handle_join(&self, conn: Arc<Connection>, room_id: &str) {
        if !is_valid_room_id(room_id) {
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: ErrorReason::RoomNotFound,
                })
                .await;
            conn.close().await;
            return;
        }
        let Some(room) = self.registry.get(room_id) else {
            debug!("{} asked for unknown room {}", conn.id(), room_id);
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: ErrorReason::RoomNotFound,
                })
                .await;
            conn.close().await;
            return;
        };

        if !conn
            .send(&ServerMessage::RoomJoined {
                room_id: room.id().to_owned(),
            })
            .await
        {
            conn.close().await;
            return;
        }

        if !room.enqueue_receiver(Arc::clone(&conn)) {
            // Sender loop already gone; same outcome as joining a closed room.
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: ErrorReason::SenderDisconnected,
                })
                .await;
            conn.close().await;
            return;
        }
        debug!("{} queued on room {}", conn.id(), room.id());

        // Parked until the sender loop releases this receiver or the room
        // closes underneath it. The active receiver is torn down without a
        // message; only receivers still waiting get the error.
        tokio::select! {
            biased;
            _ = conn.relay_done().cancelled() => {}
            _ = room.closed().cancelled() => {
                if !room.is_active(&conn) && !conn.is_released() {
                    let _ = conn
                        .send(&ServerMessage::Error {
                            reason: ErrorReason::SenderDisconnected,
                        })
                        .await;
                }
            }
        }
        conn.close().await;
    }

    async fn sender_loop(&self, room: &Arc<Room>, mut queue: ReceiverQueue) {
        let sender = Arc::clone(room.sender());
        let mut early_frames: VecDeque<Bytes> = VecDeque::new();
        loop {
            let receiver = tokio::select! {
                _ = room.closed().cancelled() => break,
                next = queue.recv() => match next {
                    Some(receiver) => receiver,
                    None => break,
                },
                // Probe the idle sender so its disconnect is noticed without
                // a receiver attached. Payload frames arriving early queue up
                // for the next pair, mirroring what the socket buffer would
                // have held, and the probe stays armed behind them.
                frame = sender.recv_frame() => match frame {
                    Some(frame) => {
                        early_frames.push_back(frame);
                        continue;
                    }
                    None => break,
                },
            };

            if room.is_closed() {
                receiver.release();
                receiver.close().await;
                break;
            }

            room.set_active(&receiver);
            info!(
                "room {}: pairing {} with sender {}",
                room.id(),
                receiver.id(),
                sender.id()
            );
            let joined = ServerMessage::PeerJoined {
                peer_id: receiver.id().to_owned(),
            };
            if !sender.send(&joined).await {
                receiver.release();
                receiver.close().await;
                break;
            }

            self.relay_pair(room, &sender, &receiver, &mut early_frames)
                .await;

            if !sender.is_closed() {
                let _ = sender
                    .send(&ServerMessage::PeerDisconnected {
                        peer_id: receiver.id().to_owned(),
                    })
                    .await;
            }
            room.detach_active();
            receiver.close().await;
            debug!("room {}: pair with {} ended", room.id(), receiver.id());

            if sender.is_closed() {
                break;
            }
        }
    }

    // Copies frames both ways until either side ends or the room closes.
    // Whichever future finishes first drops the sibling at its suspension
    // point; pending bytes stay in the transport buffers.
    async fn relay_pair(
        &self,
        room: &Room,
        sender: &Arc<Connection>,
        receiver: &Arc<Connection>,
        early_frames: &mut VecDeque<Bytes>,
    ) {
        while let Some(frame) = early_frames.pop_front() {
            if !receiver.forward_frame(frame).await {
                return;
            }
        }
        tokio::select! {
            _ = forward(sender, receiver) => {}
            _ = forward(receiver, sender) => {}
            _ = room.closed().cancelled() => {}
        }
    }

    pub(crate) async fn close_room(&self, room: &Arc<Room>) {
        if !room.begin_close() {
            return;
        }
        info!("room {} closed", room.id());
        self.registry.remove(room.id());
        if let Some(receiver) = room.detach_active() {
            receiver.close().await;
        }
        room.sender().close().await;
    }
}

async fn forward(src: &Connection, dst: &Connection) {
    while let Some(frame) = src.recv_frame().await {
        if !dst.forward_frame(frame).await {
            break;
        }
    }
}
