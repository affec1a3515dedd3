use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ROOM_ID_LEN: usize = 6;
pub const ROOM_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub type RoomId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientRequest {
    CreateRoom,
    JoinRoom {
        // A missing key decodes as "" and fails room-id validation later,
        // so it reads as an unknown room rather than a malformed request.
        #[serde(default)]
        room_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    RoomCreated { room_id: RoomId },
    RoomJoined { room_id: RoomId },
    PeerJoined { peer_id: String },
    PeerDisconnected { peer_id: String },
    Error { reason: ErrorReason },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    RateLimited,
    TooManyRooms,
    RoomNotFound,
    SenderDisconnected,
    InvalidRequest,
}

impl ErrorReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::TooManyRooms => "too_many_rooms",
            Self::RoomNotFound => "room_not_found",
            Self::SenderDisconnected => "sender_disconnected",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid control message: {0}")]
    InvalidControl(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub fn decode_request(frame: &[u8]) -> Result<ClientRequest, ProtocolError> {
    serde_json::from_slice(frame).map_err(|err| ProtocolError::InvalidControl(err.to_string()))
}

pub fn encode_message(message: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(|err| ProtocolError::Serialization(err.to_string()))
}

pub fn generate_room_id() -> RoomId {
    let mut rng = rand::rng();
    (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.random_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect()
}

#[must_use]
pub fn is_valid_room_id(room_id: &str) -> bool {
    room_id.len() == ROOM_ID_LEN
        && room_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}
