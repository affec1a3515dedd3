use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("zero-length frame")]
    EmptyFrame,
    #[error("peer closed the stream")]
    Closed,
}

fn frame_codec(max_msg_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_type::<u32>()
        .max_frame_length(max_msg_size)
        .new_codec()
}

pub enum FrameReader {
    Tcp(FramedRead<OwnedReadHalf, LengthDelimitedCodec>),
    Ws {
        stream: SplitStream<WebSocket>,
        max_msg_size: usize,
    },
}

pub enum FrameWriter {
    Tcp(FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>),
    Ws(SplitSink<WebSocket, WsMessage>),
}

pub fn split_tcp(stream: TcpStream, max_msg_size: usize) -> (FrameReader, FrameWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        FrameReader::Tcp(FramedRead::new(read_half, frame_codec(max_msg_size))),
        FrameWriter::Tcp(FramedWrite::new(write_half, frame_codec(max_msg_size))),
    )
}

pub fn split_ws(socket: WebSocket, max_msg_size: usize) -> (FrameReader, FrameWriter) {
    let (sink, stream) = socket.split();
    (
        FrameReader::Ws {
            stream,
            max_msg_size,
        },
        FrameWriter::Ws(sink),
    )
}

impl FrameReader {
    pub async fn next_frame(&mut self) -> Result<Bytes, TransportError> {
        match self {
            Self::Tcp(framed) => match framed.next().await {
                Some(Ok(frame)) if frame.is_empty() => Err(TransportError::EmptyFrame),
                Some(Ok(frame)) => Ok(frame.freeze()),
                Some(Err(err)) => Err(err.into()),
                None => Err(TransportError::Closed),
            },
            Self::Ws {
                stream,
                max_msg_size,
            } => loop {
                let message = match stream.next().await {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => return Err(err.into()),
                    None => return Err(TransportError::Closed),
                };
                let frame = match message {
                    WsMessage::Binary(data) => data,
                    WsMessage::Text(text) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                    WsMessage::Close(_) => return Err(TransportError::Closed),
                };
                if frame.is_empty() {
                    return Err(TransportError::EmptyFrame);
                }
                if frame.len() > *max_msg_size {
                    return Err(TransportError::FrameTooLarge {
                        limit: *max_msg_size,
                    });
                }
                return Ok(frame);
            },
        }
    }
}

impl FrameWriter {
    pub async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        match self {
            Self::Tcp(framed) => framed.send(frame).await.map_err(TransportError::from),
            Self::Ws(sink) => sink
                .send(WsMessage::Binary(frame))
                .await
                .map_err(TransportError::from),
        }
    }

    pub async fn shutdown(&mut self) {
        match self {
            Self::Tcp(framed) => {
                let _ = framed.get_mut().shutdown().await;
            }
            Self::Ws(sink) => {
                let _ = sink.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        (accepted.unwrap().0, connected.unwrap())
    }

    #[tokio::test]
    async fn tcp_frame_roundtrip() {
        let (server, client) = tcp_pair().await;
        let (mut server_reader, _server_writer) = split_tcp(server, 1024);
        let (_client_reader, mut client_writer) = split_tcp(client, 1024);

        client_writer
            .send_frame(Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let frame = server_reader.next_frame().await.unwrap();
        assert_eq!(&frame[..], b"hello");
    }

    #[tokio::test]
    async fn tcp_prefix_is_big_endian() {
        let (server, mut client) = tcp_pair().await;
        let (mut server_reader, _server_writer) = split_tcp(server, 1024);

        client.write_all(&[0, 0, 0, 2, 0xAB, 0xCD]).await.unwrap();
        let frame = server_reader.next_frame().await.unwrap();
        assert_eq!(&frame[..], &[0xAB, 0xCD]);
    }

    #[tokio::test]
    async fn tcp_zero_length_frame_is_rejected() {
        let (server, mut client) = tcp_pair().await;
        let (mut server_reader, _server_writer) = split_tcp(server, 1024);

        client.write_all(&[0, 0, 0, 0]).await.unwrap();
        assert!(matches!(
            server_reader.next_frame().await,
            Err(TransportError::EmptyFrame)
        ));
    }

    #[tokio::test]
    async fn tcp_oversized_frame_is_rejected() {
        let (server, mut client) = tcp_pair().await;
        let (mut server_reader, _server_writer) = split_tcp(server, 16);

        client.write_all(&[0, 0, 0, 17]).await.unwrap();
        client.write_all(&[0_u8; 17]).await.unwrap();
        assert!(server_reader.next_frame().await.is_err());
    }

    #[tokio::test]
    async fn tcp_eof_ends_the_stream() {
        let (server, client) = tcp_pair().await;
        let (mut server_reader, _server_writer) = split_tcp(server, 1024);

        drop(client);
        assert!(matches!(
            server_reader.next_frame().await,
            Err(TransportError::Closed)
        ));
    }
}
