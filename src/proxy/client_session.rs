use hickory_proto::{error::ProtoError, op::Message};
use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, UdpSocket},
};

use super::framing::{encode_frame, read_frame};

/// Receive buffer size of a single UDP datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// Socket level failure while talking to a client.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Incomplete message. Expected {expected} bytes, received {received}.")]
    Incomplete { expected: usize, received: usize },

    #[error("Partial write. Sent {sent} of {expected} bytes.")]
    PartialWrite { sent: usize, expected: usize },

    #[error("No complete message within {0:?}.")]
    ReadTimeout(Duration),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// The message itself could not be handled.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("Dns message codec error: {0}")]
    Codec(#[from] ProtoError),

    #[error("Message of {0} bytes is too large for a TCP frame.")]
    Oversized(usize),
}

/// Any error of a single client exchange. The exchange is dropped, the server keeps running.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Transport error. {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error. {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<std::io::Error> for SessionError {
    fn from(value: std::io::Error) -> Self {
        Self::Transport(value.into())
    }
}

impl From<ProtoError> for SessionError {
    fn from(value: ProtoError) -> Self {
        Self::Protocol(value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "UDP"),
            Self::Tcp => write!(f, "TCP"),
        }
    }
}

#[derive(Debug)]
enum ClientTransport {
    /// Replies go through the shared listening socket.
    Udp { socket: Arc<UdpSocket> },
    /// The accepted stream, kept open for the reply.
    Tcp { stream: TcpStream },
}

/// One query from one client, and the way back to it.
#[derive(Debug)]
pub struct ClientSession {
    transport: ClientTransport,
    peer: SocketAddr,
    raw_query: Vec<u8>,
    query: Message,
}

impl ClientSession {
    /// Receives one datagram from the listening socket.
    pub async fn receive_datagram(socket: &Arc<UdpSocket>) -> Result<Self, SessionError> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let (size, peer) = socket.recv_from(&mut buffer).await?;
        buffer.truncate(size);
        tracing::trace!("Received {size} bytes over UDP from {peer}.");

        let transport = ClientTransport::Udp {
            socket: socket.clone(),
        };
        Self::decode(transport, peer, buffer)
    }

    /// Reads one length-prefixed query from an accepted stream.
    /// The stream is dropped if the frame is not complete within `read_timeout`.
    pub async fn receive_stream(
        mut stream: TcpStream,
        peer: SocketAddr,
        read_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let raw_query = tokio::time::timeout(read_timeout, read_frame(&mut stream))
            .await
            .map_err(|_| TransportError::ReadTimeout(read_timeout))??;
        tracing::trace!("Received {} bytes over TCP from {peer}.", raw_query.len());
        Self::decode(ClientTransport::Tcp { stream }, peer, raw_query)
    }

    fn decode(transport: ClientTransport, peer: SocketAddr, raw_query: Vec<u8>) -> Result<Self, SessionError> {
        let query = Message::from_vec(&raw_query)?;
        Ok(Self {
            transport,
            peer,
            raw_query,
            query,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn transport_kind(&self) -> TransportKind {
        match self.transport {
            ClientTransport::Udp { .. } => TransportKind::Udp,
            ClientTransport::Tcp { .. } => TransportKind::Tcp,
        }
    }

    /// The query exactly as the client sent it.
    pub fn raw_query(&self) -> &[u8] {
        &self.raw_query
    }

    pub fn query(&self) -> &Message {
        &self.query
    }

    pub fn query_id(&self) -> u16 {
        self.query.id()
    }

    /// Sends the reply with the ID of the query. Consumes the session.
    pub async fn send(self, mut reply: Message) -> Result<(), SessionError> {
        reply.set_id(self.query_id());
        let bytes = reply.to_vec()?;

        match self.transport {
            ClientTransport::Udp { socket } => {
                let sent = socket.send_to(&bytes, self.peer).await?;
                if sent != bytes.len() {
                    return Err(TransportError::PartialWrite {
                        sent,
                        expected: bytes.len(),
                    }
                    .into());
                }
            }
            ClientTransport::Tcp { mut stream } => {
                let frame = encode_frame(&bytes)?;
                stream.write_all(&frame).await?;
                stream.shutdown().await?;
            }
        };
        tracing::trace!("Sent {} bytes to {}.", bytes.len(), self.peer);
        Ok(())
    }
}
