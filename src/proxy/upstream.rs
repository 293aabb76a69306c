use hickory_proto::op::Message;
use rand::seq::SliceRandom;
use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};
use tokio::net::UdpSocket;

use super::client_session::MAX_DATAGRAM_SIZE;

/// Any error related to forwarding a query to an upstream server.
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("No upstream server configured.")]
    NoUpstream,

    #[error("Upstream timeout. No answer received from {server} within {timeout:?}.")]
    Timeout { server: SocketAddr, timeout: Duration },

    #[error("Partial write to {server}. Sent {sent} of {expected} bytes.")]
    PartialWrite {
        server: SocketAddr,
        sent: usize,
        expected: usize,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// The upstream resolvers queries are forwarded to.
#[derive(Debug, Clone)]
pub struct UpstreamPool {
    servers: Vec<SocketAddr>,
    timeout: Duration,
}

impl UpstreamPool {
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { servers, timeout }
    }

    /// Picks one server uniformly at random.
    pub fn choose(&self) -> Option<SocketAddr> {
        self.servers.choose(&mut rand::thread_rng()).copied()
    }

    /// Forwards the raw query to a random upstream and returns its first decodable reply.
    /// The reply keeps whatever ID the upstream sent.
    pub async fn forward(&self, raw_query: &[u8], query_id: u16) -> Result<Message, UpstreamError> {
        let server = self.choose().ok_or(UpstreamError::NoUpstream)?;
        tracing::debug!("Forward query id={query_id} to {server}.");

        let socket = UdpSocket::bind(ephemeral_for(&server)).await?;
        socket.connect(server).await?;
        let sent = socket.send(raw_query).await?;
        if sent != raw_query.len() {
            return Err(UpstreamError::PartialWrite {
                server,
                sent,
                expected: raw_query.len(),
            });
        }

        match tokio::time::timeout(self.timeout, Self::receive_reply(&socket, query_id)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout {
                server,
                timeout: self.timeout,
            }),
        }
    }

    async fn receive_reply(socket: &UdpSocket, query_id: u16) -> Result<Message, UpstreamError> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let size = socket.recv(&mut buffer).await?;
            let reply = match Message::from_vec(&buffer[..size]) {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::debug!("Failed to parse upstream reply. {err} Ignore.");
                    continue;
                }
            };
            if reply.id() != query_id {
                tracing::debug!("Upstream replied with id={} to query id={query_id}.", reply.id());
            }
            return Ok(reply);
        }
    }
}

/// Unspecified address of the same family as `server`, port 0.
fn ephemeral_for(server: &SocketAddr) -> SocketAddr {
    match server {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{example_query, example_reply, spawn_stub_upstream};

    #[tokio::test]
    async fn forwards_and_returns_reply() {
        let (upstream, _handle) = spawn_stub_upstream(|query| {
            let mut reply = example_reply(query.id());
            reply.set_recursion_available(true);
            vec![reply]
        })
        .await;
        let pool = UpstreamPool::new(vec![upstream], Duration::from_secs(2));

        let raw_query = example_query(0x4242).to_vec().unwrap();
        let reply = pool.forward(&raw_query, 0x4242).await.unwrap();
        assert_eq!(reply.id(), 0x4242);
        assert!(reply.recursion_available());
    }

    #[tokio::test]
    async fn keeps_mismatched_reply_id() {
        let (upstream, _handle) = spawn_stub_upstream(|query| {
            let mut stale = example_reply(query.id().wrapping_add(1));
            stale.set_authoritative(true);
            vec![stale]
        })
        .await;
        let pool = UpstreamPool::new(vec![upstream], Duration::from_secs(2));

        let raw_query = example_query(7).to_vec().unwrap();
        let reply = pool.forward(&raw_query, 7).await.unwrap();
        assert_eq!(reply.id(), 8);
        assert!(reply.authoritative());
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        let (upstream, _handle) = spawn_stub_upstream(|_| vec![]).await;
        let pool = UpstreamPool::new(vec![upstream], Duration::from_millis(200));

        let raw_query = example_query(1).to_vec().unwrap();
        let err = pool.forward(&raw_query, 1).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { server, .. } if server == upstream));
    }

    #[tokio::test]
    async fn empty_pool() {
        let pool = UpstreamPool::new(vec![], Duration::from_secs(1));
        let err = pool.forward(&[0; 12], 0).await.unwrap_err();
        assert!(matches!(err, UpstreamError::NoUpstream));
    }

    #[test]
    fn choose_returns_configured_server() {
        let servers: Vec<SocketAddr> = vec!["127.0.0.1:5300".parse().unwrap(), "127.0.0.1:5301".parse().unwrap()];
        let pool = UpstreamPool::new(servers.clone(), Duration::from_secs(1));
        for _ in 0..20 {
            assert!(servers.contains(&pool.choose().unwrap()));
        }
    }
}
