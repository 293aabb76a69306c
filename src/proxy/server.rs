use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, UdpSocket},
    sync::oneshot,
    task::{JoinHandle, JoinSet},
};

use super::{
    client_session::{ClientSession, SessionError},
    socket_builder::{bind_listeners, BindError},
    upstream::{UpstreamError, UpstreamPool},
};
use crate::{config::ProxySettings, modifiers::ModificationChain};

/// Pause after a failed `accept` so a persistent error does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Why a single exchange was dropped.
#[derive(thiserror::Error, Debug)]
pub enum ExchangeError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Forward, modify, reply. Shared by every exchange.
#[derive(Debug, Clone)]
struct Relay {
    upstreams: Arc<UpstreamPool>,
    chain: Arc<ModificationChain>,
}

impl Relay {
    async fn handle(&self, session: ClientSession) -> Result<(), ExchangeError> {
        let reply = self
            .upstreams
            .forward(session.raw_query(), session.query_id())
            .await?;
        let reply = self.chain.apply(reply);
        session.send(reply).await?;
        Ok(())
    }

    async fn handle_logged(self, session: ClientSession) {
        let peer = session.peer();
        let kind = session.transport_kind();
        let id = session.query_id();
        if let Some(question) = session.query().queries().first() {
            tracing::debug!("{kind} query id={id} from {peer}: {} {}", question.name(), question.query_type());
        }
        if let Err(err) = self.handle(session).await {
            tracing::warn!("Dropped {kind} query id={id} from {peer}. {err}");
        }
    }
}

/// DNS proxy listening on UDP and TCP.
#[derive(Debug)]
pub struct ProxyServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    relay: Relay,
    /// How long a TCP client gets to send its query.
    client_timeout: Duration,
}

impl ProxyServer {
    /// Opens both listeners. Nothing is received until `start_receive_loop`.
    pub fn bind(settings: &ProxySettings, chain: ModificationChain) -> Result<Self, BindError> {
        let (udp, tcp) = bind_listeners(&settings.address, settings.port)?;
        let upstreams = UpstreamPool::new(settings.upstream_servers.clone(), settings.upstream_timeout);
        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            relay: Relay {
                upstreams: Arc::new(upstreams),
                chain: Arc::new(chain),
            },
            client_timeout: settings.upstream_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Spawns the receive loop. Every exchange runs in its own task.
    pub fn start_receive_loop(self) -> ServerHandle {
        let (tx, rx) = oneshot::channel::<()>();
        let join_handle = tokio::spawn(async move {
            let mut cancel = rx;
            let mut exchanges = JoinSet::new();
            loop {
                tokio::select! {
                    _ = &mut cancel => {
                        tracing::trace!("Stop receive loop.");
                        break;
                    }
                    result = ClientSession::receive_datagram(&self.udp) => {
                        match result {
                            Ok(session) => {
                                exchanges.spawn(self.relay.clone().handle_logged(session));
                            }
                            Err(err) => tracing::debug!("Failed to receive UDP query. {err}"),
                        }
                    }
                    result = self.tcp.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                tracing::trace!("Accepted TCP connection from {peer}.");
                                let relay = self.relay.clone();
                                let client_timeout = self.client_timeout;
                                exchanges.spawn(async move {
                                    match ClientSession::receive_stream(stream, peer, client_timeout).await {
                                        Ok(session) => relay.handle_logged(session).await,
                                        Err(err) => tracing::debug!("Failed to receive TCP query from {peer}. {err}"),
                                    }
                                });
                            }
                            Err(err) => {
                                tracing::error!("Failed to accept TCP connection. {err}");
                                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            }
                        }
                    }
                    Some(result) = exchanges.join_next() => {
                        if let Err(err) = result {
                            tracing::error!("Exchange task failed. {err}");
                        }
                    }
                }
            }
            exchanges.shutdown().await;
            tracing::debug!("Listeners closed.");
        });
        ServerHandle {
            shutdown: tx,
            join_handle,
        }
    }
}

/// Handle of a running server.
#[derive(Debug)]
pub struct ServerHandle {
    shutdown: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Stops receiving, aborts in-flight exchanges and closes the listeners.
    pub async fn stop(self) {
        if self.shutdown.send(()).is_err() {
            tracing::debug!("Receive loop already stopped.");
        }
        if let Err(err) = self.join_handle.await {
            tracing::error!("Receive loop failed. {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::framing::encode_frame;
    use crate::{
        config::{Configuration, MODIFIERS, PROXY_SECTION},
        modifiers::{FlagsModifier, ModifierRegistry},
        test_helpers::{example_query, example_reply, spawn_stub_upstream},
    };
    use hickory_proto::op::Message;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    fn aa_chain() -> ModificationChain {
        let mut configuration = Configuration::new();
        configuration.set(PROXY_SECTION, MODIFIERS, "FlagsModifier");
        configuration.set(FlagsModifier::NAME, "AA", "yes");
        ModificationChain::build(&configuration, &ModifierRegistry::builtin().unwrap()).unwrap()
    }

    /// Stub upstream answering with AA unset and RA set.
    async fn stub_upstream() -> (SocketAddr, JoinHandle<()>) {
        spawn_stub_upstream(|query| {
            let mut reply = example_reply(query.id());
            reply.set_authoritative(false);
            reply.set_recursion_available(true);
            vec![reply]
        })
        .await
    }

    fn assert_modified(reply: &Message, query_id: u16) {
        assert_eq!(reply.id(), query_id);
        assert!(reply.authoritative());
        assert!(reply.recursion_available());
        assert!(reply.recursion_desired());
        assert!(!reply.truncated());
        assert!(!reply.authentic_data());
        assert!(!reply.checking_disabled());
        assert_eq!(reply.answers().len(), 1);
    }

    #[tokio::test]
    async fn udp_end_to_end() {
        let (upstream, _stub) = stub_upstream().await;
        let server = ProxyServer::bind(&ProxySettings::test(upstream), aa_chain()).unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.start_receive_loop();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&example_query(0x5151).to_vec().unwrap(), address)
            .await
            .unwrap();
        let mut buffer = vec![0u8; 65536];
        let (size, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        let reply = Message::from_vec(&buffer[..size]).unwrap();
        assert_modified(&reply, 0x5151);

        handle.stop().await;
    }

    #[tokio::test]
    async fn tcp_end_to_end() {
        let (upstream, _stub) = stub_upstream().await;
        let server = ProxyServer::bind(&ProxySettings::test(upstream), aa_chain()).unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.start_receive_loop();

        let mut client = TcpStream::connect(address).await.unwrap();
        let frame = encode_frame(&example_query(0x6262).to_vec().unwrap()).unwrap();
        client.write_all(&frame).await.unwrap();

        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();
        let length = u16::from_be_bytes([response[0], response[1]]) as usize;
        assert_eq!(length, response.len() - 2);
        let reply = Message::from_vec(&response[2..]).unwrap();
        assert_modified(&reply, 0x6262);

        handle.stop().await;
    }

    #[tokio::test]
    async fn silent_upstream_drops_exchange_and_keeps_serving() {
        let (silent, _stub) = spawn_stub_upstream(|_| vec![]).await;
        let mut settings = ProxySettings::test(silent);
        settings.upstream_timeout = Duration::from_millis(200);
        let server = ProxyServer::bind(&settings, ModificationChain::default()).unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.start_receive_loop();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buffer = vec![0u8; 65536];
        for id in [1u16, 2] {
            client
                .send_to(&example_query(id).to_vec().unwrap(), address)
                .await
                .unwrap();
            let result = tokio::time::timeout(Duration::from_millis(600), client.recv_from(&mut buffer)).await;
            assert!(result.is_err(), "no reply expected");
        }

        // Still accepting TCP after the dropped exchanges.
        let stream = TcpStream::connect(address).await;
        assert!(stream.is_ok());

        handle.stop().await;
    }

    #[tokio::test]
    async fn short_tcp_frame_does_not_stop_server() {
        let (upstream, _stub) = stub_upstream().await;
        let server = ProxyServer::bind(&ProxySettings::test(upstream), aa_chain()).unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.start_receive_loop();

        let mut broken = TcpStream::connect(address).await.unwrap();
        broken.write_all(&[0x00, 0x40, 0x01]).await.unwrap();
        drop(broken);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&example_query(0x7373).to_vec().unwrap(), address)
            .await
            .unwrap();
        let mut buffer = vec![0u8; 65536];
        let (size, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        let reply = Message::from_vec(&buffer[..size]).unwrap();
        assert_modified(&reply, 0x7373);

        handle.stop().await;
    }

    #[tokio::test]
    async fn mismatched_upstream_id_is_corrected() {
        let (upstream, _stub) = spawn_stub_upstream(|query| {
            let mut reply = example_reply(query.id().wrapping_add(1));
            reply.set_recursion_available(true);
            vec![reply]
        })
        .await;
        let server = ProxyServer::bind(&ProxySettings::test(upstream), aa_chain()).unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.start_receive_loop();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&example_query(0x4242).to_vec().unwrap(), address)
            .await
            .unwrap();
        let mut buffer = vec![0u8; 65536];
        let (size, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        let reply = Message::from_vec(&buffer[..size]).unwrap();
        assert_modified(&reply, 0x4242);

        handle.stop().await;
    }

    #[tokio::test]
    async fn idle_tcp_client_is_disconnected() {
        let (upstream, _stub) = stub_upstream().await;
        let mut settings = ProxySettings::test(upstream);
        settings.upstream_timeout = Duration::from_millis(200);
        let server = ProxyServer::bind(&settings, ModificationChain::default()).unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.start_receive_loop();

        let mut idle = TcpStream::connect(address).await.unwrap();
        let mut response = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), idle.read_to_end(&mut response))
            .await
            .expect("proxy keeps the idle connection open");
        assert!(read.is_ok() || read.is_err_and(|err| err.kind() == io::ErrorKind::ConnectionReset));
        assert!(response.is_empty());

        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_listeners() {
        let (upstream, _stub) = stub_upstream().await;
        let server = ProxyServer::bind(&ProxySettings::test(upstream), ModificationChain::default()).unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.start_receive_loop();
        handle.stop().await;

        let result = TcpStream::connect(address).await;
        assert!(result.is_err());
    }
}
