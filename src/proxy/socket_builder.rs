use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};
use tokio::net::{TcpListener, UdpSocket};

/// Pending TCP connections the kernel queues for us.
const TCP_BACKLOG: i32 = 1;

/// Any error while opening the listening sockets. All of them are fatal.
#[derive(thiserror::Error, Debug)]
pub enum BindError {
    #[error("You need to be root to bind to port {port}.")]
    Permission {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Can not bind to address '{address}'. {source}")]
    Address {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Network error while binding {address}. {source}")]
    Network {
        address: String,
        #[source]
        source: io::Error,
    },
}

fn classify(err: io::Error, address: SocketAddr) -> BindError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => BindError::Permission {
            port: address.port(),
            source: err,
        },
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::AddrInUse | io::ErrorKind::Unsupported => {
            BindError::Address {
                address: address.to_string(),
                source: err,
            }
        }
        _ if is_family_unsupported(&err) => BindError::Address {
            address: address.to_string(),
            source: err,
        },
        _ => BindError::Network {
            address: address.to_string(),
            source: err,
        },
    }
}

#[cfg(unix)]
fn is_family_unsupported(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EAFNOSUPPORT)
}

#[cfg(not(unix))]
fn is_family_unsupported(_err: &io::Error) -> bool {
    false
}

/// The host has no usable IPv6 stack.
fn is_ipv6_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::Unsupported
    ) || is_family_unsupported(err)
}

fn domain_for(address: &SocketAddr) -> Domain {
    if address.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    }
}

fn udp_socket(address: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(domain_for(&address), Type::DGRAM, Some(Protocol::UDP))?;
    if address.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn tcp_listener(address: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(domain_for(&address), Type::STREAM, Some(Protocol::TCP))?;
    if address.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.listen(TCP_BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Binds UDP first and then TCP on the port UDP got, so port 0 yields the same port for both.
fn bind_on(address: SocketAddr) -> io::Result<(UdpSocket, TcpListener)> {
    let udp = udp_socket(address)?;
    let tcp_address = SocketAddr::new(address.ip(), udp.local_addr()?.port());
    let tcp = tcp_listener(tcp_address)?;
    Ok((UdpSocket::from_std(udp)?, TcpListener::from_std(tcp)?))
}

/// Opens the UDP socket and the TCP listener on `address:port`.
///
/// An empty address binds the IPv6 wildcard in dual-stack mode and falls back to
/// `0.0.0.0` on hosts without IPv6.
pub fn bind_listeners(address: &str, port: u16) -> Result<(UdpSocket, TcpListener), BindError> {
    let address = address.trim();
    if address.is_empty() {
        let wildcard = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
        return match bind_on(wildcard) {
            Ok(listeners) => Ok(listeners),
            Err(err) if is_ipv6_missing(&err) => {
                tracing::debug!("IPv6 not available ({err}). Fall back to IPv4.");
                let wildcard = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
                bind_on(wildcard).map_err(|err| classify(err, wildcard))
            }
            Err(err) => Err(classify(err, wildcard)),
        };
    }

    let ip: IpAddr = address.parse().map_err(|err| BindError::Address {
        address: address.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, err),
    })?;
    let socket = SocketAddr::new(ip, port);
    bind_on(socket).map_err(|err| classify(err, socket))
}
