//! Listeners, client exchanges and upstream forwarding.

mod client_session;
mod framing;
mod server;
mod socket_builder;
mod upstream;

pub use server::ProxyServer;
