use std::{
    net::{AddrParseError, IpAddr, SocketAddr},
    time::Duration,
};

use super::{Configuration, ConfigError};

pub const PROXY_SECTION: &str = "Proxy";

// Reserved, set from the command line.
pub const VERBOSE: &str = "Verbose";
pub const CONFIG_PATH: &str = "ConfigPath";

pub const PORT: &str = "Port";
pub const ADDRESS: &str = "Address";
pub const UPSTREAM_SERVERS: &str = "UpstreamServers";
pub const MODIFIERS: &str = "Modifiers";
pub const UPSTREAM_TIMEOUT: &str = "UpstreamTimeout";

const DEFAULT_DNS_PORT: u16 = 53;

/// Compiled-in defaults of the `[Proxy]` section.
pub const PROXY_DEFAULTS: &[(&str, &str)] = &[
    (VERBOSE, "no"),
    (PORT, "53"),
    (ADDRESS, ""),
    (UPSTREAM_SERVERS, "8.8.8.8 8.8.4.4"),
    (MODIFIERS, ""),
    (UPSTREAM_TIMEOUT, "5"),
];

/// Typed view on the `[Proxy]` section.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Port for both UDP and TCP.
    pub port: u16,
    /// Listen address. Empty means the wildcard address.
    pub address: String,
    pub upstream_servers: Vec<SocketAddr>,
    /// Modifier names in chain order.
    pub modifiers: Vec<String>,
    /// How long to wait on an upstream answer.
    pub upstream_timeout: Duration,
}

impl ProxySettings {
    /// Reads the `[Proxy]` section. Missing keys fall back to `PROXY_DEFAULTS`.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self, ConfigError> {
        let mut configuration = configuration.clone();
        configuration.fill_defaults(PROXY_SECTION, PROXY_DEFAULTS);

        let port = configuration.get_parsed::<u16>(PROXY_SECTION, PORT)?.unwrap_or(DEFAULT_DNS_PORT);
        let address = configuration
            .get(PROXY_SECTION, ADDRESS)
            .unwrap_or_default()
            .trim()
            .to_string();

        let mut upstream_servers = Vec::new();
        for server in configuration.get_list(PROXY_SECTION, UPSTREAM_SERVERS) {
            let socket = parse_upstream(server).map_err(|err| ConfigError::InvalidValue {
                section: PROXY_SECTION.to_string(),
                key: UPSTREAM_SERVERS.to_string(),
                value: server.to_string(),
                reason: err.to_string(),
            })?;
            upstream_servers.push(socket);
        }
        if upstream_servers.is_empty() {
            return Err(ConfigError::NoUpstreamServers);
        }

        let modifiers = configuration
            .get_list(PROXY_SECTION, MODIFIERS)
            .into_iter()
            .map(String::from)
            .collect();

        let timeout_secs = configuration
            .get_parsed::<u64>(PROXY_SECTION, UPSTREAM_TIMEOUT)?
            .unwrap_or(5);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                section: PROXY_SECTION.to_string(),
                key: UPSTREAM_TIMEOUT.to_string(),
                value: timeout_secs.to_string(),
                reason: "Timeout must be at least one second.".to_string(),
            });
        }

        Ok(Self {
            port,
            address,
            upstream_servers,
            modifiers,
            upstream_timeout: Duration::from_secs(timeout_secs),
        })
    }

    #[cfg(test)]
    pub fn test(upstream: SocketAddr) -> Self {
        Self {
            port: 0,
            address: "127.0.0.1".to_string(),
            upstream_servers: vec![upstream],
            modifiers: vec![],
            upstream_timeout: Duration::from_secs(1),
        }
    }
}

/// Parses an upstream server. Format: `IP`, `IP:Port` or `[IPv6]:Port`. Port defaults to 53.
pub fn parse_upstream(value: &str) -> Result<SocketAddr, AddrParseError> {
    if let Ok(socket) = value.parse::<SocketAddr>() {
        return Ok(socket);
    }
    let ip: IpAddr = value.parse()?;
    Ok(SocketAddr::new(ip, DEFAULT_DNS_PORT))
}
