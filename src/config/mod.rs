mod config_file;
mod configuration;
mod proxy_settings;

use std::path::PathBuf;

pub use config_file::read_or_default;
pub use configuration::{parse_bool_like, Configuration};
pub use proxy_settings::{ProxySettings, PROXY_DEFAULTS, PROXY_SECTION};
pub use proxy_settings::{ADDRESS, CONFIG_PATH, MODIFIERS, PORT, VERBOSE};

/// Any error that makes the configuration unusable. All of them are fatal at startup.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {}. {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}. {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Modifier '{0}' does not exist.")]
    UnknownModifier(String),

    #[error("Modifier with name '{0}' already exists.")]
    DuplicateModifier(String),

    #[error("Invalid value '{value}' for [{section}] {key}. {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("No upstream servers configured in [Proxy] UpstreamServers.")]
    NoUpstreamServers,
}
