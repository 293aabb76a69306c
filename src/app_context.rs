use std::path::{self, PathBuf};

use crate::{
    config::{
        read_or_default, ConfigError, Configuration, ProxySettings, ADDRESS, CONFIG_PATH, PORT, PROXY_DEFAULTS,
        PROXY_SECTION, VERBOSE,
    },
    modifiers::ModifierRegistry,
};

/// Values given on the command line. They always win over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub verbose: bool,
    pub config_path: PathBuf,
    pub port: Option<u16>,
    pub address: Option<String>,
}

impl CliOverrides {
    fn apply(&self, configuration: &mut Configuration) {
        let verbose = if self.verbose { "yes" } else { "no" };
        configuration.set(PROXY_SECTION, VERBOSE, verbose);
        let config_path = path::absolute(&self.config_path).unwrap_or_else(|_| self.config_path.clone());
        configuration.set(PROXY_SECTION, CONFIG_PATH, config_path.to_string_lossy().into_owned());
        if let Some(port) = self.port {
            configuration.set(PROXY_SECTION, PORT, port.to_string());
        }
        if let Some(address) = &self.address {
            configuration.set(PROXY_SECTION, ADDRESS, address.as_str());
        }
    }
}

/// Everything the proxy needs at startup.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Complete configuration including all defaults.
    pub configuration: Configuration,
    pub settings: ProxySettings,
    pub registry: ModifierRegistry,
}

impl AppContext {
    /// Reads the configuration file and layers the command line and defaults on top.
    pub fn load(cli: &CliOverrides, registry: ModifierRegistry) -> Result<Self, ConfigError> {
        let configuration = read_or_default(&cli.config_path)?;
        Self::from_configuration(configuration, cli, registry)
    }

    pub fn from_configuration(
        mut configuration: Configuration,
        cli: &CliOverrides,
        registry: ModifierRegistry,
    ) -> Result<Self, ConfigError> {
        cli.apply(&mut configuration);
        configuration.fill_defaults(PROXY_SECTION, PROXY_DEFAULTS);

        let settings = ProxySettings::from_configuration(&configuration)?;
        registry.fill_defaults(&mut configuration, &settings.modifiers)?;

        Ok(Self {
            configuration,
            settings,
            registry,
        })
    }
}
