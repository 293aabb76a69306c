use dirs::home_dir;
use std::{
    fs,
    path::{Path, PathBuf},
};

use super::{Configuration, ConfigError};

/// Read the configuration file.
pub fn read_config_file(path: &Path) -> Result<Configuration, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Configuration::from_toml_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads the configuration file at the given path.
/// A missing file is not an error, the proxy then runs with the default settings only.
/// A file that exists but can't be read or parsed is an error.
pub fn read_or_default(path: &Path) -> Result<Configuration, ConfigError> {
    let path = expand_tilde(path);
    if !path.exists() {
        tracing::warn!(
            "Configuration file '{}' could not be read. Using only default settings.",
            path.display()
        );
        return Ok(Configuration::new());
    }

    let configuration = read_config_file(&path)?;
    tracing::debug!("Using configuration from '{}'.", path.display());
    Ok(configuration)
}

/// Expands the ~ to the users home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(without_home) = path.strip_prefix("~") {
        if let Some(home) = home_dir() {
            return home.join(without_home);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_empty_configuration() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken-dns-proxy.toml");
        let configuration = read_or_default(&path).unwrap();
        assert!(!configuration.has_section("Proxy"));
    }

    #[test]
    fn reads_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken-dns-proxy.toml");
        fs::write(&path, "[Proxy]\nPort = 5353\nModifiers = \"FlagsModifier\"\n").unwrap();

        let configuration = read_or_default(&path).unwrap();
        assert_eq!(configuration.get("Proxy", "Port"), Some("5353"));
        assert_eq!(configuration.get_list("Proxy", "Modifiers"), vec!["FlagsModifier"]);
    }

    #[test]
    fn broken_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken-dns-proxy.toml");
        fs::write(&path, "this is not toml [").unwrap();

        let err = read_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        // The broken file stays untouched.
        assert_eq!(fs::read_to_string(&path).unwrap(), "this is not toml [");
    }

    #[test]
    fn expand_tilde_uses_home_dir() {
        let expanded = expand_tilde(Path::new("~/.broken-dns-proxy.toml"));
        let expected = home_dir().unwrap().join(".broken-dns-proxy.toml");
        assert_eq!(expanded, expected);

        let untouched = expand_tilde(Path::new("/etc/broken-dns-proxy.toml"));
        assert_eq!(untouched, PathBuf::from("/etc/broken-dns-proxy.toml"));
    }
}
