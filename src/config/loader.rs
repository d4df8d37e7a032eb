//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_file_with_defaults() {
        let file = write_config("[listener]\nbind_address = \"127.0.0.1:3128\"\n");
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:3128");
        assert!(config.listener.tls.is_none());
        assert_eq!(config.timeouts.connect_secs, 10);
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn tls_ca_path_defaults_to_empty() {
        let file = write_config(
            "[listener.tls]\ncert_path = \"server.pem\"\nkey_path = \"server.key\"\n",
        );
        let config = load_config(file.path()).unwrap();
        let tls = config.listener.tls.unwrap();
        assert_eq!(tls.cert_path, "server.pem");
        assert!(tls.ca_path.is_empty());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let file = write_config("[listener\n");
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn invalid_values_are_reported_together() {
        let file = write_config(
            "[listener]\nbind_address = \"nowhere\"\nmax_connections = 0\n",
        );
        match load_config(file.path()).unwrap_err() {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other}"),
        }
    }
}
