//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable carrying the telemetry connection string.
pub const ENV_CONNECTION_STRING: &str = "APPINSIGHTS_CONNECTIONSTRING";
/// Environment variable overriding the listener port.
pub const ENV_PORT: &str = "PORT";

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

/// Parse a TOML document without validating it.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load a TOML file, apply environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    load(Some(path), None)
}

/// Defaults plus environment overrides, validated.
pub fn load_from_env() -> Result<ServiceConfig, ConfigError> {
    load(None, None)
}

/// Load `path` (or defaults), apply environment overrides and then the
/// command-line `bind` address, and validate the result.
pub fn load(path: Option<&Path>, bind: Option<String>) -> Result<ServiceConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => ServiceConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    if let Some(bind) = bind {
        config.listener.bind_address = bind;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `PORT` and the connection string variable through `lookup`.
pub fn apply_env_overrides(config: &mut ServiceConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(conn) = lookup(ENV_CONNECTION_STRING).filter(|v| !v.trim().is_empty()) {
        config.telemetry.connection_string = Some(conn);
    }

    if let Some(port) = lookup(ENV_PORT) {
        match port.trim().parse::<u16>() {
            Ok(port) => {
                let host = config
                    .listener
                    .bind_address
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| "0.0.0.0".to_string());
                config.listener.bind_address = format!("{}:{}", host, port);
            }
            Err(_) => tracing::warn!(value = %port, "Ignoring invalid PORT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config(
            r#"
            [telemetry]
            role_name = "pizza-api"
            batch_size = 10

            [upstream]
            url = "http://inventory:3000/health"
            "#,
        )
        .unwrap();
        assert_eq!(config.telemetry.role_name, "pizza-api");
        assert_eq!(config.telemetry.batch_size, 10);
        assert_eq!(config.telemetry.buffer_capacity, 10_000);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.upstream.url.as_deref(), Some("http://inventory:3000/health"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_PORT, "3001"),
            (ENV_CONNECTION_STRING, "InstrumentationKey=abc"),
        ]
        .into_iter()
        .collect();

        let mut config = ServiceConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.listener.bind_address, "0.0.0.0:3001");
        assert_eq!(config.telemetry.connection_string.as_deref(), Some("InstrumentationKey=abc"));
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = ServiceConfig::default();
        apply_env_overrides(&mut config, |k| (k == ENV_PORT).then(|| "eighty".to_string()));
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_load_config_reports_validation() {
        let path = std::env::temp_dir().join(format!("request-telemetry-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[telemetry]\nbatch_size = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telemetry.batch_size must be greater than zero"));
    }

    #[test]
    fn test_bind_override_is_validated() {
        let config = load(None, Some("localhost:9090".to_string())).unwrap();
        assert_eq!(config.listener.bind_address, "localhost:9090");

        let err = load(None, Some("nowhere".to_string())).unwrap_err();
        assert!(err.to_string().contains("invalid listener.bind_address 'nowhere'"));
    }
}
