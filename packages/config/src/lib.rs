// ABOUTME: Runtime configuration for the Botyard orchestrator
// ABOUTME: Reads settings from environment variables with validated defaults

pub mod constants;

use constants::*;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 4001;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";
pub const DEFAULT_WORKSPACE_ROOT: &str = "./workspace";
pub const DEFAULT_LOG_BUFFER_LINES: usize = 1000;
pub const DEFAULT_LOG_TAIL_LINES: usize = 500;
pub const DEFAULT_READY_MARKER: &str = "Logged in as";
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONTAINER_MEMORY_MB: u64 = 512;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(String),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub workspace_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    pub log_buffer_lines: usize,
    pub log_tail_lines: usize,
    pub ready_markers: Vec<String>,
    pub stop_timeout: Duration,
    pub build_timeout: Duration,
    pub container_memory_mb: u64,
    pub stop_on_exit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            host: DEFAULT_API_HOST.to_string(),
            port: DEFAULT_API_PORT,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            log_buffer_lines: DEFAULT_LOG_BUFFER_LINES,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            ready_markers: vec![DEFAULT_READY_MARKER.to_string()],
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            build_timeout: Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS),
            container_memory_mb: DEFAULT_CONTAINER_MEMORY_MB,
            stop_on_exit: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (used by tests to avoid touching process env)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let port = match lookup(BOTYARD_API_PORT).or_else(|| lookup(PORT)) {
            Some(raw) => {
                let port = raw
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(raw.clone()))?;
                // Validate port is in valid range
                if port == 0 {
                    return Err(ConfigError::PortOutOfRange(port));
                }
                port
            }
            None => defaults.port,
        };

        let workspace_root = lookup(BOTYARD_WORKSPACE_ROOT)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_root);

        let host = lookup(BOTYARD_API_HOST)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.host);

        let cors_origin = lookup(BOTYARD_CORS_ORIGIN).unwrap_or(defaults.cors_origin);

        let log_buffer_lines = parse_positive(
            &lookup,
            BOTYARD_LOG_BUFFER_LINES,
            defaults.log_buffer_lines as u64,
        )? as usize;
        let log_tail_lines =
            parse_positive(&lookup, BOTYARD_LOG_TAIL_LINES, defaults.log_tail_lines as u64)?
                as usize;

        // Parse readiness markers from a comma-separated list
        let ready_markers = match lookup(BOTYARD_READY_MARKERS) {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.ready_markers,
        };

        let stop_timeout = Duration::from_secs(parse_positive(
            &lookup,
            BOTYARD_STOP_TIMEOUT_SECS,
            DEFAULT_STOP_TIMEOUT_SECS,
        )?);
        let build_timeout = Duration::from_secs(parse_positive(
            &lookup,
            BOTYARD_BUILD_TIMEOUT_SECS,
            DEFAULT_BUILD_TIMEOUT_SECS,
        )?);
        let container_memory_mb = parse_positive(
            &lookup,
            BOTYARD_CONTAINER_MEMORY_MB,
            DEFAULT_CONTAINER_MEMORY_MB,
        )?;

        let stop_on_exit = match lookup(BOTYARD_STOP_ON_EXIT) {
            Some(raw) => raw.trim().parse::<bool>().unwrap_or_else(|_| {
                warn!(
                    value = %raw,
                    "Invalid {} value, falling back to true", BOTYARD_STOP_ON_EXIT
                );
                true
            }),
            None => defaults.stop_on_exit,
        };

        Ok(Config {
            workspace_root,
            host,
            port,
            cors_origin,
            log_buffer_lines,
            log_tail_lines,
            ready_markers,
            stop_timeout,
            build_timeout,
            container_memory_mb,
            stop_on_exit,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.ready_markers, vec!["Logged in as".to_string()]);
        assert_eq!(config.bind_address(), "127.0.0.1:4001");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (BOTYARD_API_PORT, "8080"),
            (BOTYARD_WORKSPACE_ROOT, "/srv/bots"),
            (BOTYARD_READY_MARKERS, "Logged in as, Bot is ready ,"),
            (BOTYARD_LOG_BUFFER_LINES, "200"),
            (BOTYARD_STOP_ON_EXIT, "false"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.workspace_root, PathBuf::from("/srv/bots"));
        assert_eq!(
            config.ready_markers,
            vec!["Logged in as".to_string(), "Bot is ready".to_string()]
        );
        assert_eq!(config.log_buffer_lines, 200);
        assert!(!config.stop_on_exit);
    }

    #[test]
    fn test_legacy_port_variable() {
        let config = config_from(&[(PORT, "5000")]).unwrap();
        assert_eq!(config.port, 5000);
    }

    #[rstest]
    #[case("0")]
    #[case("not-a-port")]
    #[case("70000")]
    fn test_invalid_port(#[case] raw: &str) {
        assert!(config_from(&[(BOTYARD_API_PORT, raw)]).is_err());
    }

    #[rstest]
    #[case(BOTYARD_LOG_BUFFER_LINES, "0")]
    #[case(BOTYARD_STOP_TIMEOUT_SECS, "-1")]
    #[case(BOTYARD_CONTAINER_MEMORY_MB, "lots")]
    fn test_invalid_numeric_values(#[case] key: &'static str, #[case] raw: &str) {
        let err = config_from(&[(key, raw)]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key,
                value: raw.to_string()
            }
        );
    }
}
