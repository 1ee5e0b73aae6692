//! Server configuration loaded from the environment.
//!
//! Rate limits are written as `<limit>/<window_ms>`, e.g. `EDIT_RATE_LIMIT=15/1000`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::sync::{Channel, ChannelLimit, EngineConfig, RateLimitConfig};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Configuration for the HTTP/WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: IpAddr,
    /// Port to bind
    pub port: u16,
    /// Directory served for any non-API path
    pub public_dir: PathBuf,
    /// Synchronization engine settings
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            public_dir: PathBuf::from("./public"),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("HOST") {
            config.host = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "HOST",
                value,
                reason: "expected an IP address",
            })?;
        }

        if let Some(value) = lookup("PORT") {
            config.port = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value,
                reason: "expected a port number",
            })?;
        }

        if let Some(value) = lookup("PUBLIC_DIR") {
            config.public_dir = PathBuf::from(value);
        }

        let mut rate_limits = RateLimitConfig::default();
        for (key, channel) in [
            ("EDIT_RATE_LIMIT", Channel::Edit),
            ("CURSOR_RATE_LIMIT", Channel::Cursor),
            ("OPERATION_RATE_LIMIT", Channel::Operation),
        ] {
            if let Some(value) = lookup(key) {
                rate_limits = rate_limits.with_limit(channel, parse_channel_limit(key, &value)?);
            }
        }

        if let Some(value) = lookup("RATE_LIMIT_SWEEP_INTERVAL_MS") {
            rate_limits.sweep_interval = parse_millis("RATE_LIMIT_SWEEP_INTERVAL_MS", value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT_RETENTION_MS") {
            rate_limits.retention = parse_millis("RATE_LIMIT_RETENTION_MS", value)?;
        }

        config.engine = EngineConfig::default().with_rate_limits(rate_limits);
        Ok(config)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_public_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.public_dir = dir.into();
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_channel_limit(key: &'static str, value: &str) -> Result<ChannelLimit, ConfigError> {
    let invalid = |reason| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason,
    };

    let (limit, window_ms) = value
        .split_once('/')
        .ok_or_else(|| invalid("expected <limit>/<window_ms>"))?;
    let limit: usize = limit
        .trim()
        .parse()
        .map_err(|_| invalid("limit must be a positive integer"))?;
    let window_ms: u64 = window_ms
        .trim()
        .parse()
        .map_err(|_| invalid("window must be a positive integer"))?;

    if limit == 0 || window_ms == 0 {
        return Err(invalid("limit and window must be positive"));
    }

    Ok(ChannelLimit::new(limit, Duration::from_millis(window_ms)))
}

fn parse_millis(key: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a positive number of milliseconds",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.public_dir, PathBuf::from("./public"));
        assert_eq!(
            config.engine.rate_limits.limit_for(Channel::Edit),
            ChannelLimit::per_second(15)
        );
        assert_eq!(config.engine.rate_limits.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("CURSOR_RATE_LIMIT", "60/2000"),
            ("RATE_LIMIT_RETENTION_MS", "5000"),
        ]))
        .unwrap();

        assert_eq!(config.socket_addr(), "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(
            config.engine.rate_limits.limit_for(Channel::Cursor),
            ChannelLimit::new(60, Duration::from_millis(2000))
        );
        assert_eq!(config.engine.rate_limits.retention, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));

        for bad in ["15", "0/1000", "15/0", "x/1000"] {
            let result = ServerConfig::from_lookup(lookup(&[("EDIT_RATE_LIMIT", bad)]));
            assert!(result.is_err(), "{} should be rejected", bad);
        }
    }
}
