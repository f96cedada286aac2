// src/config.rs
use super::error::ConfigError;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub jwt_secret: String,
    /// `sqlite:` URL, or `memory` for the in-process store.
    pub database_url: String,
    pub db_max_connections: u32,
    pub heartbeat_interval: Duration,
    // frames buffered per connection before sends to it start failing
    pub outbound_buffer: usize,
    pub handshake_timeout: Duration,
}

impl Config {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            jwt_secret: jwt_secret.into(),
            database_url: "sqlite:./data/relay.db".to_string(),
            db_max_connections: 10,
            heartbeat_interval: Duration::from_secs(20),
            outbound_buffer: 256,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Reads `JWT_SECRET` (required) and the optional `RELAY_*` / `DATABASE_URL` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingVar("JWT_SECRET"))?;
        let mut config = Self::new(secret);

        if let Ok(addr) = std::env::var("RELAY_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(n) = parse_var("RELAY_DB_MAX_CONNECTIONS")? {
            config.db_max_connections = n;
        }
        if let Some(secs) = parse_var("RELAY_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var("RELAY_OUTBOUND_BUFFER")? {
            config.outbound_buffer = n;
        }
        if let Some(secs) = parse_var("RELAY_HANDSHAKE_TIMEOUT_SECS")? {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory"
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::new("secret");
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.outbound_buffer, 256);
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn memory_url_selects_in_process_store() {
        let mut config = Config::new("secret");
        config.database_url = "memory".into();
        assert!(config.uses_memory_store());
    }

    #[test]
    fn unparsable_override_is_reported() {
        std::env::set_var("RELAY_TEST_ONLY_NUMBER", "twelve");
        let err = parse_var::<u32>("RELAY_TEST_ONLY_NUMBER").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: "RELAY_TEST_ONLY_NUMBER", .. }));
        std::env::remove_var("RELAY_TEST_ONLY_NUMBER");
        assert_eq!(parse_var::<u32>("RELAY_TEST_ONLY_NUMBER").unwrap(), None);
    }
}
