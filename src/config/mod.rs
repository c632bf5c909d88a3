//! Configuration module - environment variable parsing

use std::env;

use crate::util::time::SIMULATION_TPS;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Human-chosen lobby name scoping which replicas converge together
    pub lobby_name: String,
    /// Signaling endpoint used for the initial peer rendezvous
    pub signaling_url: String,
    /// Display name advertised to peers
    pub username: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Simulation ticks per second
    pub tick_rate: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            lobby_name: env::var("LOBBY_NAME").unwrap_or_else(|_| "iceworld".to_string()),
            signaling_url: env::var("SIGNALING_URL")
                .unwrap_or_else(|_| "ws://localhost:4444".to_string()),
            username: env::var("PLAYER_NAME").unwrap_or_else(|_| "penguin".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tick_rate: parse_tick_rate(env::var("TICK_RATE").ok())?,
        })
    }
}

fn parse_tick_rate(raw: Option<String>) -> Result<u32, ConfigError> {
    match raw {
        None => Ok(SIMULATION_TPS),
        Some(raw) => match raw.parse::<u32>() {
            Ok(rate) if rate > 0 => Ok(rate),
            _ => Err(ConfigError::InvalidTickRate(raw)),
        },
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid tick rate: {0}")]
    InvalidTickRate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_rate_defaults_and_validates() {
        assert_eq!(parse_tick_rate(None).unwrap(), SIMULATION_TPS);
        assert_eq!(parse_tick_rate(Some("60".into())).unwrap(), 60);
        assert!(parse_tick_rate(Some("0".into())).is_err());
        assert!(parse_tick_rate(Some("fast".into())).is_err());
    }
}
