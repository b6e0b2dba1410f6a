use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{PresenceError, Result};

pub struct Config {
    pub server: ServerConfig,
    pub presence: PresenceConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

pub struct PresenceConfig {
    /// JSON file mapping participant ids to display names
    pub user_directory_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let port_raw = env::var("SERVER_PORT")
            .or_else(|_| env::var("PORT"))
            .unwrap_or_else(|_| "5000".to_string());

        let config = Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_port(&port_raw)?,
                ping_interval: parse_secs(
                    "WS_PING_INTERVAL_SECS",
                    env::var("WS_PING_INTERVAL_SECS").ok(),
                    25,
                )?,
                ping_timeout: parse_secs(
                    "WS_PING_TIMEOUT_SECS",
                    env::var("WS_PING_TIMEOUT_SECS").ok(),
                    60,
                )?,
            },
            presence: PresenceConfig {
                user_directory_path: env::var("USER_DIRECTORY_PATH")
                    .ok()
                    .filter(|path| !path.trim().is_empty()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.ping_interval.is_zero() {
            return Err(PresenceError::invalid_config("WS_PING_INTERVAL_SECS must be positive"));
        }
        if self.server.ping_timeout <= self.server.ping_interval {
            return Err(PresenceError::invalid_config(
                "WS_PING_TIMEOUT_SECS must be greater than WS_PING_INTERVAL_SECS",
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from((self.parse_host_to_ipv4(), self.server.port))
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::UNSPECIFIED;
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::LOCALHOST,
            "" | "0.0.0.0" => Ipv4Addr::UNSPECIFIED,
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::UNSPECIFIED
            }
        }
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.trim()
        .parse()
        .map_err(|_| PresenceError::invalid_config(format!("SERVER_PORT={}", raw)))
}

/// Whole seconds for `key`; an unset variable takes `default`.
fn parse_secs(key: &str, raw: Option<String>, default: u64) -> Result<Duration> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(default));
    };
    raw.trim()
        .parse()
        .map(Duration::from_secs)
        .map_err(|_| PresenceError::invalid_config(format!("{}={}", key, raw)))
}
