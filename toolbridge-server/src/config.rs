use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub pool: PoolConfig,
    pub keep_alive: KeepAliveConfig,
    pub limits: LimitsConfig,
    pub default_headers: Vec<DefaultHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Buffers retained per pool. Zero disables pooling.
    pub max_pooled_buffers: usize,
    /// Size of every byte buffer. It also bounds the request header block.
    pub request_buffer_bytes: usize,
    pub max_retained_buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub max_requests: u32,
    pub idle_timeout_secs: u64,
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultHeader {
    pub name: String,
    pub value: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            pool: PoolConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            limits: LimitsConfig::default(),
            default_headers: vec![DefaultHeader {
                name: "Server".to_string(),
                value: "toolbridge".to_string(),
            }],
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pooled_buffers: 64,
            request_buffer_bytes: 16 * 1024,
            max_retained_buffer_bytes: 1024 * 1024,
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            max_requests: 200,
            idle_timeout_secs: 30,
            drain_timeout_ms: 1000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.pool.request_buffer_bytes < 64 {
            return Err(ServerError::Config(
                "pool.request_buffer_bytes must be at least 64".to_string(),
            ));
        }
        if self.keep_alive.idle_timeout_secs == 0 {
            return Err(ServerError::Config(
                "keep_alive.idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.keep_alive.max_requests == 0 {
            return Err(ServerError::Config(
                "keep_alive.max_requests must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.host, self.listen.port)
    }
}

impl KeepAliveConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Value of the `Keep-Alive` hint sent on the first reused response.
    pub fn hint(&self) -> String {
        format!(
            "timeout={}, max={}",
            self.idle_timeout_secs, self.max_requests
        )
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::ServerConfig;
    use crate::error::ServerError;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.keep_alive.max_requests, 200);
        assert_eq!(config.keep_alive.hint(), "timeout=30, max=200");
        assert_eq!(config.listen_addr(), "127.0.0.1:0");
    }

    #[test]
    fn rejects_degenerate_buffers() {
        let mut config = ServerConfig::default();
        config.pool.request_buffer_bytes = 8;

        assert_matches!(config.validate(), Err(ServerError::Config(_)));
    }

    #[test]
    fn rejects_zero_idle_timeout() {
        let mut config = ServerConfig::default();
        config.keep_alive.idle_timeout_secs = 0;

        assert_matches!(
            config.validate(),
            Err(ServerError::Config(message)) if message.contains("idle_timeout_secs")
        );
    }

    #[test]
    fn rejects_zero_request_cap() {
        let mut config = ServerConfig::default();
        config.keep_alive.max_requests = 0;

        assert_matches!(config.validate(), Err(ServerError::Config(_)));
    }
}
