use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker lanes; each connection is pinned to one lane for
    /// its lifetime.
    pub num_workers: usize,
    /// Allocation size for pooled read buffers, in bytes.
    pub buffer_size: usize,
    /// The single protocol version accepted in CONNECT `accept-version`.
    pub supported_version: String,
    /// The one virtual host accepted in CONNECT `host`.
    pub valid_host: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7777,
            num_workers: 4,
            buffer_size: 8192, // 8k read buffers
            supported_version: "1.2".to_string(),
            valid_host: "stomp.cs.bgu.ac.il".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Validate configuration bounds before the server starts.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.num_workers == 0 {
            return Err("num_workers must be > 0".to_string());
        }
        if self.buffer_size == 0 {
            return Err("buffer_size must be > 0".to_string());
        }
        if self.supported_version.is_empty() {
            return Err("supported_version must not be empty".to_string());
        }
        if self.valid_host.is_empty() {
            return Err("valid_host must not be empty".to_string());
        }
        Ok(())
    }
}
