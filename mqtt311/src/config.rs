//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::buffer::DEFAULT_READ_BUFFER_SIZE;
use crate::connect::{ConnectMessage, Will};
use crate::error::{Error, Result};
use crate::stream::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_WRITE_BUFFER_SIZE};
use crate::types::MAX_FIXED_HEADER_LEN;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client ID.
    pub client_id: String,
    /// Username for authentication. Ignored when empty.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<Vec<u8>>,
    /// Keep alive interval in seconds. Zero disables ping and timeout.
    pub keep_alive: u16,
    /// Clean session flag.
    pub clean_session: bool,
    /// Last will.
    pub will: Option<Will>,
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Write coalescing buffer size in bytes.
    pub write_buffer_size: usize,
    /// Largest inbound frame accepted from the broker.
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            will: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_packet_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Create a new client config.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Set credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep alive interval.
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set the last will.
    pub fn with_will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    /// Set read and write buffer sizes.
    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    /// Set the maximum inbound packet size.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Check buffer sizes.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size < MAX_FIXED_HEADER_LEN {
            return Err(Error::InvalidConfig(format!(
                "read_buffer_size must be at least {MAX_FIXED_HEADER_LEN}"
            )));
        }
        if self.write_buffer_size < MAX_FIXED_HEADER_LEN {
            return Err(Error::InvalidConfig(format!(
                "write_buffer_size must be at least {MAX_FIXED_HEADER_LEN}"
            )));
        }
        Ok(())
    }

    pub fn keep_alive_duration(&self) -> Duration {
        Duration::from_secs(self.keep_alive.into())
    }

    /// Build the CONNECT message for a new connection attempt.
    pub fn connect_message(&self) -> ConnectMessage {
        ConnectMessage {
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            will: self.will.clone(),
            keep_alive: self.keep_alive_duration(),
            clean_session: self.clean_session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("test-client");
        assert_eq!(config.client_id, "test-client");
        assert_eq!(config.keep_alive, 60);
        assert!(config.clean_session);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.write_buffer_size, 1024);
        assert!(config.username.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("c")
            .with_credentials("user", b"pass".to_vec())
            .with_keep_alive(30)
            .with_clean_session(false)
            .with_will(Will::new("status", b"offline".to_vec()));

        let msg = config.connect_message();
        assert_eq!(msg.username.as_deref(), Some("user"));
        assert_eq!(msg.password.as_deref(), Some(&b"pass"[..]));
        assert_eq!(msg.keep_alive, Duration::from_secs(30));
        assert!(!msg.clean_session);
        assert_eq!(msg.will.unwrap().topic, "status");
    }

    #[test]
    fn test_client_config_validate() {
        let config = ClientConfig::new("c").with_buffer_sizes(4, 1024);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = ClientConfig::new("c").with_buffer_sizes(1024, 2);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_client_config_from_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{
                "client_id": "device-1",
                "keep_alive": 15,
                "will": { "topic": "device/status", "payload": [111, 102, 102] }
            }"#,
        )
        .unwrap();

        assert_eq!(config.client_id, "device-1");
        assert_eq!(config.keep_alive, 15);
        assert!(config.clean_session);
        assert_eq!(config.read_buffer_size, 1024);
        let will = config.will.unwrap();
        assert_eq!(will.payload, b"off");
        assert!(!will.retain);
    }
}
