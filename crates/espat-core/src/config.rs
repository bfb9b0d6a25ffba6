//! Engine configuration
//!
//! All fields have defaults, so a partial JSON file only needs the values it
//! changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::protocol::{
    EspError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, MAX_CONNECTIONS, MAX_FRAME_LEN,
    MAX_SEND_CHUNK,
};

/// How events reach the application callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Invoke the callback from inside the update step
    Immediate,
    /// Queue events until `process_events` is called
    #[default]
    Deferred,
}

/// Whether received payloads are inspected for a `Content-Length` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentLengthPolicy {
    /// Payloads are opaque
    #[default]
    Disabled,
    /// Look for an HTTP-style header block at the start of each payload
    HttpHeaders,
}

/// Per-command-class timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Generic command timeout
    pub command: u64,
    /// `AT+RST` until the ready banner
    pub reset: u64,
    /// `AT+CWJAP`
    pub join: u64,
    /// Time allowed between `WIFI CONNECTED` and `WIFI GOT IP`
    pub dhcp: u64,
    /// `AT+CWLAP`
    pub scan: u64,
    /// `AT+CIPSTART`
    pub connect: u64,
    /// Each `AT+CIPSEND` chunk
    pub send: u64,
    /// `AT+CIPCLOSE`
    pub close: u64,
    /// `AT+PING`
    pub ping: u64,
    /// SNTP queries
    pub sntp: u64,
    /// Silence required around `+++`
    pub transparent_guard: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_TIMEOUT_MS,
            reset: 5000,
            join: 20000,
            dhcp: 10000,
            scan: 10000,
            connect: 10000,
            send: 5000,
            close: 5000,
            ping: 6000,
            sntp: 5000,
            transparent_guard: 1100,
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// UART speed
    pub baud_rate: u32,
    /// Link slots in the connection table
    pub max_connections: usize,
    /// Bytes buffered per connection before a data event is raised
    pub connection_buffer_size: usize,
    /// Largest `+IPD` frame accepted
    pub max_frame_len: usize,
    /// Capacity of the receive ring
    pub rx_buffer_capacity: usize,
    /// Deferred events kept before the oldest are dropped
    pub event_queue_limit: usize,
    /// Largest payload per `AT+CIPSEND`
    pub max_send_chunk: usize,
    /// Per-command timeouts
    pub timeouts: TimeoutConfig,
    /// Bounded wait for the engine lock
    pub lock_timeout_ms: u64,
    /// How events reach the application
    pub delivery: DeliveryMode,
    /// Whether payloads are inspected for `Content-Length`
    pub content_length: ContentLengthPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            max_connections: MAX_CONNECTIONS,
            connection_buffer_size: 1460,
            max_frame_len: MAX_FRAME_LEN,
            rx_buffer_capacity: 4096,
            event_queue_limit: 256,
            max_send_chunk: MAX_SEND_CHUNK,
            timeouts: TimeoutConfig::default(),
            lock_timeout_ms: 1000,
            delivery: DeliveryMode::default(),
            content_length: ContentLengthPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), EspError> {
        if self.max_connections == 0 || self.max_connections > MAX_CONNECTIONS {
            return Err(EspError::Config(format!(
                "max_connections must be 1..={MAX_CONNECTIONS}, got {}",
                self.max_connections
            )));
        }
        if self.connection_buffer_size == 0 {
            return Err(EspError::Config(
                "connection_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.max_frame_len == 0 {
            return Err(EspError::Config("max_frame_len must be non-zero".to_string()));
        }
        if self.rx_buffer_capacity == 0 {
            return Err(EspError::Config(
                "rx_buffer_capacity must be non-zero".to_string(),
            ));
        }
        if self.max_send_chunk == 0 || self.max_send_chunk > MAX_SEND_CHUNK {
            return Err(EspError::Config(format!(
                "max_send_chunk must be 1..={MAX_SEND_CHUNK}, got {}",
                self.max_send_chunk
            )));
        }
        if self.event_queue_limit == 0 {
            return Err(EspError::Config(
                "event_queue_limit must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EspError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| EspError::Config(format!("{}: {e}", path.display())))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| EspError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EspError> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).map_err(|e| EspError::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| EspError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.max_send_chunk, 2048);
        assert_eq!(config.delivery, DeliveryMode::Deferred);
        assert_eq!(config.content_length, ContentLengthPolicy::Disabled);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"max_connections": 3, "timeouts": {"join": 30000}, "delivery": "immediate"}"#,
        )
        .unwrap();
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.timeouts.join, 30000);
        assert_eq!(config.timeouts.command, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.delivery, DeliveryMode::Immediate);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = EngineConfig {
            max_connections: 6,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EspError::Config(_))));

        config.max_connections = 5;
        config.max_send_chunk = 4096;
        assert!(matches!(config.validate(), Err(EspError::Config(_))));
    }
}
