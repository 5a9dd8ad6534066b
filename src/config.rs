//! # Configuration Management
//!
//! Centralized configuration for the gateway transport core.
//!
//! This module provides structured configuration for the listener, the
//! per-connection transport, the cipher, admission control, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides
//!
//! ## Security Considerations
//! - The maximum frame length guards against memory exhaustion from hostile
//!   length fields; keep it at the smallest value the client population needs
//! - The admission window throttles reconnect floods per source address
//! - Recommended idle-timeout values prevent slowloris-style connection holding

use crate::crypt::key::CipherMode;
use crate::error::{GateError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Leading byte of every wire frame.
pub const FRAME_SIGNATURE: u8 = 0xAA;

/// Bytes preceding the payload on the wire: signature, length, opcode, sequence.
pub const FRAME_HEADER_LEN: usize = 5;

/// Smallest legal frame: a header with an empty payload.
pub const MIN_FRAME_LEN: usize = FRAME_HEADER_LEN;

/// Max allowed total frame size on the wire (8 KiB observed ceiling)
pub const MAX_FRAME_LEN: usize = 8 * 1024;

/// Default rolling receive buffer capacity per connection
pub const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Default capacity of one pooled send region
pub const SEND_BUFFER_LEN: usize = 4 * 1024;

/// Default seed text for the cipher key-derivation table
pub const DEFAULT_CIPHER_SEED: &str = "default";

/// Main gateway configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GateConfig {
    /// Listener-specific configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Per-connection transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Cipher configuration
    #[serde(default)]
    pub cipher: CipherConfig,

    /// Admission-control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GateConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| GateError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| GateError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| GateError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(addr) = std::env::var("GATEWIRE_LISTEN_ADDRESS") {
            config.listener.address = addr;
        }

        if let Ok(max) = std::env::var("GATEWIRE_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.listener.max_connections = val;
            }
        }

        if let Ok(seed) = std::env::var("GATEWIRE_CIPHER_SEED") {
            config.cipher.seed_text = seed;
        }

        if let Ok(attempts) = std::env::var("GATEWIRE_ADMISSION_MAX_ATTEMPTS") {
            if let Ok(val) = attempts.parse::<u32>() {
                config.admission.max_attempts = val;
            }
        }

        if let Ok(window) = std::env::var("GATEWIRE_ADMISSION_WINDOW_MS") {
            if let Ok(val) = window.parse::<u64>() {
                config.admission.window = Duration::from_millis(val);
            }
        }

        if let Ok(idle) = std::env::var("GATEWIRE_IDLE_TIMEOUT_MS") {
            if let Ok(val) = idle.parse::<u64>() {
                config.transport.idle_timeout = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GateError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| GateError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.listener.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.cipher.validate());
        errors.extend(self.admission.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GateError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen address (e.g., "0.0.0.0:2000")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Timeout for graceful shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:2000"),
            max_connections: 2000,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ListenerConfig {
    /// Validate listener configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:2000')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Per-connection transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum total frame size accepted or produced, in bytes
    pub max_frame_len: usize,

    /// Rolling receive buffer capacity, in bytes
    pub recv_buffer_len: usize,

    /// Capacity of one pooled send region, in bytes
    pub send_buffer_len: usize,

    /// Outbound queue depth before drop-oldest backpressure engages
    pub send_queue_depth: usize,

    /// Disconnect a connection after this long without inbound bytes
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// How long a standard-priority frame may wait for the handler gate
    /// before it is shed
    #[serde(with = "duration_serde")]
    pub shed_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
            recv_buffer_len: RECV_BUFFER_LEN,
            send_buffer_len: SEND_BUFFER_LEN,
            send_queue_depth: 64,
            idle_timeout: timeout::IDLE_TIMEOUT,
            shed_timeout: timeout::SHED_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_len < MIN_FRAME_LEN {
            errors.push(format!(
                "Max frame length too small: {} bytes (minimum: {MIN_FRAME_LEN})",
                self.max_frame_len
            ));
        } else if self.max_frame_len > 64 * 1024 {
            errors.push(format!(
                "Max frame length too large: {} bytes (the length field is 16-bit; maximum: 64 KiB)",
                self.max_frame_len
            ));
        }

        if self.recv_buffer_len < self.max_frame_len {
            errors.push(
                "Receive buffer must be at least one maximum frame long".to_string(),
            );
        }

        if self.send_buffer_len == 0 {
            errors.push("Send buffer length cannot be 0".to_string());
        }

        if self.send_queue_depth == 0 {
            errors.push("Send queue depth must be greater than 0".to_string());
        } else if self.send_queue_depth > 4096 {
            errors.push(format!(
                "Send queue depth very high: {} (drop-oldest backpressure becomes meaningless)",
                self.send_queue_depth
            ));
        }

        if self.idle_timeout.as_millis() < 100 {
            errors.push("Idle timeout too short (minimum: 100ms)".to_string());
        }

        if self.shed_timeout.as_millis() < 10 {
            errors.push("Shed timeout too short (minimum: 10ms)".to_string());
        } else if self.shed_timeout.as_secs() > 5 {
            errors.push("Shed timeout too long (maximum: 5s)".to_string());
        }

        errors
    }
}

/// A single opcode-to-cipher-mode override
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModeOverride {
    /// Opcode byte the override applies to
    pub opcode: u8,
    /// Cipher mode to use for that opcode
    pub mode: CipherMode,
}

/// Cipher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CipherConfig {
    /// Seed text for the salt-seed table (MD5 chain source)
    pub seed_text: String,

    /// Overrides applied on top of the built-in client-to-server mode table
    #[serde(default)]
    pub client_mode_overrides: Vec<ModeOverride>,

    /// Overrides applied on top of the built-in server-to-client mode table
    #[serde(default)]
    pub server_mode_overrides: Vec<ModeOverride>,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            seed_text: String::from(DEFAULT_CIPHER_SEED),
            client_mode_overrides: Vec::new(),
            server_mode_overrides: Vec::new(),
        }
    }
}

impl CipherConfig {
    /// Validate cipher configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.seed_text.is_empty() {
            errors.push("Cipher seed text cannot be empty".to_string());
        } else if self.seed_text.len() > 256 {
            errors.push(format!(
                "Cipher seed text too long: {} bytes (maximum: 256)",
                self.seed_text.len()
            ));
        }

        errors
    }
}

/// Admission-control configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Connection attempts allowed per source address per window
    pub max_attempts: u32,

    /// Rolling window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: timeout::ADMISSION_WINDOW,
        }
    }
}

impl AdmissionConfig {
    /// Validate admission configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_attempts == 0 {
            errors.push("Admission max attempts must be greater than 0".to_string());
        }

        if self.window.as_secs() < 1 {
            errors.push("Admission window too short (minimum: 1s)".to_string());
        } else if self.window.as_secs() > 3600 {
            errors.push("Admission window too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("gatewire"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                // Check if parent directory exists (if path is absolute)
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
