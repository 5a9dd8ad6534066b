//! # Error Types
//!
//! Comprehensive error handling for the gateway transport core.
//!
//! This module defines all error variants that can occur between the TCP
//! socket and the opcode-dispatch boundary, from low-level I/O failures to
//! wire-protocol violations raised by the frame reassembler and cipher.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and file system failures
//! - **Protocol Violations**: Bad signature, hostile length fields, buffer
//!   overflow, integrity-tag or dialog-checksum mismatch — always fatal to
//!   the offending connection
//! - **Handler Errors**: Raised while processing an already-valid frame —
//!   recovered locally, the connection survives
//! - **Resource Errors**: Send-queue shutdown, timeouts, admission refusal
//!
//! No error detail is ever written back on the wire; a hostile peer only
//! observes its socket closing.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Frame validation errors
    pub const ERR_BAD_SIGNATURE: &str = "Invalid frame signature";
    pub const ERR_BAD_LENGTH: &str = "Invalid frame length";
    pub const ERR_BUFFER_OVERFLOW: &str = "Receive buffer overflow";

    /// Cipher errors
    pub const ERR_TAG_MISMATCH: &str = "Packet integrity tag mismatch";
    pub const ERR_DIALOG_CHECKSUM: &str = "Dialog checksum mismatch";
    pub const ERR_SHORT_CIPHERTEXT: &str = "Ciphertext shorter than cipher trailer";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_CONNECTION_TIMEOUT: &str = "Connection timed out (no activity)";
    pub const ERR_QUEUE_CLOSED: &str = "Send queue closed";

    /// Admission errors
    pub const ERR_RATE_LIMITED: &str = "Connection attempts exceeded for source address";

    /// Dispatcher errors
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Cipher state errors
    pub const ERR_CIPHER_LOCK: &str = "Failed to acquire cipher state lock";
}

// GateError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum GateError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid frame signature: {0:#04x}")]
    InvalidSignature(u8),

    #[error("Invalid frame length: {0} bytes")]
    InvalidLength(usize),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Receive buffer overflow")]
    BufferOverflow,

    #[error("Packet integrity tag mismatch")]
    TagMismatch,

    #[error("Dialog checksum mismatch")]
    DialogChecksum,

    #[error("Ciphertext too short: {0} bytes")]
    ShortCiphertext(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out (no activity)")]
    ConnectionTimeout,

    #[error("Rate limit exceeded for source address")]
    RateLimited,

    #[error("Send queue closed")]
    QueueClosed,

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Entropy source failure: {0}")]
    Entropy(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl GateError {
    /// Whether this error is a wire-protocol violation.
    ///
    /// Protocol violations are always fatal to the connection: the socket is
    /// closed immediately and nothing is retried.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            GateError::InvalidSignature(_)
                | GateError::InvalidLength(_)
                | GateError::OversizedFrame(_)
                | GateError::BufferOverflow
                | GateError::TagMismatch
                | GateError::DialogChecksum
                | GateError::ShortCiphertext(_)
        )
    }
}

/// Type alias for Results using GateError
pub type Result<T> = std::result::Result<T, GateError>;
