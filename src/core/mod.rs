//! # Core Protocol Components
//!
//! Frame model and stream-to-frame reassembly.
//!
//! This module provides the foundation for the gateway wire protocol:
//! the frame type, header encoding, and the rolling-buffer state machine
//! that turns a TCP byte stream into validated frames.
//!
//! ## Wire Format
//! ```text
//! [Signature(1)=0xAA] [Length(2, big-endian)] [Opcode(1)] [Sequence(1)] [Payload(Length-2)]
//! ```
//!
//! The length field counts opcode + sequence + payload, so one complete
//! frame occupies `length + 3` bytes on the wire.
//!
//! ## Security
//! - Maximum frame size is validated before the length field is trusted
//! - The signature byte is checked before anything else in the header
//! - A connection that fills its receive buffer without completing a frame
//!   is closed

pub mod frame;
pub mod reassembly;

pub use frame::{Frame, FrameView};
pub use reassembly::FrameReassembler;
