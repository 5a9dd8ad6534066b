//! # Protocol Boundary
//!
//! The seam between the transport core and the game logic above it.
//! Handlers registered here consume already-framed, already-decrypted
//! payloads; everything wire-specific stays below this line.

pub mod dispatcher;

pub use dispatcher::{DispatchOutcome, Dispatcher, FrameContext, Priority};
