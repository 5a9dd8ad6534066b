//! # gatewire
//!
//! Transport and cipher core for legacy binary-protocol game gateways.
//!
//! This crate is the network edge of a real-time multiplayer game server:
//! it terminates TCP connections from a fixed legacy client, reassembles
//! the byte stream into discrete frames, applies the custom stream cipher
//! per frame, and hands decoded frames to opcode handlers registered
//! through the [`Dispatcher`](protocol::Dispatcher). Game logic lives
//! above that boundary and never sees a raw socket.
//!
//! ## Architecture
//! - [`core`] — frame model and the rolling-buffer reassembly state machine
//! - [`crypt`] — salt tables, key derivation, the XOR keystream engine, and
//!   the dialog sub-cipher
//! - [`transport`] — accept loop, admission control, per-connection
//!   receive/send loops, drop-oldest outbound queue
//! - [`protocol`] — the opcode dispatch boundary with priority classes
//! - [`service`] — configuration-driven gateway wiring
//!
//! ## Example
//! ```rust,no_run
//! use gatewire::config::GateConfig;
//! use gatewire::protocol::Priority;
//! use gatewire::service::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> gatewire::error::Result<()> {
//!     let config = GateConfig::default();
//!     gatewire::utils::logging::init(&config.logging)?;
//!
//!     let gateway = Gateway::new(config)?;
//!     gateway.dispatcher().register(0x05, Priority::Realtime, |ctx| {
//!         ctx.connection.send(0x05, ctx.payload)
//!     })?;
//!     gateway.run().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod crypt;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

// Flat re-exports of the types most integrations touch
pub use crate::config::GateConfig;
pub use crate::core::frame::Frame;
pub use crate::core::reassembly::FrameReassembler;
pub use crate::crypt::engine::{CipherEngine, Direction};
pub use crate::error::{GateError, Result};
pub use crate::protocol::dispatcher::{DispatchOutcome, Dispatcher, FrameContext, Priority};
pub use crate::service::gateway::{Gateway, RunningGateway};
pub use crate::transport::connection::ConnectionHandle;
