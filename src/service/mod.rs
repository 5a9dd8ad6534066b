//! # Service Layer
//!
//! High-level entry points tying configuration, cipher state, admission
//! control, and the listener together.

pub mod gateway;

pub use gateway::{Gateway, RunningGateway};
