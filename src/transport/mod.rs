//! # Transport Layer
//!
//! Everything between the TCP socket and the opcode dispatch boundary:
//! the accept loop, admission control, the per-connection receive/send
//! loops, and the drop-oldest outbound queue.
//!
//! ## Concurrency Model
//! One logical receive loop and one logical send loop per connection,
//! multiplexed over the tokio runtime. The depth-1 reassembly gate makes
//! frame reassembly effectively single-threaded per connection;
//! cross-connection work shares no mutable state except the lock-free
//! admission map and the immutable salt tables.

pub mod admission;
pub mod connection;
pub mod listener;
pub mod send_queue;

use crate::config::GateConfig;
use crate::crypt::key::CipherTables;
use crate::crypt::salt::{SaltSeedTable, SaltTableSet};
use crate::protocol::dispatcher::Dispatcher;
use std::sync::Arc;

pub use admission::AdmissionControl;
pub use connection::{ConnectionHandle, ConnectionTransport};
pub use send_queue::SendQueue;

/// Shared state every connection of a gateway hangs off: configuration,
/// the immutable cipher tables, the admission map, and the dispatcher.
pub struct GatewayContext {
    pub config: GateConfig,
    pub tables: Arc<SaltTableSet>,
    pub seed_table: Arc<SaltSeedTable>,
    pub modes: Arc<CipherTables>,
    pub admission: AdmissionControl,
    pub dispatcher: Arc<Dispatcher>,
}

impl GatewayContext {
    /// Build the full context from validated configuration.
    pub fn from_config(config: GateConfig) -> Self {
        let tables = Arc::new(SaltTableSet::build(&config.cipher.seed_text));
        let seed_table = Arc::new(SaltSeedTable::derive(&config.cipher.seed_text));
        let modes = Arc::new(CipherTables::from_config(&config.cipher));
        let admission = AdmissionControl::new(&config.admission);
        let dispatcher = Arc::new(Dispatcher::new(config.transport.shed_timeout));
        Self {
            config,
            tables,
            seed_table,
            modes,
            admission,
            dispatcher,
        }
    }
}
