//! Opcode dispatch: the boundary between the transport core and game logic.
//!
//! Handlers are registered per opcode byte and receive already-framed,
//! already-decrypted payloads. Two priority classes keep the gateway
//! responsive under lag: real-time handlers run inline on the receive
//! path, while standard handlers first pass a FIFO gate with a short
//! timeout and are dropped — not queued indefinitely — when it elapses.

use crate::error::{constants, GateError, Result};
use crate::transport::connection::ConnectionHandle;
use crate::utils::timeout::with_timeout_error;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;

/// How a handler is scheduled on the receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Execute immediately, inline with reassembly
    Realtime,
    /// Acquire the FIFO gate first; shed the frame on timeout
    Standard,
}

/// Everything a handler sees for one frame.
pub struct FrameContext<'a> {
    /// Handle for replying on (or tearing down) the originating connection
    pub connection: &'a ConnectionHandle,
    pub opcode: u8,
    pub sequence: u8,
    /// Decrypted payload, valid only for the duration of the call
    pub payload: &'a [u8],
}

type HandlerFn = dyn Fn(&FrameContext<'_>) -> Result<()> + Send + Sync + 'static;

struct Registered {
    priority: Priority,
    handler: Box<HandlerFn>,
}

/// What happened to one dispatched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion
    Handled,
    /// Standard-priority gate timed out; frame dropped to shed load
    Shed,
    /// No handler registered for the opcode
    Unknown,
}

/// Opcode-keyed frame dispatcher shared by every connection of a gateway.
pub struct Dispatcher {
    handlers: RwLock<HashMap<u8, Arc<Registered>>>,
    /// tokio semaphores queue waiters fairly, which is exactly the FIFO
    /// discipline standard handlers need
    standard_gate: Arc<Semaphore>,
    shed_timeout: Duration,
}

impl Dispatcher {
    /// Dispatcher with a single-permit standard gate (standard handlers run
    /// one at a time, in arrival order).
    pub fn new(shed_timeout: Duration) -> Self {
        Self::with_permits(shed_timeout, 1)
    }

    /// Dispatcher allowing `permits` concurrent standard handlers.
    pub fn with_permits(shed_timeout: Duration, permits: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            standard_gate: Arc::new(Semaphore::new(permits)),
            shed_timeout,
        }
    }

    /// Register the handler for one opcode, replacing any previous one.
    pub fn register<F>(&self, opcode: u8, priority: Priority, handler: F) -> Result<()>
    where
        F: Fn(&FrameContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| GateError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers.insert(
            opcode,
            Arc::new(Registered {
                priority,
                handler: Box::new(handler),
            }),
        );
        Ok(())
    }

    /// Route one decrypted frame to its handler.
    ///
    /// A handler error propagates to the caller, which drops the frame and
    /// resets reassembly state without tearing the connection down.
    pub async fn dispatch(&self, ctx: FrameContext<'_>) -> Result<DispatchOutcome> {
        let registered = {
            let handlers = self
                .handlers
                .read()
                .map_err(|_| GateError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;
            handlers.get(&ctx.opcode).cloned()
        };

        let Some(registered) = registered else {
            return Ok(DispatchOutcome::Unknown);
        };

        match registered.priority {
            Priority::Realtime => {
                (registered.handler)(&ctx)?;
                Ok(DispatchOutcome::Handled)
            }
            Priority::Standard => {
                let gate = with_timeout_error(
                    async {
                        self.standard_gate
                            .acquire()
                            .await
                            .map_err(|_| GateError::Custom("standard gate closed".to_string()))
                    },
                    self.shed_timeout,
                )
                .await;
                match gate {
                    Ok(_permit) => {
                        (registered.handler)(&ctx)?;
                        Ok(DispatchOutcome::Handled)
                    }
                    Err(GateError::Timeout) => Ok(DispatchOutcome::Shed),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Whether an opcode has a registered handler.
    pub fn is_registered(&self, opcode: u8) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(&opcode))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::transport::connection::ConnectionHandle;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_handle() -> ConnectionHandle {
        ConnectionHandle::detached(&GateConfig::default())
    }

    fn ctx<'a>(handle: &'a ConnectionHandle, opcode: u8, payload: &'a [u8]) -> FrameContext<'a> {
        FrameContext {
            connection: handle,
            opcode,
            sequence: 0,
            payload,
        }
    }

    #[tokio::test]
    async fn realtime_handler_runs_inline() {
        let dispatcher = Dispatcher::new(Duration::from_millis(100));
        let hits = Arc::new(AtomicU32::new(0));
        {
            let hits = hits.clone();
            dispatcher
                .register(0x05, Priority::Realtime, move |ctx| {
                    assert_eq!(ctx.payload, b"ping");
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        let handle = test_handle();
        let outcome = dispatcher.dispatch(ctx(&handle, 0x05, b"ping")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_opcode_is_reported_not_fatal() {
        let dispatcher = Dispatcher::new(Duration::from_millis(100));
        let handle = test_handle();
        let outcome = dispatcher.dispatch(ctx(&handle, 0x99, b"")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Unknown);
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let dispatcher = Dispatcher::new(Duration::from_millis(100));
        dispatcher
            .register(0x07, Priority::Realtime, |_| {
                Err(GateError::Handler("bad args".into()))
            })
            .unwrap();

        let handle = test_handle();
        let err = dispatcher.dispatch(ctx(&handle, 0x07, b"x")).await.unwrap_err();
        assert!(matches!(err, GateError::Handler(_)));
    }

    #[tokio::test]
    async fn standard_frames_shed_when_gate_is_held() {
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_millis(50)));
        dispatcher
            .register(0x30, Priority::Standard, |_| Ok(()))
            .unwrap();

        // Hold the only permit so the dispatch below must time out
        let permit = dispatcher.standard_gate.clone().acquire_owned().await.unwrap();

        let handle = test_handle();
        let outcome = dispatcher.dispatch(ctx(&handle, 0x30, b"laggy")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Shed);

        drop(permit);
        let outcome = dispatcher.dispatch(ctx(&handle, 0x30, b"ok")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);
    }

    #[tokio::test]
    async fn reregistration_replaces_handler() {
        let dispatcher = Dispatcher::new(Duration::from_millis(100));
        dispatcher
            .register(0x01, Priority::Realtime, |_| {
                Err(GateError::Handler("old".into()))
            })
            .unwrap();
        dispatcher
            .register(0x01, Priority::Realtime, |_| Ok(()))
            .unwrap();

        let handle = test_handle();
        let outcome = dispatcher.dispatch(ctx(&handle, 0x01, b"")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);
    }
}
