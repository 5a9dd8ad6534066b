//! High-level gateway service wiring.
//!
//! Builds the salt tables, cipher mode tables, admission map, and
//! dispatcher from one validated config, then drives the listener.

use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::transport::{listener, GatewayContext};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

/// A configured gateway, ready to serve.
pub struct Gateway {
    ctx: Arc<GatewayContext>,
}

impl Gateway {
    /// Validate `config` and precompute all shared cipher state.
    pub fn new(config: GateConfig) -> Result<Self> {
        config.validate_strict()?;
        Ok(Self {
            ctx: Arc::new(GatewayContext::from_config(config)),
        })
    }

    /// The dispatcher to register opcode handlers on.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.ctx.dispatcher
    }

    /// Shared context, for embedding applications that wire their own
    /// accept loop.
    pub fn context(&self) -> Arc<GatewayContext> {
        self.ctx.clone()
    }

    /// Serve until ctrl-c.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        listener::serve(self.ctx.clone()).await
    }

    /// Serve until the provided shutdown channel fires.
    pub async fn run_with_shutdown(&self, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        listener::serve_with_shutdown(self.ctx.clone(), shutdown_rx).await
    }

    /// Bind and serve on a background task, returning the bound address
    /// and a shutdown handle. The configured address may use port 0 to let
    /// the OS pick one.
    pub async fn spawn(&self) -> Result<RunningGateway> {
        let listener = TcpListener::bind(&self.ctx.config.listener.address).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let ctx = self.ctx.clone();
        let task = tokio::spawn(listener::serve_on(listener, ctx, shutdown_rx));
        Ok(RunningGateway {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle to a gateway serving on a background task.
pub struct RunningGateway {
    /// Address the listener actually bound
    pub local_addr: SocketAddr,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl RunningGateway {
    /// Signal shutdown and wait for the accept loop to drain.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(()).await;
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(GateError::Custom(format!("gateway task panicked: {e}"))),
        }
    }
}
