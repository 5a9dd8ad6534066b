//! TCP accept loop with admission gating and graceful shutdown.

use crate::crypt::engine::CipherEngine;
use crate::error::{GateError, Result};
use crate::transport::connection::ConnectionTransport;
use crate::transport::GatewayContext;
use crate::utils::metrics::Metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};

/// Start the gateway listener with an internal ctrl-c shutdown handler.
#[instrument(skip(ctx), fields(address = %ctx.config.listener.address))]
pub async fn serve(ctx: Arc<GatewayContext>) -> Result<()> {
    // Create internal shutdown channel
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    // Set up ctrl-c handler that sends to our internal shutdown channel
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    serve_with_shutdown(ctx, shutdown_rx).await
}

/// Start the gateway listener with an external shutdown channel.
#[instrument(skip(ctx, shutdown_rx), fields(address = %ctx.config.listener.address))]
pub async fn serve_with_shutdown(
    ctx: Arc<GatewayContext>,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&ctx.config.listener.address).await?;
    serve_on(listener, ctx, shutdown_rx).await
}

/// Accept loop over an already-bound listener.
///
/// Admission control runs before a transport is even constructed; a
/// refused peer only ever observes its socket closing.
pub async fn serve_on(
    listener: TcpListener,
    ctx: Arc<GatewayContext>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "gateway listening");

    // Track active connections
    let active = Arc::new(AtomicUsize::new(0));
    let next_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            // Check for shutdown signal from the provided channel
            _ = shutdown_rx.recv() => {
                info!("Shutting down gateway. Waiting for connections to close...");

                // Wait for active connections to close (with timeout)
                let deadline = tokio::time::sleep(ctx.config.listener.shutdown_timeout);
                tokio::pin!(deadline);

                loop {
                    tokio::select! {
                        _ = &mut deadline => {
                            warn!("Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {
                            let connections = active.load(Ordering::Acquire);
                            info!(connections, "Waiting for connections to close");
                            if connections == 0 {
                                info!("All connections closed, shutting down");
                                break;
                            }
                        }
                    }
                }

                Metrics::global().log_summary();
                return Ok(());
            }

            // Accept new connections
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        // Silent refusal: no transport, no bytes back
                        if ctx.admission.check(peer).is_err() {
                            Metrics::global().connection_rejected();
                            trace!(peer = %peer, "connection refused by admission control");
                            continue;
                        }

                        if active.load(Ordering::Acquire) >= ctx.config.listener.max_connections {
                            Metrics::global().connection_over_capacity();
                            debug!(peer = %peer, "connection refused, at capacity");
                            continue;
                        }

                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                        }

                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        let engine = CipherEngine::new(
                            ctx.tables.clone(),
                            ctx.seed_table.clone(),
                            ctx.modes.clone(),
                        );
                        let transport = ConnectionTransport::new(
                            id,
                            stream,
                            peer,
                            engine,
                            ctx.dispatcher.clone(),
                            &ctx.config.transport,
                        );

                        Metrics::global().connection_established();
                        active.fetch_add(1, Ordering::AcqRel);
                        debug!(connection = id, peer = %peer, "connection established");

                        let active = active.clone();
                        tokio::spawn(async move {
                            match transport.run().await {
                                Ok(()) => debug!(connection = id, "connection closed"),
                                Err(GateError::ConnectionTimeout) => {
                                    debug!(connection = id, "connection idle timeout");
                                }
                                Err(e) if e.is_protocol_violation() => {
                                    // Already logged with context at the
                                    // violation site
                                }
                                Err(e) => debug!(connection = id, error = %e, "connection error"),
                            }
                            active.fetch_sub(1, Ordering::AcqRel);
                            Metrics::global().connection_closed();
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}
