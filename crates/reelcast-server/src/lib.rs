//! reelcast-server: raw-socket video streaming server.
//!
//! This crate serves a directory of video files over a small HTTP/1.1 subset
//! written directly on TCP sockets. It provides:
//!
//! - An accept loop with semaphore-based admission control
//! - Range-aware streaming with per-connection throttling
//! - A per-client prefetch cache swept in the background
//! - Listing and watch pages plus on-demand ffmpeg thumbnails
//! - Graceful shutdown that drains in-flight connections

pub mod connection;
pub mod context;
pub mod limiter;
pub mod listener;
pub mod pages;
pub mod prefetch;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod socket;
pub mod streaming;
pub mod thumbnails;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use reelcast_core::config::Config;
use reelcast_core::{Error, MetricsSnapshot, Result};

pub use crate::context::AppContext;
use crate::listener::Listener;

/// Start the reelcast server and run until SIGINT/SIGTERM.
///
/// Creates the video and thumbnail directories if missing, performs an
/// initial scan, binds the listener, and serves until a shutdown signal.
pub async fn start(config: Config) -> Result<()> {
    config.validate()?;

    for dir in [&config.library.video_dir, &config.thumbnails.dir] {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            tracing::info!("Created directory {}", dir.display());
        }
    }

    let ctx = AppContext::new(config);
    let registry = Arc::clone(&ctx.registry);
    let count = tokio::task::spawn_blocking(move || registry.rescan())
        .await
        .map_err(|e| Error::Internal(format!("scan task failed: {e}")))??;
    tracing::info!(
        "Found {count} videos in {}",
        ctx.registry.root().display()
    );

    let server = Server::bind(ctx).await?;
    tracing::info!("Listening on {}", server.local_addr()?);

    let cancel = server.context().cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        cancel.cancel();
    });

    let metrics = server.run().await;
    tracing::info!(
        requests = metrics.requests,
        errors = metrics.errors,
        bytes_transferred = metrics.bytes_transferred,
        prefetch_hits = metrics.prefetch_hits,
        prefetch_misses = metrics.prefetch_misses,
        "Server shutdown complete"
    );
    Ok(())
}

/// A bound server ready to run.
#[derive(Debug)]
pub struct Server {
    listener: Listener,
    ctx: AppContext,
}

impl Server {
    /// Bind the configured listen address.
    pub async fn bind(ctx: AppContext) -> Result<Self> {
        let addr = ctx.config.listen_addr()?;
        let listener = Listener::bind(addr, ctx.config.server.max_connections).await?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Serve until `ctx.cancel` fires, then drain.
    ///
    /// Stops accepting, waits for every connection task to return, shuts the
    /// prefetch cache down, and returns the final metrics.
    pub async fn run(self) -> MetricsSnapshot {
        let Server { listener, ctx } = self;
        let cancel = ctx.cancel.clone();
        let tracker = TaskTracker::new();

        let sweeper = tokio::spawn(prefetch::run_sweeper(
            Arc::clone(&ctx.prefetch),
            Arc::clone(&ctx.metrics),
            ctx.config.streaming.cleanup_interval(),
            cancel.clone(),
        ));

        run_accept_loop(&listener, &ctx, &tracker, &cancel).await;

        drop(listener);
        tracker.close();
        tracing::info!("Waiting for {} connections to finish", tracker.len());
        tracker.wait().await;

        ctx.prefetch.shutdown();
        let _ = sweeper.await;
        ctx.metrics.snapshot()
    }
}

async fn run_accept_loop(
    listener: &Listener,
    ctx: &AppContext,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = listener.accept() => {
                match result {
                    Ok(admitted) => {
                        let ctx = ctx.clone();
                        tracker.spawn(async move {
                            let _permit = admitted.permit;
                            router::handle_connection(admitted.stream, admitted.peer, ctx).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Accept error: {e}");
                        // Avoid spinning when out of file descriptors.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
