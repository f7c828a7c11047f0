use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::{runtime, signal};
use tracing::{error, info, trace};

use crate::detection::Detector;
use crate::{AppError, AppResult};

use super::{Server, ServerConfig};

/// Binds the listening socket. Failure here is fatal and never retried.
pub async fn bind(address: &str) -> AppResult<TcpListener> {
    match TcpListener::bind(address).await {
        Ok(listener) => {
            info!("tcp server binding to {} for listening", address);
            Ok(listener)
        }
        Err(source) => {
            error!(
                "Failed to bind server to address: {} - Error: {}",
                address, source
            );
            Err(AppError::Bind {
                address: address.to_string(),
                source,
            })
        }
    }
}

/// One detection server process: configuration, the detector backend and the
/// shutdown sequence around [`Server`].
pub struct DetectionNode<D: Detector> {
    config: Arc<ServerConfig>,
    detector: Arc<D>,
}

impl<D: Detector> DetectionNode<D> {
    pub fn new(config: ServerConfig, detector: D) -> Self {
        DetectionNode {
            config: Arc::new(config),
            detector: Arc::new(detector),
        }
    }

    /// Serves until accepting fails or ctrl-c, then waits for every open
    /// connection to finish its exchange.
    ///
    /// Connections are drained on both paths. An accept failure is returned
    /// afterwards so the process exits non-zero.
    pub fn start(&self, rt: &runtime::Runtime) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        let result =
            rt.block_on(self.run_tcp_server(notify_shutdown.clone(), shutdown_complete_tx));
        if let Err(err) = &result {
            error!(cause = %err, "tcp server stopped");
        }

        // tcp server has been shutdown, send shutdown signal
        // (no receivers just means no connection is open)
        let _ = notify_shutdown.send(());
        trace!("waiting for shutdown complete...");
        rt.block_on(shutdown_complete_rx.recv());
        info!("detection server shutdown complete");
        result
    }

    async fn run_tcp_server(
        &self,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: Sender<()>,
    ) -> AppResult<()> {
        let listener = bind(&self.config.listen_address()).await?;
        let server = Server::new(
            listener,
            Arc::new(Semaphore::new(self.config.network.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            Arc::clone(&self.detector),
            Arc::clone(&self.config),
        );
        serve(server, signal::ctrl_c()).await
    }
}

/// Runs `server` until it fails or `stop` completes. Only a server failure is
/// returned, stopping is a clean exit.
pub async fn serve<D, F, T>(mut server: Server<D>, stop: F) -> AppResult<()>
where
    D: Detector,
    F: Future<Output = T>,
{
    tokio::select! {
        res = server.run() => res,
        _ = stop => {
            info!("get shutdown signal");
            Ok(())
        }
    }
}
