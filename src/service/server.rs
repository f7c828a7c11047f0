use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use image::DynamicImage;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{self, JoinError};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::detection::{encode_reply, Detection, Detector, DetectorError};
use crate::network::{Connection, FrameCodec, FrameWriter, HEADER_LEN};
use crate::AppError;
use crate::AppResult;

use super::{ServerConfig, Shutdown};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Where a connection is in its single request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHeader,
    AwaitingPayload,
    Decoding,
    Detecting,
    Replying,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::AwaitingHeader => "awaiting_header",
            ConnectionState::AwaitingPayload => "awaiting_payload",
            ConnectionState::Decoding => "decoding",
            ConnectionState::Detecting => "detecting",
            ConnectionState::Replying => "replying",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn decode_image(payload: BytesMut) -> AppResult<DynamicImage> {
    let decoded = task::spawn_blocking(move || image::load_from_memory(&payload))
        .await
        .map_err(|e| AppError::IllegalStateError(format!("image decoder: {}", panic_message(e))))?;
    Ok(decoded?)
}

// handler for each connection
struct ConnectionHandler<D: Detector> {
    _shutdown_complete_tx: mpsc::Sender<()>,
    state: ConnectionState,
    connection: Connection<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    detector: Arc<D>,
    config: Arc<ServerConfig>,
}

impl<D: Detector> ConnectionHandler<D> {
    fn transition(&mut self, next: ConnectionState) {
        debug!(from = %self.state, to = %next, "connection state");
        self.state = next;
    }

    /// Runs the one exchange this connection carries.
    ///
    /// `shutdown` is subscribed by the accept loop before the task is spawned.
    /// Any error leaves `state` at the step that failed. The caller closes the
    /// socket by dropping the handler either way.
    async fn handle_connection(&mut self, shutdown: &mut Shutdown) -> AppResult<()> {
        let payload = match shutdown.until(self.receive()).await {
            Some(res) => res?,
            None => {
                debug!("connection handler exit before request after recv shutdown signal");
                return Ok(());
            }
        };

        self.transition(ConnectionState::Decoding);
        let image = decode_image(payload).await?;
        if self.config.debug.show_image {
            info!(
                width = image.width(),
                height = image.height(),
                color = ?image.color(),
                "preview frame"
            );
        }

        self.transition(ConnectionState::Detecting);
        let detections = self.detect(image).await?;
        if self.config.debug.show_image {
            self.preview(&detections);
        }
        info!(count = detections.len(), "detection completed");

        self.transition(ConnectionState::Replying);
        let reply = if self.config.debug.return_coordinates {
            encode_reply(&detections)?
        } else {
            Bytes::new()
        };
        self.writer.write_frame(&reply).await?;
        debug!(bytes = reply.len(), "reply sent");
        Ok(())
    }

    // one deadline covers header and payload, so a client trickling bytes
    // cannot hold the connection open past it
    async fn receive(&mut self) -> AppResult<BytesMut> {
        let read_timeout = self.config.read_timeout();
        let deadline = Instant::now() + read_timeout;

        let declared = match time::timeout_at(deadline, self.connection.read_header()).await {
            Ok(declared) => declared?,
            Err(_) => return Err(AppError::ReadTimeout(read_timeout)),
        };
        self.transition(ConnectionState::AwaitingPayload);
        debug!(declared, "request header received");

        match time::timeout_at(deadline, self.connection.read_payload()).await {
            Ok(payload) => Ok(payload?),
            Err(_) => {
                warn!(
                    expected = declared,
                    received = self.connection.buffered().saturating_sub(HEADER_LEN),
                    "request payload incomplete at deadline"
                );
                Err(AppError::ReadTimeout(read_timeout))
            }
        }
    }

    async fn detect(&self, image: DynamicImage) -> AppResult<Vec<Detection>> {
        let detector = Arc::clone(&self.detector);
        let threshold = self.config.detector.confidence_threshold;
        let inference = task::spawn_blocking(move || detector.detect(&image, threshold));

        // on timeout the blocking task keeps running, only this exchange gives up
        let joined = match self.config.detect_timeout() {
            Some(limit) => time::timeout(limit, inference)
                .await
                .map_err(|_| DetectorError::Timeout(limit))?,
            None => inference.await,
        };
        let detections = joined.map_err(|e| DetectorError::Panicked(panic_message(e)))??;
        Ok(detections)
    }

    fn preview(&self, detections: &[Detection]) {
        for detection in detections {
            let color = self.detector.color_for_class(detection.class_name());
            info!(
                class_name = detection.class_name(),
                confidence = detection.confidence(),
                bbox = ?detection.bbox(),
                color = ?color.map(|c| c.0),
                "preview detection"
            );
        }
    }
}

pub struct Server<D: Detector> {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown: Shutdown,
    shutdown_complete_tx: mpsc::Sender<()>,
    detector: Arc<D>,
    config: Arc<ServerConfig>,
}

impl<D: Detector> Server<D> {
    pub fn new(
        listener: TcpListener,
        limit_connections: Arc<Semaphore>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        detector: Arc<D>,
        config: Arc<ServerConfig>,
    ) -> Self {
        // subscribed here so a signal sent before `run` is first polled still counts
        let shutdown = Shutdown::subscribe(&notify_shutdown);
        Server {
            listener,
            limit_connections,
            notify_shutdown,
            shutdown,
            shutdown_complete_tx,
            detector,
            config,
        }
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until shutdown is signalled or accepting itself fails.
    ///
    /// Every connection is handled on its own task, holding a permit from
    /// `limit_connections` for its lifetime. A failed exchange is logged and
    /// only closes that connection.
    ///
    /// # Returns
    /// `Ok(())` once the shutdown signal is seen. Exit with an error if failing
    /// to accept new connections.
    #[tracing::instrument(skip_all, fields(addr = ?self.listener.local_addr().ok()))]
    pub async fn run(&mut self) -> AppResult<()> {
        let codec = FrameCodec::with_max_frame_len(self.config.network.max_frame_size);
        let buffer_size = self.config.network.conn_read_buffer_size;
        let limiter = Arc::clone(&self.limit_connections);

        loop {
            let permit = match self.shutdown.until(Arc::clone(&limiter).acquire_owned()).await {
                Some(permit) => permit
                    .map_err(|e| AppError::IllegalStateError(format!("connection limiter: {}", e)))?,
                None => break,
            };

            // subscribe before accepting, a signal racing the spawn below must not be lost
            let mut shutdown = Shutdown::subscribe(&self.notify_shutdown);
            let (socket, peer) = match self.shutdown.until(accept(&self.listener)).await {
                Some(accepted) => accepted?,
                None => break,
            };
            let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            let (reader, writer) = socket.into_split();

            let mut handler = ConnectionHandler {
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                state: ConnectionState::AwaitingHeader,
                connection: Connection::new(reader, codec, buffer_size),
                writer: FrameWriter::new(writer),
                detector: Arc::clone(&self.detector),
                config: Arc::clone(&self.config),
            };

            let span = info_span!("connection", connection_id, %peer);
            tokio::spawn(
                async move {
                    debug!("accepted new connection");
                    if let Err(err) = handler.handle_connection(&mut shutdown).await {
                        if err.is_connection_local() {
                            warn!(cause = %err, state = %handler.state, "connection error");
                        } else {
                            error!(cause = %err, state = %handler.state, "connection error");
                        }
                    }
                    handler.transition(ConnectionState::Closed);
                    // whether gracefully or unexpectedly closed, release connection
                    drop(handler);
                    drop(permit);
                }
                .instrument(span),
            );
        }

        debug!("accept loop exit after recv shutdown signal");
        Ok(())
    }
}

async fn accept(listener: &TcpListener) -> AppResult<(TcpStream, SocketAddr)> {
    let mut backoff = 1;

    loop {
        match listener.accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(err) => {
                if backoff > 64 {
                    return Err(AppError::Accept(format!("accept tcp server error: {}", err)));
                }
                warn!(cause = %err, backoff, "accept failed, retrying");
            }
        }

        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

impl<D: Detector> Drop for Server<D> {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}

impl<D: Detector> Drop for ConnectionHandler<D> {
    fn drop(&mut self) {
        debug!("connection handler dropped");
    }
}
