use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::detection::{decode_reply, Detection};
use crate::network::FrameCodec;
use crate::{AppError, AppResult};

/// Client side of the exchange: one connection, one image, one reply.
#[derive(Debug)]
pub struct DetectionClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl DetectionClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> AppResult<Self> {
        let socket = TcpStream::connect(addr).await?;
        debug!(peer = ?socket.peer_addr().ok(), "connected to detection server");
        Ok(DetectionClient {
            framed: Framed::new(socket, FrameCodec::new()),
        })
    }

    /// Sends `image` and returns the reply payload as received.
    ///
    /// An empty payload means the server ran detection but was configured not to
    /// return coordinates. A server that rejected the request closes the
    /// connection instead, which surfaces as [`AppError::NoReply`].
    pub async fn detect_raw(mut self, image: Bytes) -> AppResult<BytesMut> {
        debug!(bytes = image.len(), "sending image");
        self.framed.send(image).await?;
        match self.framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(AppError::NoReply),
        }
    }

    pub async fn detect(self, image: Bytes) -> AppResult<Vec<Detection>> {
        let reply = self.detect_raw(image).await?;
        if reply.is_empty() {
            return Ok(Vec::new());
        }
        Ok(decode_reply(&reply)?)
    }
}
