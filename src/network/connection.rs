use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufWriter};
use tokio_util::codec::Decoder;

use super::frame::{self, FrameCodec, FrameError};

/// Read side of a client connection.
///
/// Holds the read half of the stream and a buffer that accumulates bytes across
/// however many reads it takes to complete a frame.
#[derive(Debug)]
pub struct Connection<R> {
    reader: R,
    buffer: BytesMut,
    codec: FrameCodec,
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, codec: FrameCodec, buffer_size: usize) -> Connection<R> {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(buffer_size),
            codec,
        }
    }

    /// Reads until the 4-byte header is complete and returns the declared length.
    ///
    /// A declared length over the codec limit fails here, before any payload is read.
    pub async fn read_header(&mut self) -> Result<usize, FrameError> {
        loop {
            if let Some(declared) = self.codec.declared_len(&self.buffer)? {
                return Ok(declared);
            }
            self.fill().await?;
        }
    }

    /// Reads until the payload announced by the header is complete.
    pub async fn read_payload(&mut self) -> Result<BytesMut, FrameError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(frame);
            }
            self.fill().await?;
        }
    }

    pub async fn read_frame(&mut self) -> Result<BytesMut, FrameError> {
        self.read_header().await?;
        self.read_payload().await
    }

    /// Number of bytes received but not yet handed out as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    // A zero-length read means the peer closed the stream before the frame was
    // complete, which is always an error at this point.
    async fn fill(&mut self) -> Result<(), FrameError> {
        if 0 == self.reader.read_buf(&mut self.buffer).await? {
            return Err(self.codec.eof_error(&self.buffer));
        }
        Ok(())
    }
}

/// Write side of a client connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: BufWriter<W>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> FrameWriter<W> {
        FrameWriter {
            writer: BufWriter::new(writer),
        }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        frame::write_frame(&mut self.writer, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_read_frame_across_partial_writes() {
        let (mut client, server) = duplex(8);
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            client.write_all(&(payload.len() as u32).to_be_bytes()[..2]).await.unwrap();
            client.write_all(&(payload.len() as u32).to_be_bytes()[2..]).await.unwrap();
            for chunk in payload.chunks(7) {
                client.write_all(chunk).await.unwrap();
            }
        });

        let mut connection = Connection::new(server, FrameCodec::new(), 16);
        assert_eq!(connection.read_header().await.unwrap(), 1000);
        let frame = connection.read_payload().await.unwrap();
        assert_eq!(&frame[..], &expected[..]);
        assert_eq!(connection.buffered(), 0);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_truncated_payload() {
        let (mut client, server) = duplex(64);
        client.write_all(&[0, 0, 0, 8, 1, 2, 3]).await.unwrap();
        drop(client);

        let mut connection = Connection::new(server, FrameCodec::new(), 16);
        match connection.read_frame().await {
            Err(FrameError::TruncatedPayload { expected, received }) => {
                assert_eq!(expected, 8);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_short_header() {
        let (mut client, server) = duplex(64);
        client.write_all(&[0, 0, 1]).await.unwrap();
        drop(client);

        let mut connection = Connection::new(server, FrameCodec::new(), 16);
        assert!(matches!(
            connection.read_header().await,
            Err(FrameError::ShortHeader { received: 3 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected_before_payload() {
        let (mut client, server) = duplex(64);
        client.write_all(&[0, 1, 0, 0]).await.unwrap();

        let mut connection = Connection::new(server, FrameCodec::with_max_frame_len(1024), 16);
        assert!(matches!(
            connection.read_header().await,
            Err(FrameError::FrameTooLarge { declared: 65536, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_frame_writer_round_trip() {
        let (client, server) = duplex(16);
        let mut writer = FrameWriter::new(client);
        let write = tokio::spawn(async move {
            writer.write_frame(b"[]").await.unwrap();
        });

        let mut connection = Connection::new(server, FrameCodec::new(), 16);
        assert_eq!(&connection.read_frame().await.unwrap()[..], b"[]");
        write.await.unwrap();
    }
}
