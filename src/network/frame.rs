use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use super::Connection;

/// Size of the big-endian `u32` length prefix.
pub const HEADER_LEN: usize = 4;

// upper bound on a single up-front reservation, the rest grows with the reads
const MAX_RESERVE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream closed after {received} of 4 header bytes")]
    ShortHeader { received: usize },

    #[error("stream closed after {received} of {expected} payload bytes")]
    TruncatedPayload { expected: usize, received: usize },

    #[error("declared frame length {declared} exceeds limit {max}")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("payload of {0} bytes does not fit a 32-bit length prefix")]
    PayloadTooLarge(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Length-prefixed framing: `[u32 big-endian length L][L payload bytes]`.
///
/// The codec itself accepts any declared length unless a limit is configured
/// with [`FrameCodec::with_max_frame_len`]. Servers should always set one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    max_frame_len: Option<usize>,
}

impl FrameCodec {
    pub fn new() -> Self {
        FrameCodec {
            max_frame_len: None,
        }
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        FrameCodec {
            max_frame_len: Some(max_frame_len),
        }
    }

    /// Returns the declared payload length once the whole header is buffered.
    pub fn declared_len(&self, buffer: &BytesMut) -> Result<Option<usize>, FrameError> {
        if buffer.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&buffer[..HEADER_LEN]);
        let declared = u32::from_be_bytes(header) as usize;
        if let Some(max) = self.max_frame_len {
            if declared > max {
                return Err(FrameError::FrameTooLarge { declared, max });
            }
        }
        Ok(Some(declared))
    }

    /// Classifies the bytes left in `buffer` when the peer closed mid-frame.
    pub fn eof_error(&self, buffer: &BytesMut) -> FrameError {
        if buffer.len() < HEADER_LEN {
            return FrameError::ShortHeader {
                received: buffer.len(),
            };
        }
        match self.declared_len(buffer) {
            Ok(declared) => FrameError::TruncatedPayload {
                expected: declared.unwrap_or_default(),
                received: buffer.len() - HEADER_LEN,
            },
            Err(err) => err,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        let declared = match self.declared_len(src)? {
            Some(declared) => declared,
            None => {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            }
        };
        let frame_len = HEADER_LEN + declared;
        if src.len() < frame_len {
            src.reserve((frame_len - src.len()).min(MAX_RESERVE));
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(declared)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(self.eof_error(src)),
        }
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = u32::try_from(item.len()).map_err(|_| FrameError::PayloadTooLarge(item.len()))?;
        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(len);
        dst.extend_from_slice(item);
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        Encoder::<&[u8]>::encode(self, &item[..], dst)
    }
}

/// Writes one frame and flushes it. `write_all` keeps going across partial writes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len =
        u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one frame from `reader`.
///
/// Bytes the peer sent after the frame are read into a scratch buffer and dropped,
/// so this is only suitable for one-frame-per-stream exchanges. Use [`Connection`]
/// to keep them.
pub async fn read_frame<R>(reader: &mut R, max_frame_len: Option<usize>) -> Result<BytesMut, FrameError>
where
    R: AsyncRead + Unpin,
{
    let codec = match max_frame_len {
        Some(max) => FrameCodec::with_max_frame_len(max),
        None => FrameCodec::new(),
    };
    Connection::new(reader, codec, 4 * 1024).read_frame().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn framed(payload: &[u8]) -> BytesMut {
        let mut buffer = BytesMut::new();
        FrameCodec::new().encode(payload, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_encode_layout() {
        let buffer = framed(b"hello");
        assert_eq!(&buffer[..], &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_decode_empty_frame() {
        let mut buffer = framed(b"");
        let frame = FrameCodec::new().decode(&mut buffer).unwrap().unwrap();
        assert!(frame.is_empty());
        assert!(buffer.is_empty());
    }

    #[rstest]
    #[case(0)]
    #[case(2)]
    #[case(4)]
    #[case(7)]
    fn test_decode_waits_for_whole_frame(#[case] available: usize) {
        let full = framed(b"payload");
        let mut buffer = BytesMut::from(&full[..available]);
        assert!(FrameCodec::new().decode(&mut buffer).unwrap().is_none());
        assert_eq!(buffer.len(), available);
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut buffer = framed(b"first");
        buffer.extend_from_slice(&framed(b"second"));
        let mut codec = FrameCodec::new();
        assert_eq!(&codec.decode(&mut buffer).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode(&mut buffer).unwrap().unwrap()[..], b"second");
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[rstest]
    #[case(&[0, 0][..], 2)]
    #[case(&[0][..], 1)]
    fn test_eof_short_header(#[case] bytes: &[u8], #[case] expected_received: usize) {
        let mut buffer = BytesMut::from(bytes);
        match FrameCodec::new().decode_eof(&mut buffer) {
            Err(FrameError::ShortHeader { received }) => assert_eq!(received, expected_received),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_eof_truncated_payload() {
        let mut buffer = BytesMut::from(&[0u8, 0, 0, 10, 1, 2, 3][..]);
        match FrameCodec::new().decode_eof(&mut buffer) {
            Err(FrameError::TruncatedPayload { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_eof_on_clean_boundary() {
        let mut buffer = BytesMut::new();
        assert!(FrameCodec::new().decode_eof(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_declared_length_over_limit() {
        let mut buffer = BytesMut::from(&[0u8, 0, 1, 0][..]);
        match FrameCodec::with_max_frame_len(255).decode(&mut buffer) {
            Err(FrameError::FrameTooLarge { declared, max }) => {
                assert_eq!(declared, 256);
                assert_eq!(max, 255);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_declared_length_at_limit() {
        let mut buffer = framed(&[7u8; 16]);
        let frame = FrameCodec::with_max_frame_len(16)
            .decode(&mut buffer)
            .unwrap()
            .unwrap();
        assert_eq!(frame.len(), 16);
    }
}
