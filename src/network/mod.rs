//! Network Module Implementation
//!
//! Framing and per-connection I/O shared by the detection server and client.
//!
//! # Wire format
//!
//! Every message in either direction is a frame:
//!
//! ```text
//! [4 bytes: big-endian u32 payload length L][L bytes: opaque payload]
//! ```
//!
//! Requests carry encoded image bytes, replies carry a UTF-8 JSON array of
//! detections (or nothing at all when the server is configured not to return
//! coordinates).
//!
//! # Components
//!
//! - `FrameCodec`: `tokio_util` codec for the format above, used by the client via `Framed`
//! - `Connection`: buffered read side of a server connection, reads header and payload
//!   as separate steps so the server can track where an exchange stalled
//! - `FrameWriter`: buffered write side

pub use connection::{Connection, FrameWriter};
pub use frame::{read_frame, write_frame, FrameCodec, FrameError, HEADER_LEN};
mod connection;
mod frame;
