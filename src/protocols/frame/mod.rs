//! Length-prefixed frame protocol.
//!
//! Every message on the wire is a 16-bit little-endian length followed by
//! that many payload bytes:
//!
//! ```text
//! ┌────────────┬─────────────┬──────────────────────────────┐
//! │ len lo (1) │ len hi (1)  │  payload (lo + 256*hi bytes) │
//! └────────────┴─────────────┴──────────────────────────────┘
//!
//! Example:
//! 02 00 AA BB   -> payload [AA BB]
//! 00 00         -> empty payload
//! 00 01         -> rejected (256 is not below the limit)
//! ```
//!
//! No checksum, no delimiter. Declared lengths of [`MAX_DATA_LENGTH`] or
//! more are a protocol violation and close the connection.
//!
//! Read boundaries have nothing to do with frame boundaries: a read may end
//! between the two length bytes, in the middle of a payload, or carry several
//! frames at once. The [`Decoder`] produces the same frames either way.

pub mod decoder;
pub mod handler;
pub mod sink;

#[allow(unused_imports)]
pub use decoder::{encode_frame, Decoder, FrameError, Phase, HEADER_LEN, MAX_DATA_LENGTH};
pub use handler::{handle_connection, CloseReason, ConnectionError, ConnectionOptions};
#[allow(unused_imports)]
pub use sink::{FrameSink, SinkFactory, TraceSink};
