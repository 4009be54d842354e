//! Frame decoder.
//!
//! A three-phase automaton that rebuilds frames one byte at a time. Because
//! every byte is handled individually, the frames produced do not depend on
//! how the stream was split into reads.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

use super::sink::FrameSink;

/// Frames declaring this many payload bytes or more are rejected.
pub const MAX_DATA_LENGTH: usize = 256;

/// Size of the little-endian length prefix.
pub const HEADER_LEN: usize = 2;

/// What the decoder expects the next byte to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Low byte of the length prefix.
    AwaitLengthLow,
    /// High byte of the length prefix.
    AwaitLengthHigh,
    /// A payload byte.
    AwaitData,
}

/// Framing violations. Any of these ends the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("data length too large: {length} bytes (must be below {max})")]
    TooLarge { length: usize, max: usize },
}

/// Per-connection decoder state.
///
/// State survives across calls to [`Decoder::decode`], so a length prefix or
/// payload may be split over any number of reads. After an error the decoder
/// must be discarded together with its connection.
#[derive(Debug)]
pub struct Decoder {
    phase: Phase,
    /// Declared payload length; meaningful once both prefix bytes are read.
    expected_length: usize,
    /// Payload bytes of the frame in progress.
    buffer: BytesMut,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitLengthLow,
            expected_length: 0,
            buffer: BytesMut::with_capacity(MAX_DATA_LENGTH),
        }
    }

    /// Feed one received chunk into the automaton.
    ///
    /// Every completed frame is handed to `sink` in order. Returns the number
    /// of frames completed by this chunk. On an oversized length the rest of
    /// the chunk is left unprocessed.
    pub fn decode<S>(&mut self, chunk: &[u8], sink: &mut S) -> Result<usize, FrameError>
    where
        S: FrameSink + ?Sized,
    {
        let mut completed = 0;

        for &byte in chunk {
            trace!(phase = ?self.phase, "{byte:02X}");
            if self.step(byte, sink)? {
                completed += 1;
            }
        }

        Ok(completed)
    }

    /// Current phase of the automaton.
    #[allow(dead_code)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Declared length of the frame being assembled, if any.
    #[allow(dead_code)]
    pub fn expected_length(&self) -> Option<usize> {
        match self.phase {
            Phase::AwaitData => Some(self.expected_length),
            _ => None,
        }
    }

    /// Payload bytes accumulated for the frame in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True when no partial frame (prefix or payload) is in flight.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::AwaitLengthLow
    }

    /// Apply the transition for a single byte. Returns true if it completed a frame.
    fn step<S>(&mut self, byte: u8, sink: &mut S) -> Result<bool, FrameError>
    where
        S: FrameSink + ?Sized,
    {
        match self.phase {
            Phase::AwaitLengthLow => {
                self.expected_length = usize::from(byte);
                self.phase = Phase::AwaitLengthHigh;
                Ok(false)
            }
            Phase::AwaitLengthHigh => {
                self.expected_length += usize::from(byte) << 8;
                if self.expected_length >= MAX_DATA_LENGTH {
                    return Err(FrameError::TooLarge {
                        length: self.expected_length,
                        max: MAX_DATA_LENGTH,
                    });
                }

                self.buffer.clear();

                // No payload byte will ever arrive to trigger completion.
                if self.expected_length == 0 {
                    self.complete(sink);
                    return Ok(true);
                }

                self.buffer.reserve(self.expected_length);
                self.phase = Phase::AwaitData;
                Ok(false)
            }
            Phase::AwaitData => {
                self.buffer.put_u8(byte);
                if self.buffer.len() == self.expected_length {
                    self.complete(sink);
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    fn complete<S>(&mut self, sink: &mut S)
    where
        S: FrameSink + ?Sized,
    {
        let frame = self.buffer.split().freeze();
        self.expected_length = 0;
        self.phase = Phase::AwaitLengthLow;
        sink.deliver(frame);
    }
}

/// Encode a payload as a frame: 2-byte little-endian length, then the payload.
#[allow(dead_code)]
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.len() >= MAX_DATA_LENGTH {
        return Err(FrameError::TooLarge {
            length: payload.len(),
            max: MAX_DATA_LENGTH,
        });
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u16_le(payload.len() as u16);
    frame.extend_from_slice(payload);
    Ok(frame.freeze())
}
