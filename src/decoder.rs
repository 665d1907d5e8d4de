//! Packet payload decoding
//!
//! Packets arrive encoded; the ring stores interleaved 16-bit stereo. A
//! [`Decoder`] turns one payload into PCM before it is inserted.

use thiserror::Error;

/// Errors reported by a packet decoder
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload length does not describe a whole number of frames
    #[error("truncated payload: {len} bytes is not a multiple of {frame_bytes}")]
    Truncated {
        /// Length of the payload in bytes
        len: usize,
        /// Size of one interleaved frame in bytes
        frame_bytes: usize,
    },

    /// Decoded packet holds more frames than a slot can carry
    #[error("packet of {frames} frames exceeds slot capacity of {capacity}")]
    Oversized {
        /// Frames in the packet
        frames: usize,
        /// Frames a slot can hold
        capacity: usize,
    },

    /// Codec-specific failure
    #[error("codec error: {0}")]
    Codec(String),
}

/// Decodes one packet payload into interleaved 16-bit stereo
pub trait Decoder: Send {
    /// Decode `packet` into `out`, replacing its contents.
    ///
    /// Returns the number of frames produced.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the payload is malformed.
    fn decode(&mut self, packet: &[u8], out: &mut Vec<i16>) -> Result<usize, DecodeError>;
}

impl<T: Decoder + ?Sized> Decoder for Box<T> {
    fn decode(&mut self, packet: &[u8], out: &mut Vec<i16>) -> Result<usize, DecodeError> {
        (**self).decode(packet, out)
    }
}

/// Uncompressed big-endian 16-bit stereo (RTP L16)
#[derive(Debug, Clone, Copy)]
pub struct PcmDecoder {
    max_frames: usize,
}

impl PcmDecoder {
    const FRAME_BYTES: usize = 4;

    /// Decoder that rejects packets longer than `max_frames`
    #[must_use]
    pub fn new(max_frames: usize) -> Self {
        Self { max_frames }
    }
}

impl Decoder for PcmDecoder {
    fn decode(&mut self, packet: &[u8], out: &mut Vec<i16>) -> Result<usize, DecodeError> {
        if packet.len() % Self::FRAME_BYTES != 0 {
            return Err(DecodeError::Truncated {
                len: packet.len(),
                frame_bytes: Self::FRAME_BYTES,
            });
        }
        let frames = packet.len() / Self::FRAME_BYTES;
        if frames > self.max_frames {
            return Err(DecodeError::Oversized {
                frames,
                capacity: self.max_frames,
            });
        }
        out.clear();
        out.extend(
            packet
                .chunks_exact(2)
                .map(|b| i16::from_be_bytes([b[0], b[1]])),
        );
        Ok(frames)
    }
}
