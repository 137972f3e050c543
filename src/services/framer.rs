//! RS-485 stream framing
//!
//! The gateway hands the bridge arbitrary chunks of the serial byte stream,
//! so frame boundaries never line up with read boundaries. The framer keeps
//! the unconsumed tail of the previous chunk and re-scans once more bytes
//! arrive; a start byte whose frame fails checksum validation is treated as
//! spurious and scanning resumes one byte later.

use crate::domain::protocol::{self, FRAME_START, HEADER_LEN};
use bytes::{Buf, BytesMut};

pub struct Framer {
    residue: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self { residue: BytesMut::with_capacity(256) }
    }

    /// Append a chunk of gateway bytes and extract every complete, valid
    /// frame, in arrival order. Partial frames stay buffered for the next
    /// call, so chunk boundaries never change the emitted frame sequence.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.residue.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let buf = &self.residue[..];
        let len = buf.len();
        let mut k = 0;

        while k < len {
            if buf[k] != FRAME_START {
                k += 1;
                continue;
            }
            // Need the header through the length byte to size the frame
            if k + HEADER_LEN > len {
                break;
            }
            let total = protocol::frame_len(buf[k + 4]);
            if k + total > len {
                break;
            }
            let candidate = &buf[k..k + total];
            if protocol::validate(candidate) {
                frames.push(candidate.to_vec());
                k += total;
            } else {
                k += 1;
            }
        }

        self.residue.advance(k);
        frames
    }

    /// Bytes currently held back as a partial frame
    pub fn residue_len(&self) -> usize {
        self.residue.len()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
