//! Frame model and wire-header encoding.

use crate::config::{FRAME_HEADER_LEN, FRAME_SIGNATURE};
use crate::error::{GateError, Result};
use bytes::{BufMut, BytesMut};

/// One complete protocol message.
///
/// Constructed by the reassembler once enough bytes are buffered, or by the
/// send path before encryption. Immutable once handed upward; discarded
/// after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Opcode byte routed on by the dispatch layer
    pub opcode: u8,
    /// Per-connection sequence number stamped by the sender
    pub sequence: u8,
    /// Opaque payload bytes (encrypted on the wire)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Total bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Value of the 16-bit length field: opcode + sequence + payload.
    pub fn length_field(&self) -> usize {
        2 + self.payload.len()
    }

    /// Append the encoded frame to `buf`.
    ///
    /// Callers are responsible for checking `wire_len()` against the
    /// configured maximum before encoding.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.wire_len());
        buf.put_u8(FRAME_SIGNATURE);
        buf.put_u16(self.length_field() as u16);
        buf.put_u8(self.opcode);
        buf.put_u8(self.sequence);
        buf.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf
    }
}

/// Encode a frame header directly into a byte vector, returning the range
/// the payload will occupy. Used by the send path to build frames inside
/// pooled regions without an intermediate [`Frame`].
pub fn write_header(out: &mut Vec<u8>, opcode: u8, sequence: u8) {
    out.push(FRAME_SIGNATURE);
    out.extend_from_slice(&[0, 0]); // patched by finish_header
    out.push(opcode);
    out.push(sequence);
}

/// Patch the length field of a frame previously started with
/// [`write_header`], once the (possibly encrypted) payload is in place.
pub fn finish_header(out: &mut [u8]) -> Result<()> {
    if out.len() < FRAME_HEADER_LEN {
        return Err(GateError::InvalidLength(out.len()));
    }
    let length_field = out.len() - 3;
    if length_field > u16::MAX as usize {
        return Err(GateError::OversizedFrame(out.len()));
    }
    out[1..3].copy_from_slice(&(length_field as u16).to_be_bytes());
    Ok(())
}

/// Borrowed view of one frame inside the rolling receive buffer.
///
/// Valid only for the duration of a single reassembly pass; the underlying
/// buffer is shifted once the pass completes.
#[derive(Debug)]
pub struct FrameView<'a> {
    pub opcode: u8,
    pub sequence: u8,
    pub payload: &'a [u8],
}

impl FrameView<'_> {
    /// Copy this view into an owned [`Frame`].
    pub fn to_owned(&self) -> Frame {
        Frame {
            opcode: self.opcode,
            sequence: self.sequence,
            payload: self.payload.to_vec(),
        }
    }
}
