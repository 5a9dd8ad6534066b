//! Stream-to-frame reassembly over a rolling receive buffer.
//!
//! The reassembler owns one fixed-capacity buffer per connection. Socket
//! reads land in the spare tail (`spare_mut`), and a reassembly pass then
//! walks the buffered bytes from the front, validating each header and
//! yielding complete frames. Unconsumed leftovers are shifted back to the
//! start of the buffer between passes, so a frame may arrive split across
//! any number of reads.
//!
//! Validation order is fixed: the signature byte is checked before the
//! length field is trusted, and the length field is bounds-checked before
//! any slicing. A buffer that fills without producing a single frame is a
//! fatal overflow.

use crate::config::{FRAME_HEADER_LEN, FRAME_SIGNATURE, MIN_FRAME_LEN};
use crate::core::frame::FrameView;
use crate::error::{GateError, Result};
use std::ops::Range;
use tracing::warn;

/// Location of one validated frame inside the rolling buffer.
///
/// Produced by [`FrameReassembler::next_frame`]; valid until the pass is
/// finished with [`FrameReassembler::finish_pass`] (which shifts the
/// buffer) or the reassembler is reset.
#[derive(Debug, Clone)]
pub struct FrameRef {
    pub opcode: u8,
    pub sequence: u8,
    /// Payload byte range inside the rolling buffer
    pub payload: Range<usize>,
}

/// Rolling-buffer reassembly state machine for one connection.
pub struct FrameReassembler {
    buf: Vec<u8>,
    /// Total valid bytes currently buffered
    count: usize,
    /// Bytes consumed from the front during the current pass
    offset: usize,
    max_frame_len: usize,
}

impl FrameReassembler {
    /// Create a reassembler with a fixed `buffer_len`-byte rolling buffer.
    pub fn new(buffer_len: usize, max_frame_len: usize) -> Self {
        Self {
            buf: vec![0u8; buffer_len],
            count: 0,
            offset: 0,
            max_frame_len,
        }
    }

    /// Spare tail of the rolling buffer for the next socket read.
    ///
    /// Only valid between passes; empty when the buffer is full.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        debug_assert_eq!(self.offset, 0, "spare_mut called mid-pass");
        &mut self.buf[self.count..]
    }

    /// Bytes currently buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.count - self.offset
    }

    /// Fatal overflow check: a full buffer with no complete frame means the
    /// peer is streaming garbage or a frame that can never complete.
    pub fn check_capacity(&self) -> Result<()> {
        if self.count == self.buf.len() {
            Err(GateError::BufferOverflow)
        } else {
            Ok(())
        }
    }

    /// Record `received` fresh bytes written into `spare_mut()`.
    pub fn advance(&mut self, received: usize) {
        debug_assert!(self.count + received <= self.buf.len());
        self.count += received;
    }

    /// Validate and consume the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Protocol violations
    /// (bad signature, hostile length) are fatal and must close the
    /// connection.
    pub fn next_frame(&mut self) -> Result<Option<FrameRef>> {
        if self.buffered() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let signature = self.buf[self.offset];
        if signature != FRAME_SIGNATURE {
            return Err(GateError::InvalidSignature(signature));
        }

        let length_field =
            u16::from_be_bytes([self.buf[self.offset + 1], self.buf[self.offset + 2]]) as usize;
        let frame_len = length_field + 3;

        if frame_len < MIN_FRAME_LEN {
            return Err(GateError::InvalidLength(frame_len));
        }
        if frame_len > self.max_frame_len {
            return Err(GateError::OversizedFrame(frame_len));
        }

        if self.buffered() < frame_len {
            // Incomplete; wait for more bytes
            return Ok(None);
        }

        let start = self.offset;
        self.offset += frame_len;

        Ok(Some(FrameRef {
            opcode: self.buf[start + 3],
            sequence: self.buf[start + 4],
            payload: start + FRAME_HEADER_LEN..start + frame_len,
        }))
    }

    /// Mutable payload bytes of a frame yielded by [`next_frame`].
    ///
    /// The cipher decrypts in place here: the frame aliases the rolling
    /// buffer, which is exactly why views never outlive the pass.
    ///
    /// [`next_frame`]: FrameReassembler::next_frame
    pub fn payload_mut(&mut self, frame: &FrameRef) -> &mut [u8] {
        &mut self.buf[frame.payload.clone()]
    }

    /// End the current pass: shift leftover bytes to the buffer front so the
    /// next read appends after them.
    pub fn finish_pass(&mut self) {
        if self.offset > 0 {
            self.buf.copy_within(self.offset..self.count, 0);
            self.count -= self.offset;
            self.offset = 0;
        }
    }

    /// Bytes already consumed from the front during the current pass.
    pub fn consumed(&self) -> usize {
        self.offset
    }

    /// Unconsumed bytes, capped at `max`. Used for violation diagnostics.
    pub fn peek(&self, max: usize) -> &[u8] {
        let end = self.count.min(self.offset + max);
        &self.buf[self.offset..end]
    }

    /// Abandon all buffered bytes.
    ///
    /// Used after a handler error, where the payload may have left the
    /// buffered stream in an inconsistent state.
    pub fn reset(&mut self) {
        self.count = 0;
        self.offset = 0;
    }

    /// Closure-driven reassembly pass over `received` fresh bytes.
    ///
    /// Yields zero or more frames to `sink` and returns how many were
    /// emitted. A sink error resets the buffer and ends the pass without
    /// failing the connection; protocol violations propagate as errors.
    pub fn feed<F>(&mut self, received: usize, mut sink: F) -> Result<usize>
    where
        F: FnMut(FrameView<'_>) -> Result<()>,
    {
        self.advance(received);
        let mut emitted = 0usize;

        loop {
            let frame = match self.next_frame()? {
                Some(frame) => frame,
                None => break,
            };

            let view = FrameView {
                opcode: frame.opcode,
                sequence: frame.sequence,
                payload: &self.buf[frame.payload.clone()],
            };

            if let Err(e) = sink(view) {
                warn!(error = %e, opcode = frame.opcode, "frame sink failed, resetting receive buffer");
                self.reset();
                return Ok(emitted);
            }
            emitted += 1;
        }

        self.finish_pass();
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::Frame;

    fn wire(opcode: u8, sequence: u8, payload: &[u8]) -> Vec<u8> {
        Frame {
            opcode,
            sequence,
            payload: payload.to_vec(),
        }
        .encode()
        .to_vec()
    }

    fn collect(r: &mut FrameReassembler, bytes: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut fed = 0;
        while fed < bytes.len() {
            let spare = r.spare_mut();
            let n = spare.len().min(bytes.len() - fed);
            spare[..n].copy_from_slice(&bytes[fed..fed + n]);
            fed += n;
            r.feed(n, |view| {
                frames.push(view.to_owned());
                Ok(())
            })?;
        }
        Ok(frames)
    }

    #[test]
    fn single_frame_one_read() {
        let mut r = FrameReassembler::new(1024, 256);
        let frames = collect(&mut r, &wire(0x05, 1, b"hello")).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, 0x05);
        assert_eq!(frames[0].sequence, 1);
        assert_eq!(frames[0].payload, b"hello");
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn byte_by_byte_yields_identical_frame() {
        let bytes = wire(0x31, 9, b"split me finely");

        let mut whole = FrameReassembler::new(1024, 256);
        let expected = collect(&mut whole, &bytes).unwrap();

        let mut r = FrameReassembler::new(1024, 256);
        let mut frames = Vec::new();
        for &b in &bytes {
            r.spare_mut()[0] = b;
            r.feed(1, |view| {
                frames.push(view.to_owned());
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(frames, expected);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn multiple_frames_one_read() {
        let mut bytes = wire(0x01, 0, b"a");
        bytes.extend(wire(0x02, 1, b"bb"));
        bytes.extend(wire(0x03, 2, b""));

        let mut r = FrameReassembler::new(1024, 256);
        let frames = collect(&mut r, &bytes).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].opcode, 0x03);
        assert!(frames[2].payload.is_empty());
    }

    #[test]
    fn leftover_carries_to_next_read() {
        let bytes = wire(0x10, 3, &[7u8; 40]);
        let (head, tail) = bytes.split_at(11);

        let mut r = FrameReassembler::new(1024, 256);
        let mut frames = Vec::new();

        r.spare_mut()[..head.len()].copy_from_slice(head);
        r.feed(head.len(), |_| panic!("no frame yet")).unwrap();
        assert_eq!(r.buffered(), head.len());

        r.spare_mut()[..tail.len()].copy_from_slice(tail);
        r.feed(tail.len(), |view| {
            frames.push(view.to_owned());
            Ok(())
        })
        .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![7u8; 40]);
    }

    #[test]
    fn bad_signature_is_fatal() {
        let mut r = FrameReassembler::new(64, 32);
        let bytes = [0x55u8, 0, 2, 1, 0];
        r.spare_mut()[..bytes.len()].copy_from_slice(&bytes);
        let err = r.feed(bytes.len(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, GateError::InvalidSignature(0x55)));
    }

    #[test]
    fn hostile_length_is_fatal_before_buffering() {
        let mut r = FrameReassembler::new(64, 32);
        // Declares a 0xFFFF+3 byte frame; must be rejected outright, not
        // buffered toward.
        let bytes = [0xAAu8, 0xFF, 0xFF, 1, 0];
        r.spare_mut()[..bytes.len()].copy_from_slice(&bytes);
        let err = r.feed(bytes.len(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, GateError::OversizedFrame(_)));
    }

    #[test]
    fn undersized_length_is_fatal() {
        let mut r = FrameReassembler::new(64, 32);
        // Length field 0 would make a 3-byte frame with no opcode/sequence.
        let bytes = [0xAAu8, 0x00, 0x00, 1, 0];
        r.spare_mut()[..bytes.len()].copy_from_slice(&bytes);
        let err = r.feed(bytes.len(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, GateError::InvalidLength(3)));
    }

    #[test]
    fn signature_checked_before_length() {
        let mut r = FrameReassembler::new(64, 32);
        // Both signature and length are bad; signature must win.
        let bytes = [0x00u8, 0xFF, 0xFF, 1, 0];
        r.spare_mut()[..bytes.len()].copy_from_slice(&bytes);
        let err = r.feed(bytes.len(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, GateError::InvalidSignature(0x00)));
    }

    #[test]
    fn full_buffer_without_frame_is_overflow() {
        let mut r = FrameReassembler::new(8, 16);
        // Valid header declaring a 16-byte frame that can never fit the
        // 8-byte buffer alongside its header backlog.
        let bytes = [0xAAu8, 0x00, 0x0D, 1, 2, 3, 4, 5];
        r.spare_mut()[..bytes.len()].copy_from_slice(&bytes);
        let emitted = r.feed(bytes.len(), |_| Ok(())).unwrap();
        assert_eq!(emitted, 0);
        assert!(matches!(
            r.check_capacity(),
            Err(GateError::BufferOverflow)
        ));
    }

    #[test]
    fn frame_exactly_filling_buffer_is_not_overflow() {
        let bytes = wire(0x09, 0, &[1u8; 11]); // 16 bytes on the wire
        assert_eq!(bytes.len(), 16);

        let mut r = FrameReassembler::new(16, 16);
        let (head, tail) = bytes.split_at(10);

        r.spare_mut()[..head.len()].copy_from_slice(head);
        r.feed(head.len(), |_| panic!("incomplete")).unwrap();
        r.check_capacity().unwrap();

        r.spare_mut()[..tail.len()].copy_from_slice(tail);
        let emitted = r
            .feed(tail.len(), |view| {
                assert_eq!(view.payload.len(), 11);
                Ok(())
            })
            .unwrap();
        assert_eq!(emitted, 1);
        r.check_capacity().unwrap();
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn sink_error_resets_buffer_without_fatal() {
        let mut bytes = wire(0x01, 0, b"first");
        bytes.extend(wire(0x02, 1, b"second"));

        let mut r = FrameReassembler::new(1024, 256);
        r.spare_mut()[..bytes.len()].copy_from_slice(&bytes);
        let emitted = r
            .feed(bytes.len(), |_| Err(GateError::Handler("boom".into())))
            .unwrap();

        // The failing frame is not counted and the remainder is abandoned.
        assert_eq!(emitted, 0);
        assert_eq!(r.buffered(), 0);
    }
}
