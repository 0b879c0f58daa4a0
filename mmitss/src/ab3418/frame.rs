//! Streaming reassembly of AB3418 frames from serial reads. Frames are
//! flag-bounded spans; two consecutive flags separate adjacent frames. The
//! parser buffers partial tails between reads and yields complete frames as
//! a lending iterator of `Result<Frame, FrameError>`.

use crate::bytes::{byte_unstuff, fcs16, FLAG};
use crate::error::FrameError;

/// Anything shorter cannot carry addr/control/ipi/type plus FCS
pub const MIN_FRAME_LEN: usize = 7;
/// Longest legal frame on this link, used to bound buffering
pub const MAX_FRAME_LEN: usize = 256;

/// One de-stuffed AB3418 frame without its bounding flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub(crate) fn from_span(span: &[u8]) -> Result<Frame, FrameError> {
        let bytes = byte_unstuff(span)?;
        // addr control ipi messType + 2-byte FCS at minimum
        if bytes.len() < MIN_FRAME_LEN - 1 {
            return Err(FrameError::FrameTooShort {
                got: bytes.len() + 2,
            });
        }
        Ok(Frame { bytes })
    }

    pub fn address(&self) -> u8 {
        self.bytes[0]
    }

    pub fn control(&self) -> u8 {
        self.bytes[1]
    }

    pub fn ipi(&self) -> u8 {
        self.bytes[2]
    }

    pub fn mess_type(&self) -> u8 {
        self.bytes[3]
    }

    /// Frame content between the message type and the FCS.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[4..self.bytes.len() - 2]
    }

    /// Whole de-stuffed frame including header and FCS bytes.
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    /// Length including the two flag bytes, for poll-table size checks.
    pub fn wire_len(&self) -> usize {
        self.bytes.len() + 2
    }

    /// Validates the little-endian FCS over everything before it.
    pub fn verify_fcs(&self) -> Result<(), FrameError> {
        let body = &self.bytes[..self.bytes.len() - 2];
        let tail = &self.bytes[self.bytes.len() - 2..];
        let got = u16::from_le_bytes([tail[0], tail[1]]);
        let expect = fcs16(body);
        if expect == got {
            Ok(())
        } else {
            Err(FrameError::InvalidFcs { expect, got })
        }
    }
}

/// Streaming frame parser with an internal carry-over buffer.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser::default()
    }

    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// Appends freshly read serial bytes and returns an iterator that yields
    /// the complete frames now available.
    pub fn consume<'a>(&'a mut self, new_data: &[u8]) -> FrameIter<'a> {
        self.buf.extend_from_slice(new_data);
        // drop garbage before the first flag
        if let Some(pos) = self.buf.iter().position(|&b| b == FLAG) {
            if pos > 0 {
                self.buf.drain(..pos);
            }
        } else {
            self.buf.clear();
        }
        // an unbounded flagless tail means a desynchronized link
        if self.buf.len() > 4 * MAX_FRAME_LEN {
            let keep = self.buf.len() - MAX_FRAME_LEN;
            self.buf.drain(..keep);
        }
        FrameIter { parser: self }
    }
}

/// Lending iterator over frames in a [`FrameParser`] buffer
pub struct FrameIter<'a> {
    parser: &'a mut FrameParser,
}

impl FrameIter<'_> {
    #[allow(
        clippy::should_implement_trait,
        reason = "This is a lending iterator, which is not in std"
    )]
    /// Parse and return the next [`Frame`], or `None` when the buffer cannot
    /// yield another complete frame.
    pub fn next(&mut self) -> Option<Result<Frame, FrameError>> {
        loop {
            let buf = &self.parser.buf;
            let start = buf.iter().position(|&b| b == FLAG)?;
            // find the closing flag after a non-empty span
            let mut end = None;
            for (i, &b) in buf.iter().enumerate().skip(start + 1) {
                if b == FLAG {
                    end = Some(i);
                    break;
                }
            }
            let end = end?;
            if end == start + 1 {
                // back-to-back flags: the first closes a previous frame (or
                // is noise), resynchronize on the second
                self.parser.buf.drain(..end);
                continue;
            }
            let result = Frame::from_span(&self.parser.buf[start + 1..end]);
            // the closing flag doubles as the next frame's opening flag
            self.parser.buf.drain(..end);
            return Some(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::{append_fcs, byte_stuff};

    fn build_frame(addr: u8, mess_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![FLAG, addr, 0x13, 0xC0, mess_type];
        frame.extend_from_slice(payload);
        append_fcs(&mut frame);
        let mut wire = byte_stuff(&frame);
        wire.push(FLAG);
        wire
    }

    #[test]
    fn single_frame_roundtrip() {
        let wire = build_frame(0x05, 0xCE, &[1, 2, 3, 4]);
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        let frame = it.next().unwrap().unwrap();
        assert_eq!(frame.address(), 0x05);
        assert_eq!(frame.mess_type(), 0xCE);
        assert_eq!(frame.payload(), &[1, 2, 3, 4]);
        assert!(frame.verify_fcs().is_ok());
        assert!(it.next().is_none());
    }

    #[test]
    fn split_across_reads() {
        let wire = build_frame(0x05, 0xC8, &[9; 30]);
        let mut parser = FrameParser::new();
        {
            let mut it = parser.consume(&wire[..10]);
            assert!(it.next().is_none());
        }
        let mut it = parser.consume(&wire[10..]);
        let frame = it.next().unwrap().unwrap();
        assert_eq!(frame.mess_type(), 0xC8);
        assert!(it.next().is_none());
    }

    #[test]
    fn consecutive_frames_share_a_flag() {
        let mut wire = build_frame(0x05, 0xCE, &[1; 30]);
        wire.extend_from_slice(&build_frame(0x05, 0xC8, &[2; 30]));
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        assert_eq!(it.next().unwrap().unwrap().mess_type(), 0xCE);
        assert_eq!(it.next().unwrap().unwrap().mess_type(), 0xC8);
        assert!(it.next().is_none());
    }

    #[test]
    fn garbage_before_first_flag_is_skipped() {
        let mut wire = vec![0x11, 0x22, 0x33];
        wire.extend_from_slice(&build_frame(0x05, 0xCE, &[7; 8]));
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        assert_eq!(it.next().unwrap().unwrap().mess_type(), 0xCE);
    }

    #[test]
    fn short_span_is_rejected() {
        let wire = [FLAG, 0x05, 0x13, FLAG];
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        assert!(matches!(
            it.next(),
            Some(Err(FrameError::FrameTooShort { .. }))
        ));
    }

    #[test]
    fn corrupted_fcs_detected() {
        let mut wire = build_frame(0x05, 0xCE, &[1, 2, 3]);
        let n = wire.len();
        wire[n - 2] ^= 0xFF; // flip one FCS byte
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        let frame = it.next().unwrap().unwrap();
        assert!(matches!(
            frame.verify_fcs(),
            Err(FrameError::InvalidFcs { .. })
        ));
    }

    #[test]
    fn stuffed_payload_bytes_survive() {
        let wire = build_frame(0x05, 0xCE, &[0x7E, 0x7D, 0x42]);
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        let frame = it.next().unwrap().unwrap();
        assert_eq!(frame.payload(), &[0x7E, 0x7D, 0x42]);
        assert!(frame.verify_fcs().is_ok());
    }
}
