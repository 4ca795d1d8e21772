//! Parsers for the six gateway wire encodings.
//!
//! Three encodings are binary with escaped DLE framing (Actisense N2K, RAW
//! and NGT), three are line oriented ASCII (YD/Actisense RAW ASCII, N2K
//! ASCII, SeaSmart and MiniPlex sentences). All of them read from the
//! receive ring and emit either raw CAN frames, which still need fast packet
//! assembly, or complete messages.

pub mod actisense;
pub mod miniplex;
pub mod n2k_ascii;
pub mod raw_ascii;
pub mod seasmart;

use nmea2k::{CanFrame, PgnMessage};

use crate::ring_buffer::RingBuffer;

/// What a wire parser produced from the stream.
#[derive(Debug)]
pub enum ParsedItem {
    /// A single CAN frame; goes through the fast packet dispatcher.
    Frame(CanFrame),
    /// An already complete message.
    Message(PgnMessage),
}

/// Direction marker on YD RAW lines: whether the gateway received the frame
/// from the bus or echoed one of our transmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Received,
    Transmitted,
}

/// Longest sentence any of the ASCII encodings can produce; anything longer
/// is line noise and gets dropped.
const MAX_LINE_LEN: usize = 1024;

/// Accumulates bytes from the ring into complete text lines.
///
/// Carriage returns are stripped, line feeds terminate a line. State
/// persists across chunks so sentences split over TCP segment boundaries
/// reassemble correctly.
pub struct LineAccumulator {
    line: Vec<u8>,
}

impl LineAccumulator {
    pub fn new() -> Self {
        LineAccumulator { line: Vec::new() }
    }

    /// Drain the ring, returning every line completed by the new bytes.
    pub fn drain(&mut self, ring: &RingBuffer) -> Vec<String> {
        let mut lines = Vec::new();
        while !ring.is_empty() {
            match ring.get() {
                b'\n' => {
                    let raw = std::mem::take(&mut self.line);
                    if let Ok(line) = String::from_utf8(raw) {
                        if !line.is_empty() {
                            lines.push(line);
                        }
                    }
                }
                b'\r' => {}
                byte => {
                    if self.line.len() >= MAX_LINE_LEN {
                        self.line.clear();
                    }
                    self.line.push(byte);
                }
            }
        }
        lines
    }

    pub fn reset(&mut self) {
        self.line.clear();
    }
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a string of hex byte pairs.
pub(crate) fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_accumulator_strips_cr_and_splits() {
        let ring = RingBuffer::new(256);
        let mut lines = LineAccumulator::new();
        ring.put_all(b"first\r\nsecond\nthird");
        let out = lines.drain(&ring);
        assert_eq!(out, vec!["first".to_string(), "second".to_string()]);
        // "third" is still pending
        ring.put_all(b" part\r\n");
        let out = lines.drain(&ring);
        assert_eq!(out, vec!["third part".to_string()]);
    }

    #[test]
    fn test_line_accumulator_spans_chunks() {
        let ring = RingBuffer::new(256);
        let mut lines = LineAccumulator::new();
        for chunk in [&b"$MXP"[..], &b"GN,01F119,"[..], &b"3816,AA*00\r\n"[..]] {
            ring.put_all(chunk);
        }
        let out = lines.drain(&ring);
        assert_eq!(out, vec!["$MXPGN,01F119,3816,AA*00".to_string()]);
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("FF00A3"), Some(vec![0xFF, 0x00, 0xA3]));
        assert_eq!(decode_hex(""), Some(vec![]));
        assert_eq!(decode_hex("F"), None);
        assert_eq!(decode_hex("ZZ"), None);
    }
}
