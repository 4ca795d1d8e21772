//! Binary Actisense framing: DLE-escaped frames shared by the N2K, RAW and
//! NGT encodings.
//!
//! Frames are delimited by `10 02` (start) and `10 03` (end); a literal 0x10
//! inside a frame is doubled. The three encodings differ only in the payload
//! of the frame, so one state machine serves all of them and the commit step
//! branches on the detected format.

use nmea2k::{CanFrame, PgnMessage};
use tracing::debug;

use super::ParsedItem;
use crate::detector::WireFormat;
use crate::ring_buffer::RingBuffer;

const DLE: u8 = 0x10;
const STX: u8 = 0x02;
const ETX: u8 = 0x03;

/// Frames longer than this cannot occur in any of the encodings.
const MAX_FRAME_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    OutOfMsg,
    SawEscape,
    InMsg,
    SawEscapeInMsg,
}

/// Incremental parser for the escaped binary framing.
pub struct ActisenseFrameParser {
    state: FrameState,
    buf: Vec<u8>,
}

impl ActisenseFrameParser {
    pub fn new() -> Self {
        ActisenseFrameParser {
            state: FrameState::OutOfMsg,
            buf: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.state = FrameState::OutOfMsg;
        self.buf.clear();
    }

    /// Drain the ring, appending every completed frame's product to `out`.
    pub fn drain(&mut self, ring: &RingBuffer, format: WireFormat, out: &mut Vec<ParsedItem>) {
        while !ring.is_empty() {
            let byte = ring.get();
            match self.state {
                FrameState::OutOfMsg => {
                    if byte == DLE {
                        self.state = FrameState::SawEscape;
                    }
                }
                FrameState::SawEscape => {
                    if byte == STX {
                        self.buf.clear();
                        self.state = FrameState::InMsg;
                    } else {
                        self.state = FrameState::OutOfMsg;
                    }
                }
                FrameState::InMsg => {
                    if byte == DLE {
                        self.state = FrameState::SawEscapeInMsg;
                    } else {
                        self.push(byte);
                    }
                }
                FrameState::SawEscapeInMsg => match byte {
                    DLE => {
                        // escaped literal 0x10
                        self.push(DLE);
                        self.state = FrameState::InMsg;
                    }
                    ETX => {
                        if let Some(item) = commit(&self.buf, format) {
                            out.push(item);
                        }
                        self.buf.clear();
                        self.state = FrameState::OutOfMsg;
                    }
                    STX => {
                        // restart marker inside a frame, begin over
                        self.buf.clear();
                        self.state = FrameState::InMsg;
                    }
                    _ => {
                        self.buf.clear();
                        self.state = FrameState::OutOfMsg;
                    }
                },
            }
        }
    }

    fn push(&mut self, byte: u8) {
        if self.buf.len() >= MAX_FRAME_LEN {
            // runaway frame, drop it
            self.buf.clear();
            self.state = FrameState::OutOfMsg;
            return;
        }
        self.buf.push(byte);
    }
}

impl Default for ActisenseFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn commit(data: &[u8], format: WireFormat) -> Option<ParsedItem> {
    match format {
        WireFormat::ActisenseN2k => process_n2k(data).map(ParsedItem::Message),
        WireFormat::ActisenseRaw => process_raw(data).map(ParsedItem::Frame),
        WireFormat::ActisenseNgt => {
            // The NGT encoding carries the canonical envelope verbatim.
            PgnMessage::from_raw(data.to_vec()).map(ParsedItem::Message)
        }
        _ => None,
    }
}

/// Actisense N2K frame: command byte, 16-bit length, addressing, PDU fields,
/// timestamp, then the payload with a trailing check byte.
fn process_n2k(data: &[u8]) -> Option<PgnMessage> {
    if data.len() < 15 {
        return None;
    }
    let declared = data[1] as usize | (data[2] as usize) << 8;
    if declared != data.len() - 1 {
        debug!("actisense n2k length mismatch: declared {declared}, frame {}", data.len());
        return None;
    }

    let destination = data[3];
    let source = data[4];
    let dprp = data[7];
    let priority = (dprp >> 2) & 0x07;
    let rdp = (dprp & 0x03) as u32;
    let pdu_format = data[6];
    let mut pgn = (rdp << 16) | (pdu_format as u32) << 8;
    if pdu_format >= 240 {
        pgn |= data[5] as u32;
    }

    let timestamp = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let payload = &data[13..data.len() - 1];

    Some(PgnMessage::received(priority, pgn, destination, source, timestamp, payload))
}

/// Actisense RAW frame: command byte, length, 16-bit timestamp, little-endian
/// CAN id, eight data bytes, check byte.
fn process_raw(data: &[u8]) -> Option<CanFrame> {
    if data.len() < 16 {
        return None;
    }
    if data[1] as usize + 3 != data.len() {
        debug!("actisense raw length mismatch: declared {}, frame {}", data[1], data.len());
        return None;
    }

    let id = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let mut frame = [0u8; 8];
    frame.copy_from_slice(&data[8..16]);
    Some(CanFrame::new(id, frame))
}
