//! Encoding of outgoing messages into the detected wire format.
//!
//! The encoder turns a logical `(priority, pgn, destination, payload)` into
//! one or more wire buffers. Fast packet PGNs and payloads over eight bytes
//! fragment into multiple frames; the rolling sequence counter advances after
//! every fragmented message so receivers can tell consecutive sequences
//! apart.

use chrono::Utc;
use nmea2k::{build_can_id, fragment, is_fast_packet_pgn};

use crate::detector::WireFormat;

/// Step applied to the sequence counter after each fragmented transmission.
/// Advances the 3-bit sequence id in the upper bits of the first data byte;
/// the lower five bits must stay clear for the frame index, so the step is a
/// multiple of 32.
const ORDER_STEP: u8 = 32;

pub struct TxEncoder {
    m_order: u8,
}

impl TxEncoder {
    pub fn new() -> Self {
        TxEncoder { m_order: 0 }
    }

    /// Current sequence counter, exposed for tests and diagnostics.
    pub fn order(&self) -> u8 {
        self.m_order
    }

    /// Encode one outgoing message. Returns an empty list for wire formats
    /// without a transmit path (binary Actisense and SeaSmart).
    pub fn encode(
        &mut self,
        format: WireFormat,
        priority: u8,
        pgn: u32,
        destination: u8,
        payload: &[u8],
    ) -> Vec<Vec<u8>> {
        match format {
            WireFormat::YdRaw | WireFormat::ActisenseRawAscii => {
                self.encode_raw_ascii(priority, pgn, destination, payload)
            }
            WireFormat::ActisenseN2kAscii => {
                vec![encode_n2k_ascii(priority, pgn, destination, payload)]
            }
            WireFormat::MiniPlex => self.encode_miniplex(priority, pgn, destination, payload),
            _ => Vec::new(),
        }
    }

    /// YD RAW lines: `<canid> <b0> .. <bn>\r\n`. Source stays 0 so the
    /// gateway substitutes its claimed bus address.
    fn encode_raw_ascii(
        &mut self,
        priority: u8,
        pgn: u32,
        destination: u8,
        payload: &[u8],
    ) -> Vec<Vec<u8>> {
        let can_id = build_can_id(priority, 0, destination, pgn);

        if !is_fast_packet_pgn(pgn) && payload.len() <= 8 {
            return vec![raw_ascii_line(can_id, payload)];
        }

        let frames = fragment(self.m_order, payload);
        let lines = frames.iter().map(|f| raw_ascii_line(can_id, f)).collect();
        self.m_order = self.m_order.wrapping_add(ORDER_STEP);
        lines
    }

    fn encode_miniplex(
        &mut self,
        priority: u8,
        pgn: u32,
        destination: u8,
        payload: &[u8],
    ) -> Vec<Vec<u8>> {
        if !is_fast_packet_pgn(pgn) && payload.len() <= 8 {
            return vec![miniplex_sentence(priority, pgn, destination, payload)];
        }

        let frames = fragment(self.m_order, payload);
        let lines = frames
            .iter()
            .map(|f| miniplex_sentence(priority, pgn, destination, f))
            .collect();
        self.m_order = self.m_order.wrapping_add(ORDER_STEP);
        lines
    }
}

impl Default for TxEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn raw_ascii_line(can_id: u32, data: &[u8]) -> Vec<u8> {
    let mut line = format!("{:08X}", can_id);
    for byte in data {
        line.push_str(&format!(" {:02X}", byte));
    }
    line.push_str("\r\n");
    line.into_bytes()
}

/// N2K ASCII carries any payload length in a single line:
/// `A<HHMMSS.mmm> <src><dst><prio> <pgn> <payload>\r\n`.
fn encode_n2k_ascii(priority: u8, pgn: u32, destination: u8, payload: &[u8]) -> Vec<u8> {
    let time = Utc::now().format("%H%M%S%.3f");
    let mut line = format!(
        "A{} {:02X}{:02X}{:1X} {:05X} ",
        time,
        0, // source assigned by the gateway
        destination,
        priority & 0x0F,
        pgn
    );
    for byte in payload {
        line.push_str(&format!("{:02X}", byte));
    }
    line.push_str("\r\n");
    line.into_bytes()
}

/// One `$MXPGN` sentence for a single CAN frame worth of data. The attribute
/// word carries the send bit, priority, DLC and destination; payload hex is
/// written most significant byte first and the sentence closes with the
/// NMEA-style XOR checksum.
fn miniplex_sentence(priority: u8, pgn: u32, destination: u8, data: &[u8]) -> Vec<u8> {
    let attribute: u16 = 0x8000
        | ((priority as u16 & 0x07) << 12)
        | ((data.len() as u16 & 0x0F) << 8)
        | destination as u16;

    let mut body = format!("MXPGN,{:06X},{:04X},", pgn, attribute);
    for byte in data.iter().rev() {
        body.push_str(&format!("{:02X}", byte));
    }
    let crc = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${}*{:02X}\r\n", body, crc).into_bytes()
}
