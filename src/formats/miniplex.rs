//! MiniPlex `$MXPGN` sentences.
//!
//! `$MXPGN,<pgn>,<attribute>,<payload>*<crc>` where the 16-bit attribute
//! word packs the send bit (15), priority (12..14), DLC (8..11) and the
//! device address (0..7). The payload hex string is ordered most significant
//! byte first, so it decodes in reverse. The sentence carries one CAN frame;
//! fast packet PGNs still need assembly downstream.

use nmea2k::{CanFrame, build_can_id};

use super::decode_hex;

pub fn parse_line(line: &str) -> Option<CanFrame> {
    let mut fields = line.split(',');

    if fields.next()? != "$MXPGN" {
        return None;
    }
    let pgn = u32::from_str_radix(fields.next()?, 16).ok()?;
    let attribute = u16::from_str_radix(fields.next()?, 16).ok()?;
    let payload_hex = fields.next()?.split('*').next()?;
    let raw = decode_hex(payload_hex)?;
    if raw.len() > 8 {
        return None;
    }

    let priority = ((attribute >> 12) & 0x07) as u8;
    let address = (attribute & 0xFF) as u8;

    // reverse into bus order
    let mut data = [0u8; 8];
    for (i, byte) in raw.iter().rev().enumerate() {
        data[i] = *byte;
    }

    let id = build_can_id(priority, address, 0xFF, pgn);
    Some(CanFrame::new(id, data))
}

/// Number of data bytes the attribute word declares.
pub fn attribute_dlc(attribute: u16) -> usize {
    ((attribute >> 8) & 0x0F) as usize
}
