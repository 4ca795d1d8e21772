//! SeaSmart `$PCDIN` sentences.
//!
//! `$PCDIN,<pgn>,<timestamp>,<source>,<payload>*<crc>`. The sentence
//! carries a complete message body. Priority is not on the wire and is
//! reported as 3; destination is always broadcast.

use nmea2k::PgnMessage;

use super::decode_hex;

const SEASMART_PRIORITY: u8 = 3;

pub fn parse_line(line: &str) -> Option<PgnMessage> {
    let mut fields = line.split(',');

    if fields.next()? != "$PCDIN" {
        return None;
    }
    let pgn = u32::from_str_radix(fields.next()?, 16).ok()?;
    let timestamp = u32::from_str_radix(fields.next()?, 16).ok()?;
    let source = u8::from_str_radix(fields.next()?, 16).ok()?;
    let payload_hex = fields.next()?.split('*').next()?;
    let payload = decode_hex(payload_hex)?;

    Some(PgnMessage::received(
        SEASMART_PRIORITY,
        pgn,
        0xFF,
        source,
        timestamp,
        &payload,
    ))
}
