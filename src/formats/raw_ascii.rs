//! YD RAW / Actisense RAW ASCII lines.
//!
//! `hh:mm:ss.ddd D msgid b0 b1 .. b7` where `D` is `R` for frames received
//! from the bus and `T` for frames the gateway transmitted for us. The two
//! vendors' formats are byte compatible and share this parser.

use nmea2k::CanFrame;

use super::Direction;

/// One parsed RAW ASCII line.
#[derive(Debug)]
pub struct RawLine {
    pub direction: Direction,
    pub frame: CanFrame,
}

/// Parse a single line. Returns None on any malformed field; the caller
/// drops the line and keeps going.
pub fn parse_line(line: &str) -> Option<RawLine> {
    let mut fields = line.split_whitespace();

    let _time = fields.next()?;
    let direction = match fields.next()? {
        "R" => Direction::Received,
        "T" => Direction::Transmitted,
        _ => return None,
    };
    let id = u32::from_str_radix(fields.next()?, 16).ok()?;

    // up to 8 data bytes, zero padded
    let mut data = [0u8; 8];
    let mut count = 0;
    for field in fields.take(8) {
        data[count] = u8::from_str_radix(field, 16).ok()?;
        count += 1;
    }
    if count == 0 {
        return None;
    }

    Some(RawLine {
        direction,
        frame: CanFrame::new(id, data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame_line() {
        let line = "10:20:30.000 R 15FD0800 FF 00 01 CA 6F FF FF FF";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.direction, Direction::Received);
        assert_eq!(parsed.frame.id, 0x15FD0800);
        assert_eq!(parsed.frame.data, [0xFF, 0x00, 0x01, 0xCA, 0x6F, 0xFF, 0xFF, 0xFF]);

        let header = parsed.frame.header();
        assert_eq!(header.pgn, 0x1FD08);
        assert_eq!(header.priority, 5);
        assert_eq!(header.source, 0x00);
    }

    #[test]
    fn test_transmit_echo_direction() {
        let line = "17:33:21.141 T 18EAFF00 14 F0 01";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.direction, Direction::Transmitted);
        assert_eq!(parsed.frame.id, 0x18EAFF00);
        // short frames are zero padded
        assert_eq!(parsed.frame.data[3..], [0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(parse_line("").is_none());
        assert!(parse_line("10:20:30.000").is_none());
        assert!(parse_line("10:20:30.000 X 15FD0800 FF").is_none());
        assert!(parse_line("10:20:30.000 R ZZZZ FF").is_none());
        assert!(parse_line("10:20:30.000 R 15FD0800").is_none());
        assert!(parse_line("10:20:30.000 R 15FD0800 GG").is_none());
    }
}
