//! Actisense N2K ASCII lines.
//!
//! `A<time> <src><dst><prio> <pgn> <payload hex>`. The second field packs
//! source, destination and priority into five hex digits and the payload is
//! the complete message body, so no fast packet assembly is needed.

use nmea2k::PgnMessage;

use super::decode_hex;

pub fn parse_line(line: &str) -> Option<PgnMessage> {
    let mut fields = line.split_whitespace();

    let _time = fields.next()?; // "A083559.523"
    let prio_addr = u32::from_str_radix(fields.next()?, 16).ok()?;
    let pgn = u32::from_str_radix(fields.next()?, 16).ok()?;
    let payload = decode_hex(fields.next()?)?;

    let priority = (prio_addr & 0x0F) as u8;
    let destination = ((prio_addr >> 4) & 0xFF) as u8;
    let source = ((prio_addr >> 12) & 0xFF) as u8;

    Some(PgnMessage::new(priority, pgn, destination, source, &payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let line = "A186354.922 23FF7 1F513 012F3070002F30700A00F800FFFFFF";
        let msg = parse_line(line).unwrap();
        assert_eq!(msg.pgn(), 0x1F513);
        assert_eq!(msg.priority(), 7);
        assert_eq!(msg.destination(), 0xFF);
        assert_eq!(msg.source(), 0x23);
        assert_eq!(msg.payload().len(), 15);
        assert_eq!(msg.payload()[0], 0x01);
        assert_eq!(msg.payload()[14], 0xFF);
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(parse_line("").is_none());
        assert!(parse_line("A186354.922 23FF7").is_none());
        assert!(parse_line("A186354.922 XYZ 1F513 00").is_none());
        assert!(parse_line("A186354.922 23FF7 1F513 0").is_none());
    }
}
