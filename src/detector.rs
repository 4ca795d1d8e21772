//! Classification of incoming byte chunks into one of the known gateway
//! wire encodings.

/// The wire encodings emitted by the supported CAN-to-IP gateways.
///
/// `YdRaw` is byte-compatible with `ActisenseRawAscii` and is parsed by the
/// same path; the detector never returns it, but the transmit encoder
/// accepts it as an explicit target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    YdRaw,
    ActisenseRawAscii,
    ActisenseN2kAscii,
    ActisenseN2k,
    ActisenseRaw,
    ActisenseNgt,
    SeaSmart,
    MiniPlex,
    Undefined,
}

/// Classify one received chunk.
///
/// Detection is stateless and runs on every chunk as it arrives, not on
/// accumulated stream state: gateways emit homogeneous traffic, so any
/// complete chunk identifies the peer.
pub fn detect_format(chunk: &[u8]) -> WireFormat {
    if chunk.is_empty() {
        return WireFormat::Undefined;
    }

    if chunk.iter().all(|&b| b < 128) {
        if contains(chunk, b"$PCDIN") {
            WireFormat::SeaSmart
        } else if contains(chunk, b"$MXPGN") {
            WireFormat::MiniPlex
        } else if chunk.contains(&b':') {
            WireFormat::ActisenseRawAscii
        } else {
            WireFormat::ActisenseN2kAscii
        }
    } else if chunk.len() > 2 {
        // Binary Actisense framing: 0x10 0x02 <command>
        match chunk[2] {
            0x95 => WireFormat::ActisenseRaw,
            0xD0 => WireFormat::ActisenseN2k,
            0x93 => WireFormat::ActisenseNgt,
            _ => WireFormat::Undefined,
        }
    } else {
        WireFormat::Undefined
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seasmart() {
        let chunk = b"$PCDIN,01F205,000C72B2,02,FF050D3A1D4CFC00*55\r\n";
        assert_eq!(detect_format(chunk), WireFormat::SeaSmart);
    }

    #[test]
    fn test_miniplex() {
        let chunk = b"$MXPGN,01F119,3816,FFFAAF01A3FDE301*14\r\n";
        assert_eq!(detect_format(chunk), WireFormat::MiniPlex);
    }

    #[test]
    fn test_raw_ascii_by_time_colon() {
        let chunk = b"10:20:30.000 R 15FD0800 FF 00 01 CA 6F FF FF FF\r\n";
        assert_eq!(detect_format(chunk), WireFormat::ActisenseRawAscii);
    }

    #[test]
    fn test_n2k_ascii_fallback() {
        let chunk = b"A186354.922 23FF7 1F513 012F3070002F30700A00F800FFFFFF\r\n";
        assert_eq!(detect_format(chunk), WireFormat::ActisenseN2kAscii);
    }

    #[test]
    fn test_binary_formats_by_command_byte() {
        assert_eq!(detect_format(&[0x10, 0x02, 0x95, 0x00]), WireFormat::ActisenseRaw);
        assert_eq!(detect_format(&[0x10, 0x02, 0xD0, 0x00]), WireFormat::ActisenseN2k);
        assert_eq!(detect_format(&[0x10, 0x02, 0x93, 0x00]), WireFormat::ActisenseNgt);
    }

    #[test]
    fn test_undefined() {
        assert_eq!(detect_format(&[]), WireFormat::Undefined);
        // too short to carry a command byte
        assert_eq!(detect_format(&[0x10, 0x82]), WireFormat::Undefined);
        // unknown command byte
        assert_eq!(detect_format(&[0x10, 0x02, 0x42, 0x80]), WireFormat::Undefined);
    }

    #[test]
    fn test_short_ascii_chunk_falls_through_to_n2k_ascii() {
        // every byte below 128 takes the ASCII rules, whatever the content
        assert_eq!(detect_format(&[0x10, 0x02]), WireFormat::ActisenseN2kAscii);
    }

    #[test]
    fn test_ascii_rule_order() {
        // $PCDIN wins over the colon rule even when a ':' is present
        let chunk = b"10:20:30 $PCDIN,01F205,00000000,02,FF*00\r\n";
        assert_eq!(detect_format(chunk), WireFormat::SeaSmart);
    }
}
