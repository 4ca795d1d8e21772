//! Canonical binary envelope for complete NMEA2000 messages.
//!
//! Every message handed to subscribers uses the same 13-byte header layout
//! regardless of the wire encoding it arrived in:
//!
//! ```text
//! byte 0      : 0x93 (received) or 0x94 (transmit log)
//! byte 1      : length indicator (bytes following, check byte excluded)
//! byte 2      : priority (0..7)
//! bytes 3-5   : PGN, little endian
//! byte 6      : destination address
//! byte 7      : source address
//! bytes 8-11  : timestamp, little endian, 0xFFFFFFFF when absent
//! byte 12     : payload length N
//! bytes 13..  : N payload bytes
//! byte 13+N   : check byte 0x55
//! ```

/// Marker for messages received from the network.
pub const MARKER_RX: u8 = 0x93;
/// Marker for the transmit-log variant of the envelope.
pub const MARKER_TX: u8 = 0x94;
/// Timestamp value used when the wire format carries no timestamp.
pub const TIMESTAMP_NONE: u32 = 0xFFFF_FFFF;
/// Largest payload a fast packet sequence can carry.
pub const MAX_PAYLOAD: usize = 223;

const HEADER_LEN: usize = 13;
const CHECK_BYTE: u8 = 0x55;

/// A complete NMEA2000 message in the canonical envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgnMessage {
    bytes: Vec<u8>,
}

impl PgnMessage {
    /// Build a received message without a wire timestamp.
    pub fn new(priority: u8, pgn: u32, destination: u8, source: u8, payload: &[u8]) -> Self {
        Self::build(MARKER_RX, priority, pgn, destination, source, TIMESTAMP_NONE, payload)
    }

    /// Build a received message carrying the gateway's timestamp.
    pub fn received(
        priority: u8,
        pgn: u32,
        destination: u8,
        source: u8,
        timestamp: u32,
        payload: &[u8],
    ) -> Self {
        Self::build(MARKER_RX, priority, pgn, destination, source, timestamp, payload)
    }

    /// Build the transmit-log variant for a message we put on the wire.
    pub fn transmitted(priority: u8, pgn: u32, destination: u8, source: u8, payload: &[u8]) -> Self {
        Self::build(MARKER_TX, priority, pgn, destination, source, TIMESTAMP_NONE, payload)
    }

    fn build(
        marker: u8,
        priority: u8,
        pgn: u32,
        destination: u8,
        source: u8,
        timestamp: u32,
        payload: &[u8],
    ) -> Self {
        let n = payload.len().min(MAX_PAYLOAD);
        let mut bytes = Vec::with_capacity(HEADER_LEN + n + 1);
        bytes.push(marker);
        bytes.push((11 + n) as u8);
        bytes.push(priority & 0x07);
        bytes.push(pgn as u8);
        bytes.push((pgn >> 8) as u8);
        bytes.push((pgn >> 16) as u8);
        bytes.push(destination);
        bytes.push(source);
        bytes.extend_from_slice(&timestamp.to_le_bytes());
        bytes.push(n as u8);
        bytes.extend_from_slice(&payload[..n]);
        bytes.push(CHECK_BYTE);
        PgnMessage { bytes }
    }

    /// Adopt a buffer that already uses the canonical layout, validating the
    /// marker, declared lengths and check byte. Used for gateway encodings
    /// that deliver the envelope verbatim.
    pub fn from_raw(bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() < HEADER_LEN + 1 {
            return None;
        }
        if bytes[0] != MARKER_RX && bytes[0] != MARKER_TX {
            return None;
        }
        let n = bytes[12] as usize;
        if n > MAX_PAYLOAD || bytes.len() != HEADER_LEN + n + 1 {
            return None;
        }
        if bytes[HEADER_LEN + n] != CHECK_BYTE {
            return None;
        }
        Some(PgnMessage { bytes })
    }

    pub fn priority(&self) -> u8 {
        self.bytes[2]
    }

    pub fn pgn(&self) -> u32 {
        self.bytes[3] as u32 | (self.bytes[4] as u32) << 8 | (self.bytes[5] as u32) << 16
    }

    pub fn destination(&self) -> u8 {
        self.bytes[6]
    }

    pub fn source(&self) -> u8 {
        self.bytes[7]
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_le_bytes([self.bytes[8], self.bytes[9], self.bytes[10], self.bytes[11]])
    }

    pub fn payload(&self) -> &[u8] {
        let n = self.bytes[12] as usize;
        &self.bytes[HEADER_LEN..HEADER_LEN + n]
    }

    pub fn is_transmit_log(&self) -> bool {
        self.bytes[0] == MARKER_TX
    }

    /// The full envelope, as delivered to subscribers and log sinks.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_layout() {
        let msg = PgnMessage::new(3, 0x1F205, 0xFF, 0x02, &[0xFF, 0x05, 0x0D, 0x3A]);
        let b = msg.as_bytes();
        assert_eq!(b[0], MARKER_RX);
        assert_eq!(b[1], 11 + 4);
        assert_eq!(b[2], 3);
        assert_eq!(&b[3..6], &[0x05, 0xF2, 0x01]);
        assert_eq!(b[6], 0xFF);
        assert_eq!(b[7], 0x02);
        assert_eq!(&b[8..12], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(b[12], 4);
        assert_eq!(&b[13..17], &[0xFF, 0x05, 0x0D, 0x3A]);
        assert_eq!(b[17], 0x55);
    }

    #[test]
    fn test_accessors_round_trip() {
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let msg = PgnMessage::received(2, 129025, 0xFF, 0x04, 0x1B4C_6800, &payload);
        assert_eq!(msg.priority(), 2);
        assert_eq!(msg.pgn(), 129025);
        assert_eq!(msg.destination(), 0xFF);
        assert_eq!(msg.source(), 0x04);
        assert_eq!(msg.timestamp(), 0x1B4C_6800);
        assert_eq!(msg.payload(), &payload);
        assert!(!msg.is_transmit_log());
    }

    #[test]
    fn test_priority_is_clamped() {
        let msg = PgnMessage::new(0xF0, 130306, 0xFF, 0, &[0; 8]);
        assert!(msg.priority() <= 7);
    }

    #[test]
    fn test_payload_is_clamped_to_fast_packet_maximum() {
        let oversized = vec![0xAAu8; 400];
        let msg = PgnMessage::new(6, 126996, 0xFF, 0, &oversized);
        assert_eq!(msg.payload().len(), MAX_PAYLOAD);
    }

    #[test]
    fn test_from_raw_accepts_own_encoding() {
        let msg = PgnMessage::new(6, 126996, 0xFF, 0x23, &[9u8; 20]);
        let adopted = PgnMessage::from_raw(msg.as_bytes().to_vec()).unwrap();
        assert_eq!(adopted, msg);
    }

    #[test]
    fn test_from_raw_rejects_bad_buffers() {
        assert!(PgnMessage::from_raw(vec![0x93, 0x00]).is_none());

        // wrong marker
        let mut bytes = PgnMessage::new(6, 126996, 0xFF, 0, &[1, 2, 3]).as_bytes().to_vec();
        bytes[0] = 0x92;
        assert!(PgnMessage::from_raw(bytes).is_none());

        // truncated payload
        let mut bytes = PgnMessage::new(6, 126996, 0xFF, 0, &[1, 2, 3]).as_bytes().to_vec();
        bytes.pop();
        assert!(PgnMessage::from_raw(bytes).is_none());

        // corrupted check byte
        let mut bytes = PgnMessage::new(6, 126996, 0xFF, 0, &[1, 2, 3]).as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert!(PgnMessage::from_raw(bytes).is_none());
    }

    #[test]
    fn test_transmit_log_marker() {
        let msg = PgnMessage::transmitted(6, 59904, 0xFF, 0, &[0x14, 0xF0, 0x01]);
        assert!(msg.is_transmit_log());
        assert_eq!(msg.as_bytes()[0], MARKER_TX);
        assert_eq!(msg.timestamp(), TIMESTAMP_NONE);
    }
}
