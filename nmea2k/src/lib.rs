//! NMEA2000 Protocol Library
//!
//! This library provides the protocol-level building blocks for working with
//! NMEA2000 marine data networks carried over CAN frames:
//! - 29-bit CAN identifier encoding and decoding (ISO 11783 PDU rules)
//! - Fast packet assembly and fragmentation for multi-frame messages
//! - The canonical binary message envelope delivered to subscribers
//! - Message handler trait for processing NMEA2000 messages
//!
//! # Example
//!
//! ```no_run
//! use nmea2k::{CanHeader, FastPacketReassembler};
//!
//! let mut reassembler = FastPacketReassembler::new();
//!
//! // Feed CAN frames as they arrive from a gateway
//! let header = CanHeader::from_can_id(0x09F80115);
//! let data = [0xA0, 0x14, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
//! if let Some(payload) = reassembler.accept(&header, &data) {
//!     println!("complete message, {} bytes", payload.len());
//! }
//! ```

pub mod can;
pub mod fast_packet;
pub mod message;
pub mod message_handler;

// Re-export commonly used types
pub use can::{CanFrame, CanHeader, build_can_id};
pub use fast_packet::{FastPacketReassembler, fragment, frame_count, is_fast_packet_pgn};
pub use message::PgnMessage;
pub use message_handler::{ALL_PGNS, MessageHandler};
