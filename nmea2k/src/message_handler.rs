use crate::message::PgnMessage;

/// PGN key under which every message is delivered a second time, so that
/// subscribers interested in the whole stream need only one registration.
pub const ALL_PGNS: u32 = 1;

/// Trait for components that handle NMEA2000 messages
///
/// This trait decouples the gateway driver from its consumers: the driver
/// delivers every complete message twice, once keyed by its real PGN and once
/// keyed by [`ALL_PGNS`], and implementations decide internally which
/// messages they're interested in.
pub trait MessageHandler {
    /// Process a complete NMEA2000 message delivered under `pgn`.
    fn handle_message(&mut self, pgn: u32, message: &PgnMessage);
}
