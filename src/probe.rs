//! Transmit-capability probe.
//!
//! ASCII N2K and MiniPlex gateways always accept output, SeaSmart never
//! does. For the RAW-style formats the only way to know whether a
//! YDEN-class gateway is listening is to ask: broadcast an ISO request for
//! Product Information and watch the answers for a short window. A YDEN
//! gateway both replies with its model id and echoes our request with a `T`
//! direction marker, which is the combination we test for.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info};

use crate::detector::WireFormat;
use crate::formats::Direction;

/// ISO Request
pub const PGN_ISO_REQUEST: u32 = 59904;
/// Product Information
pub const PGN_PRODUCT_INFO: u32 = 126996;
/// ISO request body asking for PGN 126996, little endian.
pub const PRODUCT_INFO_REQUEST: [u8; 3] = [0x14, 0xF0, 0x01];
/// How long we collect Product Information answers.
pub const PROBE_WINDOW: Duration = Duration::from_millis(200);

/// Source address used by the local playback simulator; its answers never
/// describe the physical gateway.
const SIMULATOR_SOURCE: u8 = 75;

/// Model id region of the Product Information body.
const MODEL_ID_START: usize = 4;
const MODEL_ID_END: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxCapability {
    Unknown,
    Available,
    Unsupported,
}

/// What the driver has to do after [`GatewayProbe::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeAction {
    None,
    /// Broadcast the product information request and start the reply timer.
    SendRequest,
}

struct ProductInfo {
    model_id: String,
    flag: Direction,
}

pub struct GatewayProbe {
    capability: TxCapability,
    responses: HashMap<u8, ProductInfo>,
    window_open: bool,
}

impl GatewayProbe {
    pub fn new() -> Self {
        GatewayProbe {
            capability: TxCapability::Unknown,
            responses: HashMap::new(),
            window_open: false,
        }
    }

    pub fn capability(&self) -> TxCapability {
        self.capability
    }

    pub fn window_open(&self) -> bool {
        self.window_open
    }

    /// Decide on transmit capability for the detected format, or start the
    /// probing window when the format alone is not conclusive.
    pub fn begin(&mut self, format: WireFormat) -> ProbeAction {
        match format {
            WireFormat::ActisenseN2kAscii | WireFormat::MiniPlex => {
                self.capability = TxCapability::Available;
                ProbeAction::None
            }
            WireFormat::SeaSmart => {
                self.capability = TxCapability::Unsupported;
                ProbeAction::None
            }
            _ => {
                self.window_open = true;
                ProbeAction::SendRequest
            }
        }
    }

    /// Record a Product Information answer seen during the window, together
    /// with the direction marker the stream carried most recently.
    pub fn record_product_info(&mut self, source: u8, payload: &[u8], flag: Direction) {
        if !self.window_open || source == SIMULATOR_SOURCE {
            return;
        }
        let model_id = model_id_from_payload(payload);
        debug!("product info from {}: '{}' ({:?})", source, model_id, flag);
        self.responses.insert(source, ProductInfo { model_id, flag });
    }

    /// The reply timer fired: decide, then drain the collected answers.
    pub fn finish(&mut self) -> TxCapability {
        self.window_open = false;
        let usable = self.responses.values().any(|info| {
            info.model_id.contains("YDEN") && info.flag == Direction::Transmitted
        });
        self.capability = if usable {
            TxCapability::Available
        } else {
            TxCapability::Unsupported
        };
        info!("gateway transmit probe finished: {:?}", self.capability);
        self.responses.clear();
        self.capability
    }

    /// Back to square one, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.capability = TxCapability::Unknown;
        self.responses.clear();
        self.window_open = false;
    }
}

impl Default for GatewayProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the Model ID string from a Product Information body.
fn model_id_from_payload(payload: &[u8]) -> String {
    if payload.len() <= MODEL_ID_START {
        return String::new();
    }
    let end = payload.len().min(MODEL_ID_END);
    payload[MODEL_ID_START..end]
        .iter()
        .take_while(|&&b| b != 0 && b != 0xFF)
        .map(|&b| b as char)
        .collect::<String>()
        .trim()
        .to_string()
}
