//! Gateway driver facade.
//!
//! Wires the transport endpoint, receive ring, format detection, wire
//! parsers, fast packet reassembly, transmit encoding and the capability
//! probe into one event loop. All protocol state is owned by the loop task;
//! other tasks talk to it through a [`DriverHandle`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use nmea2k::{ALL_PGNS, CanFrame, FastPacketReassembler, MessageHandler, PgnMessage};

use crate::config::{Config, NetworkProtocol};
use crate::detector::{WireFormat, detect_format};
use crate::formats::actisense::ActisenseFrameParser;
use crate::formats::{Direction, LineAccumulator, ParsedItem, miniplex, n2k_ascii, raw_ascii, seasmart};
use crate::probe::{
    GatewayProbe, PGN_ISO_REQUEST, PGN_PRODUCT_INFO, PROBE_WINDOW, PRODUCT_INFO_REQUEST,
    ProbeAction, TxCapability,
};
use crate::ring_buffer::{RX_BUFFER_SIZE_NET, RingBuffer};
use crate::stats::DriverStats;
use crate::transport::{TransportEndpoint, TransportEvent};
use crate::tx::TxEncoder;

/// Pause between consecutive frames of a fragmented transmission so slow
/// gateways are not overrun.
const INTER_FRAME_DELAY: Duration = Duration::from_millis(2);
const COMMAND_QUEUE: usize = 32;
/// Sweep cadence for stale fast packet sequences.
const REASSEMBLY_SWEEP: Duration = Duration::from_millis(250);

/// Host-facing description of this interface.
#[derive(Debug, Clone)]
pub struct DriverAttributes {
    pub bus: &'static str,
    pub iface: String,
    pub user_comment: String,
}

#[derive(Debug)]
enum DriverCommand {
    Send {
        priority: u8,
        pgn: u32,
        destination: u8,
        payload: Vec<u8>,
    },
    Resume,
    Close,
}

/// The capabilities the host application drives an interface through.
pub trait Driver {
    /// Queue a message for transmission. Returns false when the driver task
    /// is gone or its queue is saturated.
    fn send_message(&self, priority: u8, pgn: u32, destination: u8, payload: Vec<u8>) -> bool;
    /// Ask the driver to shut down.
    fn close(&self);
    fn stats(&self) -> DriverStats;
    fn attributes(&self) -> DriverAttributes;
}

/// Cloneable handle implementing [`Driver`] against the running loop task.
#[derive(Clone)]
pub struct DriverHandle {
    commands: Sender<DriverCommand>,
    stats: Arc<Mutex<DriverStats>>,
    attributes: DriverAttributes,
}

impl DriverHandle {
    /// Forward a host resume-from-sleep event; the connection is restarted
    /// unconditionally.
    pub fn resume(&self) {
        let _ = self.commands.try_send(DriverCommand::Resume);
    }
}

impl Driver for DriverHandle {
    fn send_message(&self, priority: u8, pgn: u32, destination: u8, payload: Vec<u8>) -> bool {
        self.commands
            .try_send(DriverCommand::Send {
                priority,
                pgn,
                destination,
                payload,
            })
            .is_ok()
    }

    fn close(&self) {
        let _ = self.commands.try_send(DriverCommand::Close);
    }

    fn stats(&self) -> DriverStats {
        self.stats.lock().unwrap().clone()
    }

    fn attributes(&self) -> DriverAttributes {
        self.attributes.clone()
    }
}

pub struct N2kNetDriver {
    config: Config,
    endpoint: TransportEndpoint,
    events: Receiver<TransportEvent>,
    commands: Receiver<DriverCommand>,
    commands_tx: Sender<DriverCommand>,
    ring: RingBuffer,
    format: WireFormat,
    frame_parser: ActisenseFrameParser,
    lines: LineAccumulator,
    last_direction: Direction,
    reassembler: FastPacketReassembler,
    encoder: TxEncoder,
    probe: GatewayProbe,
    probe_deadline: Option<Instant>,
    probe_started: bool,
    handler: Box<dyn MessageHandler + Send>,
    stats: Arc<Mutex<DriverStats>>,
    tx_enter: u32,
}

impl N2kNetDriver {
    pub fn new(config: Config, handler: Box<dyn MessageHandler + Send>) -> Self {
        let (endpoint, events) = TransportEndpoint::new(config.network.clone());
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let stats = Arc::new(Mutex::new(DriverStats::new(config.network.interface_name())));

        N2kNetDriver {
            config,
            endpoint,
            events,
            commands,
            commands_tx,
            ring: RingBuffer::new(RX_BUFFER_SIZE_NET),
            format: WireFormat::Undefined,
            frame_parser: ActisenseFrameParser::new(),
            lines: LineAccumulator::new(),
            last_direction: Direction::Received,
            reassembler: FastPacketReassembler::new(),
            encoder: TxEncoder::new(),
            probe: GatewayProbe::new(),
            probe_deadline: None,
            probe_started: false,
            handler,
            stats,
            tx_enter: 0,
        }
    }

    /// Handle for other tasks to drive this instance.
    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            commands: self.commands_tx.clone(),
            stats: self.stats.clone(),
            attributes: DriverAttributes {
                bus: "N2K",
                iface: self.config.network.interface_name(),
                user_comment: self.config.network.user_comment.clone(),
            },
        }
    }

    /// Open the endpoint and run the event loop until closed.
    pub async fn run(&mut self) {
        self.endpoint.open();
        let mut sweep = tokio::time::interval(REASSEMBLY_SWEEP);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = wait_until(self.probe_deadline) => {
                    self.probe_deadline = None;
                    self.probe.finish();
                },
                _ = sweep.tick() => self.reassembler.expire_stale(),
            }
        }

        self.shutdown().await;
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("gateway link up");
                self.stats.lock().unwrap().available = true;
                self.format = WireFormat::Undefined;
                self.frame_parser.reset();
                self.lines.reset();
                self.ring.clear();
                self.reassembler.clear();
                self.probe.reset();
                self.probe_deadline = None;
                self.probe_started = false;
            }
            TransportEvent::Input(chunk) => {
                {
                    let mut stats = self.stats.lock().unwrap();
                    stats.rx_byte_count += chunk.len() as u64;
                    stats.available = true;
                }
                self.process_chunk(&chunk);
                self.maybe_start_probe().await;
            }
            TransportEvent::Lost => {
                warn!("gateway link down");
                self.stats.lock().unwrap().available = false;
                self.reassembler.clear();
                self.probe_deadline = None;
            }
        }
    }

    /// Returns true when the driver should shut down.
    async fn handle_command(&mut self, command: DriverCommand) -> bool {
        match command {
            DriverCommand::Send {
                priority,
                pgn,
                destination,
                payload,
            } => {
                self.transmit(priority, pgn, destination, &payload).await;
                false
            }
            DriverCommand::Resume => {
                info!("host resumed from sleep, restarting connection");
                self.endpoint.trigger_reconnect();
                false
            }
            DriverCommand::Close => true,
        }
    }

    /// Push one received chunk through detection and the matching parser.
    fn process_chunk(&mut self, chunk: &[u8]) {
        self.ring.put_all(chunk);

        let format = detect_format(chunk);
        if format == WireFormat::Undefined {
            // keep listening; the ring is lossy and bounds what piles up
            trace!("unrecognized data chunk ({} bytes)", chunk.len());
            return;
        }
        self.format = format;

        let mut items = Vec::new();
        match format {
            WireFormat::ActisenseN2k | WireFormat::ActisenseRaw | WireFormat::ActisenseNgt => {
                self.frame_parser.drain(&self.ring, format, &mut items);
            }
            WireFormat::YdRaw | WireFormat::ActisenseRawAscii => {
                for line in self.lines.drain(&self.ring) {
                    match raw_ascii::parse_line(&line) {
                        Some(raw) => {
                            self.last_direction = raw.direction;
                            items.push(ParsedItem::Frame(raw.frame));
                        }
                        None => trace!("dropping malformed line: {line}"),
                    }
                }
            }
            WireFormat::ActisenseN2kAscii => {
                for line in self.lines.drain(&self.ring) {
                    match n2k_ascii::parse_line(&line) {
                        Some(message) => items.push(ParsedItem::Message(message)),
                        None => trace!("dropping malformed line: {line}"),
                    }
                }
            }
            WireFormat::SeaSmart => {
                for line in self.lines.drain(&self.ring) {
                    match seasmart::parse_line(&line) {
                        Some(message) => items.push(ParsedItem::Message(message)),
                        None => trace!("dropping malformed line: {line}"),
                    }
                }
            }
            WireFormat::MiniPlex => {
                for line in self.lines.drain(&self.ring) {
                    match miniplex::parse_line(&line) {
                        Some(frame) => items.push(ParsedItem::Frame(frame)),
                        None => trace!("dropping malformed line: {line}"),
                    }
                }
            }
            WireFormat::Undefined => {}
        }

        for item in items {
            match item {
                ParsedItem::Frame(frame) => self.dispatch_frame(frame),
                ParsedItem::Message(message) => self.emit(message),
            }
        }
    }

    /// Route a CAN frame through fast packet assembly or wrap it directly.
    fn dispatch_frame(&mut self, frame: CanFrame) {
        let header = frame.header();
        if header.is_fast_packet() {
            if let Some(payload) = self.reassembler.accept(&header, &frame.data) {
                self.emit(PgnMessage::new(
                    header.priority,
                    header.pgn,
                    header.destination,
                    header.source,
                    &payload,
                ));
            }
        } else {
            self.emit(PgnMessage::new(
                header.priority,
                header.pgn,
                header.destination,
                header.source,
                &frame.data,
            ));
        }
    }

    /// Deliver a complete message: once under its PGN, once under the
    /// wildcard key.
    fn emit(&mut self, message: PgnMessage) {
        if message.pgn() == PGN_PRODUCT_INFO && self.probe.window_open() {
            self.probe
                .record_product_info(message.source(), message.payload(), self.last_direction);
        }

        if !self.config.network.direction.allows_input() && !message.is_transmit_log() {
            return;
        }
        let pgn = message.pgn();
        self.handler.handle_message(pgn, &message);
        self.handler.handle_message(ALL_PGNS, &message);
    }

    /// Kick off the transmit capability probe once a format is known.
    async fn maybe_start_probe(&mut self) {
        if self.probe_started || self.format == WireFormat::Undefined {
            return;
        }
        if !self.config.network.direction.allows_output() {
            return;
        }
        self.probe_started = true;

        match self.probe.begin(self.format) {
            ProbeAction::SendRequest => {
                // Ask for product information in YD RAW form; a YDEN gateway
                // both answers and echoes the request with a 'T' marker.
                let request = self.encoder.encode(
                    WireFormat::YdRaw,
                    6,
                    PGN_ISO_REQUEST,
                    0xFF,
                    &PRODUCT_INFO_REQUEST,
                );
                for line in &request {
                    if let Err(e) = self.write_wire(line).await {
                        debug!("probe request not sent: {e}");
                    }
                }
                self.probe_deadline = Some(Instant::now() + PROBE_WINDOW);
            }
            ProbeAction::None => {}
        }
    }

    async fn transmit(&mut self, priority: u8, pgn: u32, destination: u8, payload: &[u8]) -> bool {
        // nested transmits must never execute
        if self.tx_enter > 0 {
            warn!("transmit re-entered, dropping pgn {pgn}");
            return false;
        }
        self.tx_enter += 1;
        let sent = self.transmit_inner(priority, pgn, destination, payload).await;
        self.tx_enter -= 1;
        sent
    }

    async fn transmit_inner(
        &mut self,
        priority: u8,
        pgn: u32,
        destination: u8,
        payload: &[u8],
    ) -> bool {
        if !self.config.network.direction.allows_output() {
            return false;
        }
        if self.probe.capability() != TxCapability::Available {
            // accepted, but this gateway has no usable transmit path
            debug!("transmit of pgn {pgn} skipped, gateway does not accept output");
            return true;
        }

        let frames = self.encoder.encode(self.format, priority, pgn, destination, payload);
        if frames.is_empty() {
            debug!("no transmit encoding for {:?}", self.format);
            return true;
        }

        for (i, frame) in frames.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(INTER_FRAME_DELAY).await;
            }
            if let Err(e) = self.write_wire(frame).await {
                warn!("transmit failed: {e}");
                return false;
            }
        }

        // mirror the message to subscribers as a transmit log entry
        self.emit(PgnMessage::transmitted(priority, pgn, destination, 0, payload));
        true
    }

    async fn write_wire(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        if self.config.network.protocol == NetworkProtocol::Udp {
            // the UDP output socket exists but is deliberately not driven
            trace!("udp transmit suppressed ({} bytes)", bytes.len());
            return Ok(0);
        }
        match self.endpoint.write(bytes).await {
            Ok(n) => {
                self.stats.lock().unwrap().tx_byte_count += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.stats.lock().unwrap().available = false;
                Err(e)
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("closing gateway driver");
        self.endpoint.close().await;
        self.ring.clear();
        self.reassembler.clear();
        self.probe_deadline = None;
        self.stats.lock().unwrap().available = false;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoDirection;
    use nmea2k::build_can_id;

    #[derive(Clone, Default)]
    struct Collector {
        messages: Arc<Mutex<Vec<(u32, PgnMessage)>>>,
    }

    impl Collector {
        fn take(&self) -> Vec<(u32, PgnMessage)> {
            std::mem::take(&mut *self.messages.lock().unwrap())
        }
    }

    impl MessageHandler for Collector {
        fn handle_message(&mut self, pgn: u32, message: &PgnMessage) {
            self.messages.lock().unwrap().push((pgn, message.clone()));
        }
    }

    fn driver() -> (N2kNetDriver, Collector) {
        let collector = Collector::default();
        let driver = N2kNetDriver::new(Config::default(), Box::new(collector.clone()));
        (driver, collector)
    }

    #[test]
    fn test_seasmart_chunk_delivers_twice() {
        let (mut driver, collector) = driver();
        driver.process_chunk(b"$PCDIN,01F205,000C72B2,02,FF050D3A1D4CFC00*29\r\n");

        let messages = collector.take();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, 0x1F205);
        assert_eq!(messages[1].0, ALL_PGNS);
        assert_eq!(messages[0].1, messages[1].1);

        let msg = &messages[0].1;
        assert_eq!(msg.priority(), 3);
        assert_eq!(msg.destination(), 0xFF);
        assert_eq!(msg.source(), 0x02);
        assert_eq!(msg.timestamp(), 0x000C72B2);
        assert_eq!(msg.payload(), &[0xFF, 0x05, 0x0D, 0x3A, 0x1D, 0x4C, 0xFC, 0x00]);
    }

    #[test]
    fn test_miniplex_single_frame() {
        let (mut driver, collector) = driver();
        driver.process_chunk(b"$MXPGN,01F119,3816,FFFAAF01A3FDE301*14\r\n");

        let messages = collector.take();
        assert_eq!(messages.len(), 2);
        let msg = &messages[0].1;
        assert_eq!(msg.pgn(), 0x1F119);
        assert_eq!(msg.priority(), 3);
        assert_eq!(msg.source(), 0x16);
        assert_eq!(msg.payload(), &[0x01, 0xE3, 0xFD, 0xA3, 0x01, 0xAF, 0xFA, 0xFF]);
    }

    #[test]
    fn test_raw_ascii_single_frame() {
        let (mut driver, collector) = driver();
        driver.process_chunk(b"10:20:30.000 R 15FD0800 FF 00 01 CA 6F FF FF FF\n");

        let messages = collector.take();
        assert_eq!(messages.len(), 2);
        let msg = &messages[0].1;
        assert_eq!(msg.pgn(), 0x1FD08);
        assert_eq!(msg.priority(), 5);
        assert_eq!(msg.source(), 0x00);
        assert_eq!(msg.payload(), &[0xFF, 0x00, 0x01, 0xCA, 0x6F, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_fast_packet_over_raw_ascii() {
        let (mut driver, collector) = driver();

        let payload: Vec<u8> = (1..=20).collect();
        let id = build_can_id(6, 0x23, 0xFF, 126996);
        let frames = nmea2k::fragment(0xA0, &payload);
        for frame in &frames {
            let mut line = format!("10:20:30.000 R {:08X}", id);
            for byte in frame {
                line.push_str(&format!(" {:02X}", byte));
            }
            line.push('\n');
            driver.process_chunk(line.as_bytes());
        }

        let messages = collector.take();
        assert_eq!(messages.len(), 2, "exactly one message, delivered twice");
        let msg = &messages[0].1;
        assert_eq!(msg.pgn(), 126996);
        assert_eq!(msg.source(), 0x23);
        assert_eq!(msg.payload(), payload.as_slice());
    }

    #[test]
    fn test_binary_n2k_chunk() {
        let (mut driver, collector) = driver();
        let chunk = [
            0x10, 0x02, 0xD0, 0x15, 0x00, 0xFF, 0x04, 0x01, 0xF8, 0x09, 0x00, 0x68, 0x4C, 0x1B,
            0x00, 0xA0, 0x74, 0xEB, 0x14, 0xF8, 0x90, 0x52, 0xD2, 0x88, 0x10, 0x03,
        ];
        driver.process_chunk(&chunk);

        let messages = collector.take();
        assert_eq!(messages.len(), 2);
        let msg = &messages[0].1;
        assert_eq!(msg.pgn(), 0x1F801);
        assert_eq!(msg.priority(), 2);
        assert_eq!(msg.source(), 0x04);
        assert_eq!(msg.payload(), &[0xA0, 0x74, 0xEB, 0x14, 0xF8, 0x90, 0x52, 0xD2]);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_output() {
        let stream: &[u8] = b"10:20:30.000 R 15FD0800 FF 00 01 CA 6F FF FF FF\n\
                              10:20:30.010 R 15FD0800 01 02 03 04 05 06 07 08\n";

        let (mut whole, collector_whole) = driver();
        whole.process_chunk(stream);
        let expected = collector_whole.take();

        // one line per chunk
        let (mut split, collector_split) = driver();
        for chunk in stream.split_inclusive(|&b| b == b'\n') {
            split.process_chunk(chunk);
        }
        let got = collector_split.take();

        assert_eq!(expected.len(), 4);
        assert_eq!(got.len(), expected.len());
        for (a, b) in expected.iter().zip(got.iter()) {
            assert_eq!(a.0, b.0);
            assert_eq!(a.1, b.1);
        }
    }

    #[test]
    fn test_undefined_chunk_is_skipped() {
        let (mut driver, collector) = driver();
        driver.process_chunk(&[0x10, 0x02, 0x42, 0x00, 0xFE]);
        assert!(collector.take().is_empty());
        // the bytes stay buffered but nothing was parsed
        assert!(!driver.ring.is_empty());
    }

    #[test]
    fn test_garbage_never_yields_bad_priority() {
        let (mut driver, collector) = driver();
        driver.process_chunk(b"A000000.000 FFFFF FFFFF FFFF\r\n");
        driver.process_chunk(b"10:20:30.000 R FFFFFFFF FF FF FF FF FF FF FF FF\n");
        for (_, msg) in collector.take() {
            assert!(msg.priority() <= 7);
            assert!(msg.payload().len() <= 223);
        }
    }

    #[tokio::test]
    async fn test_probe_flow_with_yden_echo() {
        let (mut driver, _collector) = driver();

        // a first chunk in RAW ASCII starts the probe window
        driver
            .handle_transport_event(TransportEvent::Input(
                b"10:20:30.000 R 15FD0800 FF 00 01 CA 6F FF FF FF\n".to_vec(),
            ))
            .await;
        assert!(driver.probe.window_open());
        assert!(driver.probe_deadline.is_some());

        // the gateway echoes product information with a 'T' marker
        let mut payload = vec![0u8; 20];
        payload[4..11].copy_from_slice(b"YDEN-02");
        let id = build_can_id(6, 0x23, 0xFF, 126996);
        for frame in nmea2k::fragment(0x00, &payload) {
            let mut line = format!("10:20:30.100 T {:08X}", id);
            for byte in &frame {
                line.push_str(&format!(" {:02X}", byte));
            }
            line.push('\n');
            driver
                .handle_transport_event(TransportEvent::Input(line.into_bytes()))
                .await;
        }

        assert_eq!(driver.probe.finish(), TxCapability::Available);
    }

    #[tokio::test]
    async fn test_probe_not_started_for_input_only() {
        let mut config = Config::default();
        config.network.direction = IoDirection::Input;
        let collector = Collector::default();
        let mut driver = N2kNetDriver::new(config, Box::new(collector));

        driver
            .handle_transport_event(TransportEvent::Input(
                b"10:20:30.000 R 15FD0800 FF 00 01 CA 6F FF FF FF\n".to_vec(),
            ))
            .await;
        assert!(!driver.probe.window_open());
        assert_eq!(driver.probe.capability(), TxCapability::Unknown);
    }

    #[tokio::test]
    async fn test_transmit_without_capability_is_accepted_but_silent() {
        let (mut driver, collector) = driver();
        driver.process_chunk(b"10:20:30.000 R 15FD0800 FF 00 01 CA 6F FF FF FF\n");
        collector.take();

        assert_eq!(driver.probe.capability(), TxCapability::Unknown);
        assert!(driver.transmit(6, 59904, 0xFF, &[0x14, 0xF0, 0x01]).await);
        // nothing reached the wire and no transmit log was emitted
        assert_eq!(driver.stats.lock().unwrap().tx_byte_count, 0);
        assert!(collector.take().is_empty());
    }

    #[tokio::test]
    async fn test_transmit_rejected_for_input_only() {
        let mut config = Config::default();
        config.network.direction = IoDirection::Input;
        let collector = Collector::default();
        let mut driver = N2kNetDriver::new(config, Box::new(collector));
        assert!(!driver.transmit(6, 59904, 0xFF, &[0x14, 0xF0, 0x01]).await);
    }

    #[test]
    fn test_handle_reports_attributes() {
        let mut config = Config::default();
        config.network.user_comment = "port engine room".to_string();
        let collector = Collector::default();
        let driver = N2kNetDriver::new(config, Box::new(collector));
        let handle = driver.handle();

        let attributes = handle.attributes();
        assert_eq!(attributes.bus, "N2K");
        assert_eq!(attributes.iface, "tcp://192.168.4.1:1456");
        assert_eq!(attributes.user_comment, "port engine room");

        let stats = handle.stats();
        assert_eq!(stats.rx_byte_count, 0);
        assert!(!stats.available);
    }
}
