use std::time::{Duration, Instant};
use tracing::info;

/// Interface statistics surfaced to the host application.
///
/// Updated on every successful read and write and on connection events;
/// the host polls this on a short interval.
#[derive(Debug, Clone)]
pub struct DriverStats {
    /// Bus identifier, always the N2K bus for this driver
    pub bus: &'static str,
    /// Interface label, e.g. "tcp://192.168.4.1:1456"
    pub iface: String,
    /// Total bytes received from the gateway
    pub rx_byte_count: u64,
    /// Total bytes written to the gateway
    pub tx_byte_count: u64,
    /// Whether the connection currently has a live peer
    pub available: bool,
}

impl DriverStats {
    pub fn new(iface: String) -> Self {
        Self {
            bus: "N2K",
            iface,
            rx_byte_count: 0,
            tx_byte_count: 0,
            available: false,
        }
    }

    /// Log current statistics to the info log
    pub fn log(&self) {
        info!(
            "[{}] {} rx: {} bytes, tx: {} bytes, available: {}",
            self.bus, self.iface, self.rx_byte_count, self.tx_byte_count, self.available
        );
    }
}

/// Manages periodic logging of interface statistics
pub struct StatsLogger {
    last_log: Instant,
    log_interval: Duration,
}

impl StatsLogger {
    /// Create a new StatsLogger with the specified logging interval
    pub fn new(log_interval: Duration) -> Self {
        Self {
            last_log: Instant::now(),
            log_interval,
        }
    }

    /// Check if it's time to log statistics, and if so, log them.
    /// Returns true if statistics were logged
    pub fn check_and_log(&mut self, stats: &DriverStats) -> bool {
        if self.last_log.elapsed() >= self.log_interval {
            stats.log();
            self.last_log = Instant::now();
            true
        } else {
            false
        }
    }
}
