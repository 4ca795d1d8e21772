use std::error::Error;
use std::time::Duration;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;
mod detector;
mod driver;
mod formats;
mod probe;
mod ring_buffer;
mod stats;
mod transport;
mod tx;

use config::{Config, LogConfig};
use driver::{Driver, N2kNetDriver};
use nmea2k::{ALL_PGNS, MessageHandler, PgnMessage};
use stats::StatsLogger;

/// Interval at which interface statistics are reported.
const STATS_INTERVAL: Duration = Duration::from_secs(2);

/// Logs every complete message coming off the gateway.
struct MessageLogger;

impl MessageHandler for MessageLogger {
    fn handle_message(&mut self, pgn: u32, message: &PgnMessage) {
        // every message also arrives under the wildcard key; log it once
        if pgn == ALL_PGNS {
            return;
        }
        debug!(
            "{} pgn {} prio {} src {} dst {} len {}",
            if message.is_transmit_log() { "tx" } else { "rx" },
            message.pgn(),
            message.priority(),
            message.source(),
            message.destination(),
            message.payload().len()
        );
    }
}

fn init_logging(config: &LogConfig) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let file_appender = tracing_appender::rolling::daily(&config.directory, &config.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_file("config.json").unwrap_or_else(|e| {
        eprintln!("Warning: could not load config.json: {e}");
        eprintln!("Using default configuration");
        Config::default()
    });

    let _log_guard = init_logging(&config.logging);
    info!("N2K network gateway starting on {}", config.network.interface_name());

    let mut driver = N2kNetDriver::new(config, Box::new(MessageLogger));
    let handle = driver.handle();

    // periodic statistics report, the same surface the host would poll
    let stats_handle = handle.clone();
    tokio::spawn(async move {
        let mut logger = StatsLogger::new(STATS_INTERVAL);
        let mut tick = tokio::time::interval(STATS_INTERVAL);
        loop {
            tick.tick().await;
            logger.check_and_log(&stats_handle.stats());
        }
    });

    // shut down cleanly on ctrl-c
    let close_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            close_handle.close();
        }
    });

    driver.run().await;
    Ok(())
}
