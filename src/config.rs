use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory where log files will be stored
    pub directory: String,
    /// Log file name prefix (date will be appended)
    pub file_prefix: String,
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: "./logs".to_string(),
            file_prefix: "n2k_gateway".to_string(),
            level: "info".to_string(),
        }
    }
}

/// Transport protocol used to reach the gateway device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkProtocol {
    Tcp,
    Udp,
    /// Accepted for compatibility with older configurations; behaves as a
    /// plain TCP client.
    Gpsd,
}

impl NetworkProtocol {
    /// True for the protocols that use a TCP stream under the hood.
    pub fn is_tcp(&self) -> bool {
        matches!(self, NetworkProtocol::Tcp | NetworkProtocol::Gpsd)
    }
}

/// Which directions of traffic this connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoDirection {
    Input,
    Output,
    InOut,
}

impl IoDirection {
    pub fn allows_input(&self) -> bool {
        matches!(self, IoDirection::Input | IoDirection::InOut)
    }

    pub fn allows_output(&self) -> bool {
        matches!(self, IoDirection::Output | IoDirection::InOut)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Peer address. For TCP an empty string switches to server mode and the
    /// gateway is expected to connect to us; for UDP a multicast group here
    /// triggers a group join.
    pub address: String,
    pub port: u16,
    pub protocol: NetworkProtocol,
    #[serde(default = "default_direction")]
    pub direction: IoDirection,
    /// Reconnect when the stream goes silent for too long (TCP only).
    #[serde(default)]
    pub no_data_reconnect: bool,
    #[serde(default)]
    pub user_comment: String,
}

fn default_direction() -> IoDirection {
    IoDirection::InOut
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            // Factory default of the common WiFi gateways
            address: "192.168.4.1".to_string(),
            port: 1456,
            protocol: NetworkProtocol::Tcp,
            direction: IoDirection::InOut,
            no_data_reconnect: true,
            user_comment: String::new(),
        }
    }
}

impl NetworkConfig {
    /// Interface label used in statistics and log lines.
    pub fn interface_name(&self) -> String {
        let proto = match self.protocol {
            NetworkProtocol::Tcp => "tcp",
            NetworkProtocol::Udp => "udp",
            NetworkProtocol::Gpsd => "gpsd",
        };
        if self.address.is_empty() {
            format!("{}://0.0.0.0:{}", proto, self.port)
        } else {
            format!("{}://{}:{}", proto, self.address, self.port)
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: NetworkConfig::default(),
            logging: LogConfig::default(),
        }
    }
}
