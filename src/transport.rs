//! Network endpoint for the gateway connection.
//!
//! Owns the TCP client, TCP server or UDP socket and surfaces everything the
//! driver needs as a stream of [`TransportEvent`]s. Reconnecting, the
//! data-presence watchdog and multicast membership all live here so the
//! parsing side stays free of socket concerns.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;

/// Seconds of stream silence before the watchdog restarts a TCP connection.
pub const N_DOG_TIMEOUT: i32 = 8;

const READ_BUFFER_SIZE: usize = 4096;
/// Small TCP send buffer so a vanished peer turns into a write error within
/// seconds instead of minutes.
const TX_SEND_BUFFER: u32 = 1024;
const EVENT_QUEUE: usize = 64;

/// Delay before dialing again after a lost connection.
pub fn reconnect_delay() -> Duration {
    Duration::from_secs((N_DOG_TIMEOUT - 2).max(2) as u64)
}

/// Connection lifecycle and data events surfaced to the driver.
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Input(Vec<u8>),
    Lost,
}

enum TxSocket {
    None,
    Tcp(OwnedWriteHalf),
    Udp { socket: Arc<UdpSocket>, dest: SocketAddr },
}

pub struct TransportEndpoint {
    config: NetworkConfig,
    events: Sender<TransportEvent>,
    tx_socket: Arc<Mutex<TxSocket>>,
    restart: Arc<Notify>,
    multicast: Arc<std::sync::Mutex<Option<(Arc<UdpSocket>, Ipv4Addr)>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportEndpoint {
    pub fn new(config: NetworkConfig) -> (Self, Receiver<TransportEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_QUEUE);
        let endpoint = TransportEndpoint {
            config,
            events,
            tx_socket: Arc::new(Mutex::new(TxSocket::None)),
            restart: Arc::new(Notify::new()),
            multicast: Arc::new(std::sync::Mutex::new(None)),
            tasks: Vec::new(),
        };
        (endpoint, receiver)
    }

    /// Start the socket task for the configured protocol.
    pub fn open(&mut self) {
        let config = self.config.clone();
        let events = self.events.clone();
        let tx_socket = self.tx_socket.clone();
        let restart = self.restart.clone();

        let task = if config.protocol.is_tcp() {
            if config.address.is_empty() {
                tokio::spawn(run_tcp_server(config, events, tx_socket, restart))
            } else {
                tokio::spawn(run_tcp_client(config, events, tx_socket, restart))
            }
        } else {
            let multicast = self.multicast.clone();
            tokio::spawn(run_udp(config, events, tx_socket, multicast, restart))
        };
        self.tasks.push(task);
    }

    /// Write a wire buffer to the active peer.
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.tx_socket.lock().await;
        match &mut *guard {
            TxSocket::None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no active peer",
            )),
            TxSocket::Tcp(stream) => match stream.write_all(bytes).await {
                Ok(()) => Ok(bytes.len()),
                Err(e) => {
                    warn!("write to gateway failed: {e}");
                    // tear the connection down; the socket task reconnects
                    *guard = TxSocket::None;
                    self.restart.notify_waiters();
                    Err(e)
                }
            },
            TxSocket::Udp { socket, dest } => socket.send_to(bytes, *dest).await,
        }
    }

    /// Force the close-and-reconnect path, e.g. on host resume from sleep.
    pub fn trigger_reconnect(&self) {
        self.restart.notify_waiters();
    }

    /// Drop all sockets and timers. Leaves a joined multicast group first.
    pub async fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some((socket, group)) = self.multicast.lock().unwrap().take() {
            if let Err(e) = socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                debug!("leaving multicast group {group} failed: {e}");
            }
        }
        *self.tx_socket.lock().await = TxSocket::None;
    }
}

async fn run_tcp_client(
    config: NetworkConfig,
    events: Sender<TransportEvent>,
    tx_socket: Arc<Mutex<TxSocket>>,
    restart: Arc<Notify>,
) {
    loop {
        match connect(&config).await {
            Ok(stream) => {
                info!("connected to {}", config.interface_name());
                if events.send(TransportEvent::Connected).await.is_err() {
                    return;
                }
                let (mut reader, writer) = stream.into_split();
                *tx_socket.lock().await = TxSocket::Tcp(writer);

                read_until_lost(&mut reader, &config, &events, &restart).await;

                *tx_socket.lock().await = TxSocket::None;
                if events.send(TransportEvent::Lost).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("connect to {} failed: {e}", config.interface_name());
                if events.send(TransportEvent::Lost).await.is_err() {
                    return;
                }
            }
        }
        tokio::time::sleep(reconnect_delay()).await;
    }
}

async fn connect(config: &NetworkConfig) -> std::io::Result<TcpStream> {
    let mut addrs = tokio::net::lookup_host((config.address.as_str(), config.port)).await?;
    let addr = addrs.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve")
    })?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_nodelay(true)?;
    socket.set_send_buffer_size(TX_SEND_BUFFER)?;
    socket.connect(addr).await
}

/// Pump the read half until the peer goes away, the watchdog trips or a
/// restart is requested.
async fn read_until_lost(
    reader: &mut OwnedReadHalf,
    config: &NetworkConfig,
    events: &Sender<TransportEvent>,
    restart: &Notify,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut dog = N_DOG_TIMEOUT;
    let mut tick = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );

    loop {
        tokio::select! {
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("peer closed the connection");
                    return;
                }
                Ok(n) => {
                    dog = N_DOG_TIMEOUT;
                    if events.send(TransportEvent::Input(buf[..n].to_vec())).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    // transient read errors are ignored, the watchdog decides
                    // when the stream is truly dead
                    warn!("read error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            _ = tick.tick(), if config.no_data_reconnect => {
                dog -= 1;
                if dog <= 0 {
                    warn!("no data for {N_DOG_TIMEOUT} seconds, restarting connection");
                    return;
                }
            }
            _ = restart.notified() => {
                info!("connection restart requested");
                return;
            }
        }
    }
}

async fn run_tcp_server(
    config: NetworkConfig,
    events: Sender<TransportEvent>,
    tx_socket: Arc<Mutex<TxSocket>>,
    restart: Arc<Notify>,
) {
    let bind = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot listen on {bind}: {e}");
            return;
        }
    };
    info!("listening for gateway connections on {bind}");

    let mut reader: Option<OwnedReadHalf> = None;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("gateway peer {peer} connected");
                    let _ = stream.set_nodelay(true);
                    let (rd, wr) = stream.into_split();
                    // an earlier peer socket is dropped, and thereby closed
                    reader = Some(rd);
                    *tx_socket.lock().await = TxSocket::Tcp(wr);
                    if events.send(TransportEvent::Connected).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            result = read_from(&mut reader, &mut buf) => {
                match result {
                    Ok(n) if n > 0 => {
                        if events.send(TransportEvent::Input(buf[..n].to_vec())).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    Ok(_) => debug!("peer closed the connection"),
                    Err(e) => warn!("read error: {e}"),
                }
                reader = None;
                *tx_socket.lock().await = TxSocket::None;
                if events.send(TransportEvent::Lost).await.is_err() {
                    return;
                }
            },
            _ = restart.notified() => {
                if reader.take().is_some() {
                    *tx_socket.lock().await = TxSocket::None;
                    if events.send(TransportEvent::Lost).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn read_from(reader: &mut Option<OwnedReadHalf>, buf: &mut [u8]) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn run_udp(
    config: NetworkConfig,
    events: Sender<TransportEvent>,
    tx_socket: Arc<Mutex<TxSocket>>,
    multicast: Arc<std::sync::Mutex<Option<(Arc<UdpSocket>, Ipv4Addr)>>>,
    restart: Arc<Notify>,
) {
    let bind = SocketAddr::from(([0, 0, 0, 0], config.port));
    loop {
        let socket = match UdpSocket::bind(bind).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                warn!("cannot bind udp socket on {bind}: {e}");
                if events.send(TransportEvent::Lost).await.is_err() {
                    return;
                }
                tokio::time::sleep(reconnect_delay()).await;
                continue;
            }
        };

        if let Ok(IpAddr::V4(group)) = config.address.parse::<IpAddr>() {
            if group.is_multicast() {
                match socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                    Ok(()) => {
                        info!("joined multicast group {group}");
                        *multicast.lock().unwrap() = Some((socket.clone(), group));
                    }
                    Err(e) => warn!("joining multicast group {group} failed: {e}"),
                }
            }
        }

        // Output goes through a separate ephemeral-port socket.
        match UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await {
            Ok(out) => {
                if config.address.ends_with(".255") {
                    // directed broadcast destination
                    if let Err(e) = out.set_broadcast(true) {
                        warn!("enabling broadcast failed: {e}");
                    }
                }
                if !config.address.is_empty() {
                    match tokio::net::lookup_host((config.address.as_str(), config.port)).await {
                        Ok(mut addrs) => {
                            if let Some(dest) = addrs.next() {
                                *tx_socket.lock().await = TxSocket::Udp {
                                    socket: Arc::new(out),
                                    dest,
                                };
                            }
                        }
                        Err(e) => warn!("udp destination {} did not resolve: {e}", config.address),
                    }
                }
            }
            Err(e) => warn!("cannot create udp output socket: {e}"),
        }

        if events.send(TransportEvent::Connected).await.is_err() {
            return;
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => match result {
                    Ok((n, _peer)) => {
                        if n > 0
                            && events.send(TransportEvent::Input(buf[..n].to_vec())).await.is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("udp receive error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = restart.notified() => {
                    info!("connection restart requested");
                    break;
                }
            }
        }

        // tear down and bind afresh, leaving a joined group first
        if let Some((sock, group)) = multicast.lock().unwrap().take() {
            if let Err(e) = sock.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                debug!("leaving multicast group {group} failed: {e}");
            }
        }
        *tx_socket.lock().await = TxSocket::None;
        if events.send(TransportEvent::Lost).await.is_err() {
            return;
        }
        drop(socket);
        tokio::time::sleep(reconnect_delay()).await;
    }
}
