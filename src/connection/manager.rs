//! Connection manager for the vehicle and dispatch datagram sockets

use agv_shared::{codec, Telegram};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, warn};

/// Consecutive receive failures tolerated before a loop gives up
const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 16;

/// Pause after a failed receive
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Which socket a datagram arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Reports from vehicles
    Vehicle,
    /// Telegrams submitted by upstream dispatch logic
    Dispatch,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Vehicle => write!(f, "vehicle"),
            Channel::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A vehicle report arrived
    Received { telegram: Telegram, from: SocketAddr },
    /// Upstream dispatch submitted a telegram to send
    Dispatch(Telegram),
    /// A datagram could not be decoded
    DecodeFailed {
        channel: Channel,
        from: SocketAddr,
        reason: String,
    },
    /// A receive loop stopped
    Closed { channel: Channel, reason: String },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Vehicle socket address
    pub bind: SocketAddr,
    /// Dispatch socket address
    pub dispatch_bind: Option<SocketAddr>,
    /// Event channel capacity
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 60000)),
            dispatch_bind: None,
            event_capacity: 1024,
        }
    }
}

/// Owns the gateway sockets and turns datagrams into events
pub struct ConnectionManager {
    vehicle_socket: Arc<UdpSocket>,
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Bind the sockets and start the receive loops
    pub async fn bind(config: &ConnectionConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(config.event_capacity);

        let vehicle_socket = Arc::new(
            UdpSocket::bind(config.bind)
                .await
                .with_context(|| format!("binding vehicle socket {}", config.bind))?,
        );
        vehicle_socket.set_broadcast(true)?;

        let socket = vehicle_socket.clone();
        let tx = event_tx.clone();
        tokio::spawn(async move {
            receive_loop(socket, Channel::Vehicle, tx).await;
        });

        if let Some(dispatch_bind) = config.dispatch_bind {
            let dispatch_socket = UdpSocket::bind(dispatch_bind)
                .await
                .with_context(|| format!("binding dispatch socket {}", dispatch_bind))?;
            tokio::spawn(async move {
                receive_loop(Arc::new(dispatch_socket), Channel::Dispatch, event_tx).await;
            });
        }

        Ok(Self {
            vehicle_socket,
            event_rx,
        })
    }

    /// The vehicle socket, shared with the telegram sender
    pub fn vehicle_socket(&self) -> Arc<UdpSocket> {
        self.vehicle_socket.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.vehicle_socket.local_addr()?)
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }
}

/// Counts consecutive receive failures
#[derive(Debug)]
struct RecvErrorBudget {
    consecutive: u32,
    limit: u32,
}

impl RecvErrorBudget {
    fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    /// Record a failure; false once the limit is reached
    fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive < self.limit
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Read datagrams until the socket keeps failing or nobody listens for events
async fn receive_loop(socket: Arc<UdpSocket>, channel: Channel, event_tx: mpsc::Sender<ConnectionEvent>) {
    let mut buf = vec![0u8; codec::MAX_DATAGRAM_SIZE];
    let mut budget = RecvErrorBudget::new(MAX_CONSECUTIVE_RECV_ERRORS);

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => {
                budget.reset();
                received
            }
            Err(e) if budget.record_failure() => {
                warn!(
                    "[UDP] {} receive error ({}/{}): {}",
                    channel, budget.consecutive, budget.limit, e
                );
                sleep(RECV_RETRY_DELAY).await;
                continue;
            }
            Err(e) => {
                error!("[UDP] {} receive failed {} times, giving up: {}", channel, budget.limit, e);
                let _ = event_tx
                    .send(ConnectionEvent::Closed {
                        channel,
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let event = match codec::decode(&buf[..n]) {
            Ok(telegram) => {
                debug!("[UDP] {} from {}: {}", channel, from, telegram);
                match channel {
                    Channel::Vehicle => ConnectionEvent::Received { telegram, from },
                    Channel::Dispatch => ConnectionEvent::Dispatch(telegram),
                }
            }
            Err(e) => ConnectionEvent::DecodeFailed {
                channel,
                from,
                reason: e.to_string(),
            },
        };

        if event_tx.send(event).await.is_err() {
            debug!("[UDP] {} event channel closed", channel);
            return;
        }
    }
}
