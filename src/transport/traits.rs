//! Transport trait abstraction for pluggable telegram senders

use agv_shared::{codec::CodecError, Telegram};
use async_trait::async_trait;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while handing a telegram to the network
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No address known for device {0}")]
    UnknownDevice(String),

    #[error("Encode error: {0}")]
    Codec(#[from] CodecError),

    #[error("Send to {addr} failed: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Short send to {addr}: {sent} of {len} bytes")]
    ShortSend {
        addr: SocketAddr,
        sent: usize,
        len: usize,
    },
}

/// Sends fully formed telegrams to devices
#[async_trait]
pub trait TelegramSender: Send + Sync {
    /// Transmit a telegram; returns once it is handed to the transport
    async fn send_telegram(&self, telegram: &Telegram) -> Result<(), TransportError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
