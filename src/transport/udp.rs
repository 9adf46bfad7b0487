//! UDP transport: device address resolution and datagram sending

use crate::transport::traits::{TelegramSender, TransportError};
use agv_shared::{codec, Telegram};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Maps device ids to the address their telegrams are sent to
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    addresses: DashMap<String, SocketAddr>,
    broadcast: Option<SocketAddr>,
}

impl DeviceRegistry {
    /// Create a registry seeded with static addresses
    pub fn new(devices: &BTreeMap<String, SocketAddr>, broadcast: Option<SocketAddr>) -> Self {
        let addresses = devices
            .iter()
            .map(|(id, addr)| (id.clone(), *addr))
            .collect();
        Self {
            addresses,
            broadcast,
        }
    }

    /// Record the address a device last sent from
    pub fn learn(&self, device_id: &str, addr: SocketAddr) {
        let previous = self.addresses.insert(device_id.to_string(), addr);
        if previous != Some(addr) {
            info!("[UDP] Device {} now at {}", device_id, addr);
        }
    }

    /// Resolve a device address, falling back to the broadcast address
    pub fn resolve(&self, device_id: &str) -> Option<SocketAddr> {
        self.addresses
            .get(device_id)
            .map(|entry| *entry.value())
            .or(self.broadcast)
    }

    /// Get the number of known devices
    pub fn count(&self) -> usize {
        self.addresses.len()
    }
}

/// Sends telegrams as single JSON datagrams
pub struct UdpTelegramSender {
    socket: Arc<UdpSocket>,
    registry: Arc<DeviceRegistry>,
}

impl UdpTelegramSender {
    /// Create a sender on a bound socket
    pub fn new(socket: Arc<UdpSocket>, registry: Arc<DeviceRegistry>) -> Self {
        Self { socket, registry }
    }

    async fn send_datagram(&self, payload: Bytes, addr: SocketAddr) -> Result<(), TransportError> {
        let sent = self
            .socket
            .send_to(&payload, addr)
            .await
            .map_err(|source| TransportError::Io { addr, source })?;

        if sent != payload.len() {
            return Err(TransportError::ShortSend {
                addr,
                sent,
                len: payload.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TelegramSender for UdpTelegramSender {
    async fn send_telegram(&self, telegram: &Telegram) -> Result<(), TransportError> {
        let addr = self
            .registry
            .resolve(&telegram.device_id)
            .ok_or_else(|| TransportError::UnknownDevice(telegram.device_id.clone()))?;

        let payload = codec::encode(telegram)?;
        debug!("[UDP] Sending {} ({} bytes) to {}", telegram, payload.len(), addr);
        self.send_datagram(payload, addr).await
    }

    fn name(&self) -> &'static str {
        "UDP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_registry_resolution() {
        let mut devices = BTreeMap::new();
        devices.insert("V1".to_string(), addr(7001));
        let registry = DeviceRegistry::new(&devices, None);

        assert_eq!(registry.resolve("V1"), Some(addr(7001)));
        assert_eq!(registry.resolve("V2"), None);

        registry.learn("V2", addr(7002));
        assert_eq!(registry.resolve("V2"), Some(addr(7002)));
        assert_eq!(registry.count(), 2);

        registry.learn("V2", addr(7012));
        assert_eq!(registry.resolve("V2"), Some(addr(7012)));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_registry_broadcast_fallback() {
        let registry = DeviceRegistry::new(&BTreeMap::new(), Some(addr(7999)));
        assert_eq!(registry.resolve("anything"), Some(addr(7999)));
    }

    #[tokio::test]
    async fn test_send_to_learned_device() {
        let vehicle = UdpSocket::bind("127.0.0.1:0").await.expect("bind vehicle");
        let gateway = UdpSocket::bind("127.0.0.1:0").await.expect("bind gateway");

        let registry = Arc::new(DeviceRegistry::default());
        registry.learn("V7", vehicle.local_addr().expect("vehicle addr"));
        let sender = UdpTelegramSender::new(Arc::new(gateway), registry);

        let route = Telegram::new("V7", "route").with_points(["P1", "P2"]);
        sender.send_telegram(&route).await.expect("send failed");

        let mut buf = vec![0u8; codec::MAX_DATAGRAM_SIZE];
        let (n, _) = vehicle.recv_from(&mut buf).await.expect("recv failed");
        let received = codec::decode(&buf[..n]).expect("decode failed");
        assert_eq!(received, route);
    }

    #[tokio::test]
    async fn test_send_to_unknown_device() {
        let gateway = UdpSocket::bind("127.0.0.1:0").await.expect("bind gateway");
        let sender = UdpTelegramSender::new(Arc::new(gateway), Arc::new(DeviceRegistry::default()));

        let result = sender.send_telegram(&Telegram::new("V404", "route")).await;
        assert!(matches!(result, Err(TransportError::UnknownDevice(id)) if id == "V404"));
        assert_eq!(sender.name(), "UDP");
    }
}
