pub mod traits;
pub mod udp;

pub use traits::{TelegramSender, TransportError};
pub use udp::{DeviceRegistry, UdpTelegramSender};
