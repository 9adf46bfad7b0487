//! Command dispatch and acknowledgment matching
//!
//! This module handles:
//! - Sequencing commands for control devices
//! - Sending route assignments to vehicles
//! - Matching vehicle reports against expected waypoints
//! - Handling each device's reports in order
//! - Handshake recording and route monitoring

mod handshake;
mod lanes;
mod matcher;
mod monitor;

pub use handshake::HandshakeQueue;
pub use lanes::ReportLanes;
pub use matcher::TelegramMatcher;
pub use monitor::RouteMonitor;
