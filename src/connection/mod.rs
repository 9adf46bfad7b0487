//! Connection management for the gateway sockets
//!
//! This module handles:
//! - Binding the vehicle and dispatch UDP sockets
//! - Decoding inbound datagrams into telegrams
//! - Delivering them to the main loop as events

mod manager;

pub use manager::{Channel, ConnectionConfig, ConnectionEvent, ConnectionManager};
