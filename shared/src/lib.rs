//! AGV Shared Protocol Types
//!
//! This crate provides the telegram types, datagram codec and per-device route
//! tracking shared by the gateway and anything else that speaks to vehicles.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol defaults used when no configuration overrides them
pub mod protocol {
    /// Dispatch/control channel identifiers (not physical vehicles)
    pub const DEFAULT_CONTROL_DEVICES: [&str; 2] = ["A001", "A002"];

    /// Control device whose reports skip waypoint tracking entirely
    pub const DEFAULT_UNCHECKED_DEVICE: &str = "A001";

    /// Command key of a "vehicle arrived at waypoint" report
    pub const DEFAULT_ARRIVAL_CMD_KEY: &str = "rptac";

    /// Command key of a "pre-stop succeeded" report
    pub const DEFAULT_PRE_STOP_SUCCESS_CMD_KEY: &str = "rptrtp";

    /// Action codes starting with this marker are stop actions
    pub const DEFAULT_STOP_ACTION_MARKER: &str = "s";

    /// A pre-stop payload ending with this marker reports success
    pub const DEFAULT_PRE_STOP_SUCCESS_MARKER: &str = "1";

    /// Waypoint accepted even when it is not the expected queue head.
    ///
    /// Vehicles report this point outside of any assigned route; it never
    /// advances or rejects a route.
    pub const DEFAULT_BYPASS_POINT: &str = "225";
}

/// One planned transition to a waypoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub point_name: String,
    pub action: String,
    #[serde(default)]
    pub executed: bool,
}

impl PathStep {
    /// Create a step that has not been executed yet
    pub fn new(point_name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            point_name: point_name.into(),
            action: action.into(),
            executed: false,
        }
    }

    /// Check if this step is a stop action
    pub fn is_stop(&self, stop_marker: &str) -> bool {
        self.action.starts_with(stop_marker)
    }

    /// Mark the step as confirmed by the vehicle
    pub fn mark_executed(&mut self) {
        self.executed = true;
    }
}

/// Parameter mapping carried by a telegram
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramParams {
    /// Planned path steps of a route assignment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_steps: Option<Vec<PathStep>>,
    /// Raw string payload, e.g. the result field of a pre-stop report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Free-form extra parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A unit of protocol traffic, outbound command or inbound report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telegram {
    pub device_id: String,
    pub cmd_key: String,
    /// Upcoming waypoints; for reports the first entry is the reported point
    #[serde(default)]
    pub next_point_names: Vec<String>,
    #[serde(default)]
    pub params: TelegramParams,
    #[serde(default)]
    pub handshake_key: String,
}

impl Telegram {
    /// Create a telegram with no waypoints or parameters
    pub fn new(device_id: impl Into<String>, cmd_key: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            cmd_key: cmd_key.into(),
            next_point_names: Vec::new(),
            params: TelegramParams::default(),
            handshake_key: String::new(),
        }
    }

    pub fn with_points<I, S>(mut self, points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_point_names = points.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_path_steps(mut self, steps: Vec<PathStep>) -> Self {
        self.params.path_steps = Some(steps);
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.params.raw = Some(raw.into());
        self
    }

    pub fn with_handshake_key(mut self, key: impl Into<String>) -> Self {
        self.handshake_key = key.into();
        self
    }

    /// The point a vehicle report refers to (first listed waypoint)
    pub fn reported_point(&self) -> Option<&str> {
        self.next_point_names.first().map(String::as_str)
    }

    /// Path steps carried by this telegram, if any were attached
    pub fn path_steps(&self) -> Option<&[PathStep]> {
        self.params
            .path_steps
            .as_deref()
            .filter(|steps| !steps.is_empty())
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} points={:?}",
            self.device_id, self.cmd_key, self.next_point_names
        )?;
        if !self.handshake_key.is_empty() {
            write!(f, " hs={}", self.handshake_key)?;
        }
        Ok(())
    }
}

/// Audit record of a dispatched telegram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeEntry {
    pub device_id: String,
    pub handshake_key: String,
    pub cmd_key: String,
    pub created_at_ms: u64,
}

impl From<&Telegram> for HandshakeEntry {
    fn from(telegram: &Telegram) -> Self {
        Self {
            device_id: telegram.device_id.clone(),
            handshake_key: telegram.handshake_key.clone(),
            cmd_key: telegram.cmd_key.clone(),
            created_at_ms: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telegram_builder() {
        let telegram = Telegram::new("V7", "route")
            .with_points(["P1", "P2"])
            .with_handshake_key("hs-1");
        assert_eq!(telegram.device_id, "V7");
        assert_eq!(telegram.reported_point(), Some("P1"));
        assert_eq!(telegram.handshake_key, "hs-1");
    }

    #[test]
    fn test_empty_path_steps_are_absent() {
        let telegram = Telegram::new("V7", "route").with_path_steps(Vec::new());
        assert!(telegram.path_steps().is_none());

        let telegram = telegram.with_path_steps(vec![PathStep::new("P1", "move")]);
        assert_eq!(telegram.path_steps().map(<[PathStep]>::len), Some(1));
    }

    #[test]
    fn test_stop_action_detection() {
        let step = PathStep::new("P2", "stop");
        assert!(step.is_stop(protocol::DEFAULT_STOP_ACTION_MARKER));
        assert!(!PathStep::new("P1", "move").is_stop(protocol::DEFAULT_STOP_ACTION_MARKER));
    }

    #[test]
    fn test_handshake_entry_from_telegram() {
        let telegram = Telegram::new("A001", "setrt").with_handshake_key("k9");
        let entry = HandshakeEntry::from(&telegram);
        assert_eq!(entry.device_id, "A001");
        assert_eq!(entry.handshake_key, "k9");
        assert_eq!(entry.cmd_key, "setrt");
        assert!(entry.created_at_ms > 0);
    }

    #[test]
    fn test_display() {
        let telegram = Telegram::new("V7", "rptac").with_points(["P1"]);
        assert_eq!(telegram.to_string(), "[V7] rptac points=[\"P1\"]");
    }
}
