//! Telegram matcher - pairs vehicle reports with the commands that caused them
//!
//! Two kinds of outbound telegram are handled differently:
//! - commands for control devices go through a FIFO; only the head is on the
//!   wire, and the next one is sent once a report satisfies it
//! - route assignments for vehicles are sent at once; their waypoints become
//!   the sequence of reports expected from that vehicle

use super::handshake::HandshakeTracker;
use crate::config::MatcherConfig;
use crate::transport::{TelegramSender, TransportError};
use agv_shared::state_machine::{PositionCheck, ReportKind, RouteProgress, RouteState};
use agv_shared::{HandshakeEntry, PathStep, Telegram};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors returned by enqueue and send-next
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Invalid telegram: {0}")]
    InvalidTelegram(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Why a recognized report did not satisfy the expected step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Pre-stop report without the success marker
    PreStopFailed,
    /// Report without device id or point
    MalformedReport,
    /// Reported point is not the one expected next
    OutOfSequence { expected: Option<String> },
    /// Arrival at a stop point; waiting for pre-stop success
    StopHold,
}

/// Verdict of matching a vehicle report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Report satisfies the expected next step
    Matched,
    /// Report recognized but not accepted
    Rejected(RejectReason),
    /// Command key is not an acknowledgment handled here
    NotApplicable,
}

impl MatchOutcome {
    /// True when the dispatch queue may advance
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched)
    }
}

/// A control command and whether it has gone out
#[derive(Debug)]
struct QueuedCommand {
    telegram: Telegram,
    sent: bool,
}

/// Owns the command queue and the per-vehicle route state
pub struct TelegramMatcher {
    config: MatcherConfig,
    sender: Arc<dyn TelegramSender>,
    handshake: Option<Arc<dyn HandshakeTracker>>,
    /// Control commands; only the head is ever sent
    requests: Mutex<VecDeque<QueuedCommand>>,
    /// Route progress by device id
    routes: DashMap<String, RouteProgress>,
}

impl TelegramMatcher {
    /// Create a new telegram matcher
    pub fn new(config: MatcherConfig, sender: Arc<dyn TelegramSender>) -> Self {
        Self {
            config,
            sender,
            handshake: None,
            requests: Mutex::new(VecDeque::new()),
            routes: DashMap::new(),
        }
    }

    /// Attach a handshake tracker
    pub fn with_handshake_tracker(mut self, tracker: Arc<dyn HandshakeTracker>) -> Self {
        self.handshake = Some(tracker);
        self
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn is_handshake_listener(&self) -> bool {
        self.config.handshake_listener
    }

    /// Queue a control command or send a route assignment
    pub async fn enqueue_request_telegram(&self, telegram: Telegram) -> Result<(), MatcherError> {
        if telegram.device_id.is_empty() {
            return Err(MatcherError::InvalidTelegram(format!(
                "no device id on {}",
                telegram.cmd_key
            )));
        }

        if self.config.is_control_device(&telegram.device_id) {
            // Held across the send so a command is neither sent twice nor stranded
            let mut requests = self.requests.lock().await;
            let empty_before_enqueue = requests.is_empty();
            info!("[MATCHER] Queued command: {}", telegram);
            requests.push_back(QueuedCommand {
                telegram,
                sent: false,
            });
            if empty_before_enqueue {
                self.send_head(&mut requests).await?;
            }
            return Ok(());
        }

        // Waypoints exclude the start point; a new route supersedes the old one
        self.routes
            .entry(telegram.device_id.clone())
            .or_default()
            .assign(telegram.next_point_names.iter().cloned(), telegram.path_steps());
        info!(
            "[MATCHER] Route for {}: {} waypoints",
            telegram.device_id,
            telegram.next_point_names.len()
        );

        self.record_handshake(&telegram);
        self.sender.send_telegram(&telegram).await?;
        Ok(())
    }

    /// Send the command at the head of the queue unless it already went out
    pub async fn check_for_sending_next_request(&self) -> Result<(), MatcherError> {
        let mut requests = self.requests.lock().await;
        self.send_head(&mut requests).await
    }

    async fn send_head(&self, requests: &mut VecDeque<QueuedCommand>) -> Result<(), MatcherError> {
        match requests.front_mut() {
            Some(head) if head.sent => {
                debug!("[MATCHER] Command already sent: {}", head.telegram);
            }
            Some(head) => {
                self.record_handshake(&head.telegram);
                info!("[MATCHER] Sending command: {}", head.telegram);
                self.sender.send_telegram(&head.telegram).await?;
                head.sent = true;
            }
            None => debug!("[MATCHER] No queued command to send"),
        }
        Ok(())
    }

    fn record_handshake(&self, telegram: &Telegram) {
        if !self.is_handshake_listener() {
            return;
        }
        if let Some(ref tracker) = self.handshake {
            tracker.append(HandshakeEntry::from(telegram));
            debug!(
                "[MATCHER] Handshake recorded for {}: {}",
                telegram.device_id, telegram.handshake_key
            );
        }
    }

    /// The command currently awaiting acknowledgment
    pub async fn peek_current_request(&self) -> Option<Telegram> {
        self.requests
            .lock()
            .await
            .front()
            .map(|head| head.telegram.clone())
    }

    /// Get count of queued commands
    pub async fn pending_commands(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Match a vehicle report against the expected next step
    pub async fn try_match_with_current_request_telegram(&self, report: &Telegram) -> MatchOutcome {
        let kind = match self.screen_report(report) {
            Ok(kind) => kind,
            Err(outcome) => return outcome,
        };

        Self::satisfy_head(&mut *self.requests.lock().await);
        let point = report.reported_point().unwrap_or_default();
        self.check_for_vehicle_position(&report.device_id, point, kind)
    }

    /// Classify a report, or return the verdict for reports that are not matched
    fn screen_report(&self, report: &Telegram) -> Result<ReportKind, MatchOutcome> {
        let kind = if report.cmd_key == self.config.arrival_cmd_key {
            ReportKind::Arrival
        } else if report.cmd_key == self.config.pre_stop_success_cmd_key {
            ReportKind::PreStopSuccess
        } else {
            debug!("[MATCHER] Not an acknowledgment: {}", report);
            return Err(MatchOutcome::NotApplicable);
        };

        if kind == ReportKind::PreStopSuccess {
            let raw = report.params.raw.as_deref().unwrap_or_default();
            if !raw.ends_with(self.config.pre_stop_success_marker.as_str()) {
                warn!(
                    "[MATCHER] Pre-stop failed for {}: payload {:?}",
                    report.device_id, raw
                );
                return Err(MatchOutcome::Rejected(RejectReason::PreStopFailed));
            }
        }
        Ok(kind)
    }

    /// Any valid vehicle report satisfies the outstanding control command
    fn satisfy_head(requests: &mut VecDeque<QueuedCommand>) {
        if let Some(satisfied) = requests.pop_front() {
            info!("[MATCHER] Command satisfied: {}", satisfied.telegram);
        }
    }

    fn check_for_vehicle_position(&self, device_id: &str, point: &str, kind: ReportKind) -> MatchOutcome {
        if self.config.is_unchecked_device(device_id) {
            return MatchOutcome::Matched;
        }

        if device_id.is_empty() || point.is_empty() {
            warn!(
                "[MATCHER] Report without device or point (device={:?}, point={:?})",
                device_id, point
            );
            return MatchOutcome::Rejected(RejectReason::MalformedReport);
        }

        let check = match self.routes.get_mut(device_id) {
            Some(mut progress) => {
                progress.check_position(point, kind, &self.config.stop_action_marker)
            }
            None => PositionCheck::Mismatch { expected: None },
        };

        match check {
            PositionCheck::Confirmed => {
                info!("[MATCHER] {} confirmed at {}", device_id, point);
                MatchOutcome::Matched
            }
            PositionCheck::StopHold => {
                info!("[MATCHER] {} holding at stop point {}", device_id, point);
                MatchOutcome::Rejected(RejectReason::StopHold)
            }
            PositionCheck::Mismatch { .. } if self.config.is_bypass_point(point) => {
                info!("[MATCHER] {} passed bypass point {}", device_id, point);
                MatchOutcome::Matched
            }
            PositionCheck::Mismatch { expected } => {
                warn!(
                    "[MATCHER] {} reported {} but expected {:?}",
                    device_id, point, expected
                );
                MatchOutcome::Rejected(RejectReason::OutOfSequence { expected })
            }
        }
    }

    /// Snapshot of the waypoints a device still has to report
    pub fn waypoints(&self, device_id: &str) -> Vec<String> {
        self.routes
            .get(device_id)
            .map(|progress| progress.waypoints().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a device's path steps
    pub fn path_steps(&self, device_id: &str) -> Option<Vec<PathStep>> {
        self.routes
            .get(device_id)
            .map(|progress| progress.path_steps().to_vec())
    }

    /// Path steps not yet confirmed, for resend decisions made elsewhere
    pub fn unexecuted_steps(&self, device_id: &str) -> Vec<PathStep> {
        self.routes
            .get(device_id)
            .map(|progress| progress.unexecuted_steps().cloned().collect())
            .unwrap_or_default()
    }

    pub fn route_state(&self, device_id: &str) -> Option<RouteState> {
        self.routes.get(device_id).map(|progress| progress.state())
    }

    /// Device ids with route state
    pub fn tracked_devices(&self) -> Vec<String> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }
}
