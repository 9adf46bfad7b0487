//! Periodic reporting of outstanding routes

use super::handshake::HandshakeQueue;
use super::matcher::TelegramMatcher;
use agv_shared::state_machine::RouteState;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// Summary of one vehicle's outstanding route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    pub device_id: String,
    pub state: RouteState,
    pub remaining_waypoints: usize,
    pub unexecuted_steps: usize,
    pub total_steps: usize,
}

/// Logs vehicles whose routes are still outstanding
pub struct RouteMonitor {
    matcher: Arc<TelegramMatcher>,
    handshake: Option<Arc<HandshakeQueue>>,
    check_interval: Duration,
}

impl RouteMonitor {
    /// Create a new route monitor
    pub fn new(matcher: Arc<TelegramMatcher>, check_interval: Duration) -> Self {
        Self {
            matcher,
            handshake: None,
            check_interval,
        }
    }

    /// Also report the handshake backlog
    pub fn with_handshake_queue(mut self, handshake: Arc<HandshakeQueue>) -> Self {
        self.handshake = Some(handshake);
        self
    }

    /// Collect reports for every vehicle with waypoints left
    pub fn outstanding(&self) -> Vec<RouteReport> {
        let mut reports: Vec<RouteReport> = self
            .matcher
            .tracked_devices()
            .into_iter()
            .filter_map(|device_id| {
                let state = self.matcher.route_state(&device_id)?;
                if state == RouteState::Idle {
                    return None;
                }
                Some(RouteReport {
                    remaining_waypoints: self.matcher.waypoints(&device_id).len(),
                    unexecuted_steps: self.matcher.unexecuted_steps(&device_id).len(),
                    total_steps: self.matcher.path_steps(&device_id).map_or(0, |steps| steps.len()),
                    device_id,
                    state,
                })
            })
            .collect();
        reports.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        reports
    }

    /// Start the monitoring loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;

            if let Some(head) = self.matcher.peek_current_request().await {
                info!(
                    "[MONITOR] Awaiting acknowledgment of {} ({} commands queued)",
                    head,
                    self.matcher.pending_commands().await
                );
            }

            if let Some(ref handshake) = self.handshake {
                if !handshake.is_empty() {
                    info!("[MONITOR] {} handshakes unacknowledged", handshake.len());
                }
            }

            let reports = self.outstanding();
            if reports.is_empty() {
                debug!("[MONITOR] No outstanding routes");
            }

            for report in reports {
                match report.state {
                    RouteState::Holding(ref point) => warn!(
                        "[MONITOR] {} holding at stop point {}, waiting for pre-stop success",
                        report.device_id, point
                    ),
                    _ => info!(
                        "[MONITOR] {}: {:?}, {} waypoints left, {}/{} steps unexecuted",
                        report.device_id,
                        report.state,
                        report.remaining_waypoints,
                        report.unexecuted_steps,
                        report.total_steps
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::transport::{TelegramSender, TransportError};
    use agv_shared::{PathStep, Telegram};
    use async_trait::async_trait;

    struct NullSender;

    #[async_trait]
    impl TelegramSender for NullSender {
        async fn send_telegram(&self, _telegram: &Telegram) -> Result<(), TransportError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Null"
        }
    }

    #[tokio::test]
    async fn test_outstanding_routes() {
        let matcher = Arc::new(TelegramMatcher::new(MatcherConfig::default(), Arc::new(NullSender)));
        let route = Telegram::new("V2", "route")
            .with_points(["P1", "P2"])
            .with_path_steps(vec![PathStep::new("P1", "stop"), PathStep::new("P2", "move")]);
        matcher.enqueue_request_telegram(route).await.unwrap();
        matcher
            .enqueue_request_telegram(Telegram::new("V1", "route").with_points(["P5"]))
            .await
            .unwrap();
        matcher
            .enqueue_request_telegram(Telegram::new("V3", "route"))
            .await
            .unwrap();

        let arrival = Telegram::new("V2", "rptac").with_points(["P1"]);
        matcher.try_match_with_current_request_telegram(&arrival).await;

        let monitor = RouteMonitor::new(matcher, Duration::from_secs(1));
        let reports = monitor.outstanding();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].device_id, "V1");
        assert_eq!(reports[0].state, RouteState::Awaiting("P5".into()));
        assert_eq!(reports[0].unexecuted_steps, 0);
        assert_eq!(reports[1].device_id, "V2");
        assert_eq!(reports[1].state, RouteState::Holding("P1".into()));
        assert_eq!(reports[1].remaining_waypoints, 2);
        assert_eq!(reports[1].unexecuted_steps, 1);
        assert_eq!(reports[1].total_steps, 2);
    }
}
