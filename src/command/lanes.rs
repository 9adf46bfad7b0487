//! Per-device report lanes
//!
//! Reports from one device are handled strictly in arrival order by a worker
//! task owned by that device; different devices run in parallel.

use super::handshake::HandshakeQueue;
use super::matcher::{MatchOutcome, TelegramMatcher};
use agv_shared::Telegram;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Reports buffered per device before the receive loop waits
const LANE_CAPACITY: usize = 256;

/// Handle to one device's worker
struct Lane {
    tx: mpsc::Sender<Telegram>,
    worker: JoinHandle<()>,
}

/// Routes vehicle reports to one ordered worker per device
pub struct ReportLanes {
    matcher: Arc<TelegramMatcher>,
    handshake: Arc<HandshakeQueue>,
    lanes: HashMap<String, Lane>,
}

impl ReportLanes {
    pub fn new(matcher: Arc<TelegramMatcher>, handshake: Arc<HandshakeQueue>) -> Self {
        Self {
            matcher,
            handshake,
            lanes: HashMap::new(),
        }
    }

    /// Queue a report behind earlier reports from the same device
    pub async fn submit(&mut self, report: Telegram) {
        let device_id = report.device_id.clone();
        let report = match self.lane(&device_id).tx.send(report).await {
            Ok(()) => return,
            Err(mpsc::error::SendError(report)) => report,
        };

        // The worker is gone; replace it and retry once
        warn!("[LANES] Worker for {} stopped, restarting", device_id);
        self.lanes.remove(&device_id);
        if self.lane(&device_id).tx.send(report).await.is_err() {
            error!("[LANES] Dropped report from {}", device_id);
        }
    }

    fn lane(&mut self, device_id: &str) -> &Lane {
        let matcher = &self.matcher;
        let handshake = &self.handshake;
        self.lanes
            .entry(device_id.to_string())
            .or_insert_with(|| spawn_lane(device_id, matcher.clone(), handshake.clone()))
    }

    /// Close every lane and wait until queued reports are handled
    pub async fn shutdown(self) {
        for (device_id, lane) in self.lanes {
            drop(lane.tx);
            if let Err(e) = lane.worker.await {
                error!("[LANES] Worker for {} failed: {}", device_id, e);
            }
        }
    }
}

fn spawn_lane(device_id: &str, matcher: Arc<TelegramMatcher>, handshake: Arc<HandshakeQueue>) -> Lane {
    let (tx, mut rx) = mpsc::channel::<Telegram>(LANE_CAPACITY);
    debug!("[LANES] Starting worker for {}", device_id);

    let worker = tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            handle_report(&matcher, &handshake, report).await;
        }
    });

    Lane { tx, worker }
}

/// Match a vehicle report and advance the command queue when it is accepted
async fn handle_report(matcher: &TelegramMatcher, handshake: &HandshakeQueue, report: Telegram) {
    if !report.handshake_key.is_empty() {
        if let Some(entry) = handshake.acknowledge(&report.device_id, &report.handshake_key) {
            debug!("Handshake {} acknowledged by {}", entry.handshake_key, entry.device_id);
        }
    }

    let outcome = matcher.try_match_with_current_request_telegram(&report).await;
    if outcome.is_matched() {
        if let Err(e) = matcher.check_for_sending_next_request().await {
            error!("Failed to send next command: {}", e);
        }
    } else if let MatchOutcome::Rejected(reason) = outcome {
        debug!("Report from {} rejected: {:?}", report.device_id, reason);
    }
}
