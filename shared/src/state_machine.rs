//! Route Progress State Machine
//!
//! Tracks, for one vehicle, the waypoints it still has to report and the path
//! steps of its current route. A vehicle moves through:
//!
//! ```text
//! Awaiting(p) --report p, not a stop--> Awaiting(next)
//! Awaiting(s) --arrival at stop s-----> Holding(s)
//! Holding(s)  --pre-stop success s----> Awaiting(next)
//! ```
//!
//! Any report for a point other than the head leaves the state unchanged.

use crate::PathStep;
use std::collections::VecDeque;

/// Kind of vehicle report being checked against the route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Vehicle reached a waypoint
    Arrival,
    /// Vehicle decelerated successfully ahead of a stop waypoint
    PreStopSuccess,
}

/// Where a vehicle currently is in its route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteState {
    /// No waypoints outstanding
    Idle,
    /// Waiting for the vehicle to report this point
    Awaiting(String),
    /// Arrived at a stop point, waiting for the pre-stop success report
    Holding(String),
}

/// Result of checking a reported point against the route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionCheck {
    /// Point confirmed and removed from the queue
    Confirmed,
    /// Arrival at a stop point; the point stays at the head
    StopHold,
    /// Reported point is not the expected head
    Mismatch { expected: Option<String> },
}

/// Expected waypoints and path steps of one vehicle
#[derive(Debug, Clone, Default)]
pub struct RouteProgress {
    waypoints: VecDeque<String>,
    path_steps: Vec<PathStep>,
    holding: bool,
}

impl RouteProgress {
    /// Create route progress from a route's waypoints (start point excluded)
    pub fn new<I>(waypoints: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            waypoints: waypoints.into_iter().collect(),
            path_steps: Vec::new(),
            holding: false,
        }
    }

    /// Replace the route. Path steps are only replaced when a non-empty list
    /// is given; otherwise the previous steps are kept.
    pub fn assign<I>(&mut self, waypoints: I, path_steps: Option<&[PathStep]>)
    where
        I: IntoIterator<Item = String>,
    {
        self.waypoints = waypoints.into_iter().collect();
        self.holding = false;
        if let Some(steps) = path_steps.filter(|s| !s.is_empty()) {
            self.path_steps = steps.to_vec();
        }
    }

    /// The next point the vehicle is expected to report
    pub fn expected(&self) -> Option<&str> {
        self.waypoints.front().map(String::as_str)
    }

    /// Get current state
    pub fn state(&self) -> RouteState {
        match self.waypoints.front() {
            None => RouteState::Idle,
            Some(point) if self.holding => RouteState::Holding(point.clone()),
            Some(point) => RouteState::Awaiting(point.clone()),
        }
    }

    pub fn waypoints(&self) -> &VecDeque<String> {
        &self.waypoints
    }

    pub fn path_steps(&self) -> &[PathStep] {
        &self.path_steps
    }

    /// Path steps not yet confirmed by the vehicle
    pub fn unexecuted_steps(&self) -> impl Iterator<Item = &PathStep> {
        self.path_steps.iter().filter(|step| !step.executed)
    }

    /// Check a reported point against the head of the waypoint queue and
    /// advance the route when it is confirmed
    pub fn check_position(
        &mut self,
        point: &str,
        kind: ReportKind,
        stop_marker: &str,
    ) -> PositionCheck {
        if self.expected() != Some(point) {
            return PositionCheck::Mismatch {
                expected: self.expected().map(str::to_owned),
            };
        }

        let step = self
            .path_steps
            .iter_mut()
            .find(|step| step.point_name == point);

        if let Some(step) = step {
            step.mark_executed();
            if kind == ReportKind::Arrival && step.is_stop(stop_marker) {
                self.holding = true;
                return PositionCheck::StopHold;
            }
        }

        self.waypoints.pop_front();
        self.holding = false;
        PositionCheck::Confirmed
    }
}
