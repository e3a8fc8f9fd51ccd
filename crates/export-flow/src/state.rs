//! Orchestrator states.

use std::fmt;

/// What the exporting phase is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    DrivingPlayback,
    Capturing,
}

/// Where an export cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Configuring,
    ReachabilityCheck,
    Exporting(ExportPhase),
    Editing,
    Done,
    /// The last step failed. Kept distinct from `Idle` so callers can see
    /// the outcome, but it settles a cycle the same way: the next one may
    /// be configured from here.
    Failed,
}

impl FlowState {
    /// States from which a new cycle may be configured.
    pub fn can_configure(self) -> bool {
        matches!(self, FlowState::Idle | FlowState::Done | FlowState::Failed)
    }

    pub fn is_exporting(self) -> bool {
        matches!(self, FlowState::Exporting(_))
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowState::Idle => f.write_str("idle"),
            FlowState::Configuring => f.write_str("configuring"),
            FlowState::ReachabilityCheck => f.write_str("reachability-check"),
            FlowState::Exporting(ExportPhase::DrivingPlayback) => f.write_str("exporting/driving-playback"),
            FlowState::Exporting(ExportPhase::Capturing) => f.write_str("exporting/capturing"),
            FlowState::Editing => f.write_str("editing"),
            FlowState::Done => f.write_str("done"),
            FlowState::Failed => f.write_str("failed"),
        }
    }
}
