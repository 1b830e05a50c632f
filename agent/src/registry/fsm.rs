//! Node lifecycle state machine

use crate::errors::FleetError;
use crate::models::NodeStatus;

/// Observation or command that may move a node between states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Liveness asserted by the node's heartbeat
    Heartbeat,

    /// Last heartbeat is older than the staleness threshold
    HeartbeatStale,

    /// Health probe reached the node
    ProbeSucceeded { heartbeat_fresh: bool },

    /// Health probe failed or timed out
    ProbeFailed,

    /// Explicit status update from the control plane
    SetStatus(NodeStatus),

    /// Explicit removal
    Remove,
}

/// Whether an explicit update may move a node from `from` to `to`
pub fn is_valid_transition(from: NodeStatus, to: NodeStatus) -> bool {
    use NodeStatus::*;

    if from == to {
        return from != Removed;
    }

    matches!(
        (from, to),
        (Initializing, Ready)
            | (Initializing, Degraded)
            | (Initializing, Failed)
            | (Ready, Busy)
            | (Busy, Ready)
            | (Ready, Degraded)
            | (Busy, Degraded)
            | (Degraded, Failed)
            | (Degraded, Ready)
            | (Failed, Degraded)
    )
}

/// Compute the state that follows `event` from `current`
pub fn transition(current: NodeStatus, event: &NodeEvent) -> Result<NodeStatus, FleetError> {
    use NodeStatus::*;

    let next = match (current, event) {
        (Removed, _) => {
            return Err(invalid(current, event));
        }

        (_, NodeEvent::Remove) => Removed,

        // Heartbeats
        (Initializing | Degraded, NodeEvent::Heartbeat) => Ready,
        (Failed, NodeEvent::Heartbeat) => Degraded,
        (state, NodeEvent::Heartbeat) => state,

        // Staleness
        (Initializing | Ready | Busy, NodeEvent::HeartbeatStale) => Degraded,
        (state, NodeEvent::HeartbeatStale) => state,

        // Probes
        (Initializing | Ready | Busy, NodeEvent::ProbeFailed) => Degraded,
        (Degraded, NodeEvent::ProbeFailed) => Failed,
        (state, NodeEvent::ProbeFailed) => state,
        (Degraded, NodeEvent::ProbeSucceeded { heartbeat_fresh: true }) => Ready,
        (state, NodeEvent::ProbeSucceeded { .. }) => state,

        // Explicit updates
        (from, NodeEvent::SetStatus(to)) => {
            if !is_valid_transition(from, *to) {
                return Err(invalid(current, event));
            }
            *to
        }
    };

    Ok(next)
}

fn invalid(current: NodeStatus, event: &NodeEvent) -> FleetError {
    let to = match event {
        NodeEvent::SetStatus(to) => to.to_string(),
        other => format!("{:?}", other),
    };
    FleetError::InvalidTransition {
        from: current.to_string(),
        to,
    }
}
