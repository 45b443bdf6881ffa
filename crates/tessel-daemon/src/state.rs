// crates/tessel-daemon/src/state.rs
//
// Node state machine for the Tessel daemon.
//
// Valid transitions:
//   Initializing -> Joining -> Ready
//   Any state -> ShuttingDown

use std::fmt;

/// Lifecycle states of the daemon node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Node is starting up and loading configuration.
    Initializing,
    /// Node is announcing itself and building its first view of the ring.
    Joining,
    /// Node is serving requests.
    Ready,
    /// Node is shutting down gracefully.
    ShuttingDown,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Initializing => write!(f, "Initializing"),
            NodeState::Joining => write!(f, "Joining"),
            NodeState::Ready => write!(f, "Ready"),
            NodeState::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// State machine for managing node lifecycle transitions.
pub struct NodeStateMachine {
    pub current: NodeState,
}

impl NodeStateMachine {
    /// Create a new state machine starting in the Initializing state.
    pub fn new() -> Self {
        Self {
            current: NodeState::Initializing,
        }
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns an error if the transition is not valid.
    pub fn transition(&mut self, new_state: NodeState) -> Result<(), String> {
        let valid = match (&self.current, &new_state) {
            (NodeState::ShuttingDown, NodeState::ShuttingDown) => false,
            (_, NodeState::ShuttingDown) => true,
            (NodeState::Initializing, NodeState::Joining) => true,
            (NodeState::Joining, NodeState::Ready) => true,
            _ => false,
        };

        if valid {
            tracing::info!("State transition: {} -> {}", self.current, new_state);
            self.current = new_state;
            Ok(())
        } else {
            Err(format!(
                "Invalid state transition: {} -> {}",
                self.current, new_state
            ))
        }
    }
}

impl Default for NodeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_path_reaches_ready() {
        let mut sm = NodeStateMachine::new();
        sm.transition(NodeState::Joining).unwrap();
        sm.transition(NodeState::Ready).unwrap();
        assert_eq!(sm.current, NodeState::Ready);
    }

    #[test]
    fn skipping_joining_is_rejected() {
        let mut sm = NodeStateMachine::default();
        let err = sm.transition(NodeState::Ready).unwrap_err();
        assert_eq!(err, "Invalid state transition: Initializing -> Ready");
        assert_eq!(sm.current, NodeState::Initializing);
    }

    #[test]
    fn any_state_may_shut_down_once() {
        for start in [NodeState::Initializing, NodeState::Joining, NodeState::Ready] {
            let mut sm = NodeStateMachine { current: start };
            sm.transition(NodeState::ShuttingDown).unwrap();
            assert!(sm.transition(NodeState::ShuttingDown).is_err());
            assert!(sm.transition(NodeState::Ready).is_err());
        }
    }
}
