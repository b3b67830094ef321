use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::state_machine::Move;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionState {
    Pending,
    InProgress,
    Successful,
    Failed,
    Skipped,
    Cancelled,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 6] = [
        ExecutionState::Pending,
        ExecutionState::InProgress,
        ExecutionState::Successful,
        ExecutionState::Failed,
        ExecutionState::Skipped,
        ExecutionState::Cancelled,
    ];

    /// Event name emitted on arrival in this state.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::InProgress => "in-progress",
            ExecutionState::Successful => "successful",
            ExecutionState::Failed => "failed",
            ExecutionState::Skipped => "skipped",
            ExecutionState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Successful
                | ExecutionState::Failed
                | ExecutionState::Skipped
                | ExecutionState::Cancelled
        )
    }

    /// Legal moves for every execution node.
    pub fn moves() -> Vec<Move<ExecutionState>> {
        vec![
            Move::new([ExecutionState::Pending], [ExecutionState::InProgress]),
            Move::new([ExecutionState::Pending], [ExecutionState::Skipped]),
            Move::new([ExecutionState::InProgress], [ExecutionState::Failed]),
            Move::new([ExecutionState::InProgress], [ExecutionState::Successful]),
            Move::new([ExecutionState::Pending], [ExecutionState::Cancelled]),
            Move::new([ExecutionState::InProgress], [ExecutionState::Cancelled]),
        ]
    }
}

impl Display for ExecutionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
