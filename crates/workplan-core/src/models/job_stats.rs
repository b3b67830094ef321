use serde::{Deserialize, Serialize};

/// Counters maintained by a queue while it schedules its children.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub complete: usize,
    pub active: usize,
}
