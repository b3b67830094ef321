pub mod error;
pub mod job_stats;
pub mod state;

pub use error::{WorkError, WorkErrorKind, WorkResult};
pub use job_stats::JobStats;
pub use state::ExecutionState;
