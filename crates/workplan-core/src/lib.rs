pub mod composite;
pub mod config;
pub mod emitter;
mod lock;
pub mod logging;
pub mod models;
pub mod node;
pub mod planner;
pub mod state_machine;
pub mod token;
pub mod work;

pub use composite::Composite;
pub use config::EngineConfig;
pub use emitter::{Bubbling, Event, ListenerId};
pub use models::{ExecutionState, JobStats, WorkError, WorkErrorKind, WorkResult};
pub use node::{Invocation, Node, NodeType};
pub use planner::{Blueprint, Context, Plan, PlanType, Planner, Service};
pub use work::Work;
