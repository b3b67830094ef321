use serde_json::{Value, json};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WorkErrorKind {
    InvalidMove,
    InvalidNode,
    TypeKind,
    InvalidConfig,
    ServiceFunctionNotFound,
    InvalidPlanType,
    NotFound,
    Cancelled,
    Failed,
    Internal,
}

impl WorkErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkErrorKind::InvalidMove => "INVALID_MOVE",
            WorkErrorKind::InvalidNode => "INVALID_NODE",
            WorkErrorKind::TypeKind => "TYPE_KIND",
            WorkErrorKind::InvalidConfig => "INVALID_CONFIG",
            WorkErrorKind::ServiceFunctionNotFound => "SERVICE_FUNCTION_NOT_FOUND",
            WorkErrorKind::InvalidPlanType => "INVALID_PLAN_TYPE",
            WorkErrorKind::NotFound => "NOT_FOUND",
            WorkErrorKind::Cancelled => "CANCELLED",
            WorkErrorKind::Failed => "FAILED",
            WorkErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Error raised by the engine, or by a node's own work function.
///
/// `node` carries the id of the node that raised it, when known.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct WorkError {
    pub kind: WorkErrorKind,
    pub node: Option<String>,
    pub message: String,
}

impl WorkError {
    pub fn new(kind: WorkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            node: None,
            message: message.into(),
        }
    }

    /// Failure of user work. This is what job functions normally return.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(WorkErrorKind::Failed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(WorkErrorKind::Internal, message)
    }

    /// Attributes the error to `node` unless it is already attributed.
    pub fn with_node(mut self, node: &str) -> Self {
        if self.node.is_none() {
            self.node = Some(node.to_string());
        }
        self
    }

    /// Value form handed to onFail hooks as their first argument.
    pub fn to_value(&self) -> Value {
        json!({
            "kind": self.kind.as_str(),
            "message": self.message,
            "node": self.node,
        })
    }
}

pub type WorkResult<T> = Result<T, WorkError>;
