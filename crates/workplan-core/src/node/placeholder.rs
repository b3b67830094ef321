use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::composite::Composite;
use crate::lock::lock;
use crate::models::WorkResult;
use crate::node::{Node, NodeFactory, NodeKind};

pub(crate) struct PlaceholderState {
    factory: NodeFactory,
    resolved: Mutex<Option<Node>>,
}

impl Node {
    /// A node whose real subtree is only built when it is processed.
    pub fn placeholder(
        factory: impl Fn(&[Value]) -> WorkResult<Node> + Send + Sync + 'static,
    ) -> Node {
        Node::from_kind(NodeKind::Placeholder(PlaceholderState {
            factory: Arc::new(factory),
            resolved: Mutex::new(None),
        }))
    }

    /// The node built by the last run of a placeholder.
    pub fn resolved_node(&self) -> Option<Node> {
        match self.kind() {
            NodeKind::Placeholder(state) => lock(&state.resolved).clone(),
            _ => None,
        }
    }
}

/// Builds the concrete node, attaches it beneath the placeholder so its
/// events bubble through, and processes it.
pub(crate) async fn run_placeholder(
    node: Node,
    state: &PlaceholderState,
    args: Vec<Value>,
) -> WorkResult<Value> {
    let concrete = (state.factory)(&args)?;
    let previous = lock(&state.resolved).replace(concrete.clone());
    if let Some(previous) = previous {
        node.remove(&previous);
    }
    node.add(concrete.clone())?;
    tracing::debug!(
        node = %node.id(),
        resolved = %concrete.id(),
        "placeholder materialized"
    );
    concrete.process(Vec::new()).await
}
