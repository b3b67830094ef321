use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::composite::Composite;
use crate::lock::lock;
use crate::models::{WorkError, WorkErrorKind, WorkResult};
use crate::node::queue::{QueueState, run_queue};
use crate::node::{Node, NodeFactory, NodeKind};

/// The loop variable and the items it takes, evaluated once per run.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopBinding {
    pub var: String,
    pub items: Vec<Value>,
}

impl LoopBinding {
    pub fn new(var: impl Into<String>, items: Vec<Value>) -> Self {
        Self {
            var: var.into(),
            items,
        }
    }

    /// Accepts an array value; anything else is not iterable.
    pub fn from_value(var: impl Into<String>, value: Value) -> WorkResult<Self> {
        match value {
            Value::Array(items) => Ok(Self::new(var, items)),
            other => Err(WorkError::new(
                WorkErrorKind::InvalidConfig,
                format!("loop source is not iterable: {other}"),
            )),
        }
    }
}

pub type LoopSourceFn = Arc<dyn Fn() -> WorkResult<LoopBinding> + Send + Sync>;

pub(crate) struct LoopState {
    queue: QueueState,
    source: Mutex<Option<LoopSourceFn>>,
    factory: Mutex<Option<NodeFactory>>,
    materialized: Mutex<Vec<Node>>,
}

impl LoopState {
    pub(crate) fn queue(&self) -> &QueueState {
        &self.queue
    }
}

impl Node {
    /// A queue whose children are created at run time, one per item produced
    /// by the loop source.
    pub fn loop_node(max_concurrency: usize) -> WorkResult<Node> {
        Ok(Node::from_kind(NodeKind::Loop(LoopState {
            queue: QueueState::new(max_concurrency)?,
            source: Mutex::new(None),
            factory: Mutex::new(None),
            materialized: Mutex::new(Vec::new()),
        })))
    }

    pub fn loop_over(
        max_concurrency: usize,
        source: impl Fn() -> WorkResult<LoopBinding> + Send + Sync + 'static,
        factory: impl Fn(&[Value]) -> WorkResult<Node> + Send + Sync + 'static,
    ) -> WorkResult<Node> {
        let node = Node::loop_node(max_concurrency)?;
        node.set_loop_source(Arc::new(source))?;
        node.set_node_factory(Arc::new(factory))?;
        Ok(node)
    }

    pub fn set_loop_source(&self, source: LoopSourceFn) -> WorkResult<()> {
        *lock(&self.loop_state()?.source) = Some(source);
        Ok(())
    }

    pub fn set_node_factory(&self, factory: NodeFactory) -> WorkResult<()> {
        *lock(&self.loop_state()?.factory) = Some(factory);
        Ok(())
    }

    fn loop_state(&self) -> WorkResult<&LoopState> {
        match self.kind() {
            NodeKind::Loop(state) => Ok(state),
            _ => Err(WorkError::new(
                WorkErrorKind::InvalidConfig,
                format!("{} nodes have no loop source", self.node_type().as_str()),
            )
            .with_node(self.id())),
        }
    }
}

/// Materializes one child per item, then schedules them like a queue.
///
/// Children created by an earlier run are detached first. Each child gets
/// `scope[var] = item` and, unless it already has arguments, the call-time
/// arguments, else `argsFn(item)`, else the loop's own arguments.
pub(crate) async fn run_loop(node: Node, call_args: Vec<Value>) -> WorkResult<Value> {
    let state = node.loop_state()?;
    let stale: Vec<Node> = std::mem::take(&mut *lock(&state.materialized));
    for child in &stale {
        node.remove(child);
    }

    let source = lock(&state.source).clone();
    if let Some(source) = source {
        let binding = source().map_err(|error| error.with_node(node.id()))?;
        let factory = lock(&state.factory).clone().ok_or_else(|| {
            WorkError::new(WorkErrorKind::InvalidConfig, "loop has no node factory")
                .with_node(node.id())
        })?;

        tracing::debug!(
            node = %node.id(),
            var = %binding.var,
            items = binding.items.len(),
            "loop materializing children"
        );

        for item in binding.items {
            let child = factory(&call_args)?;
            node.add(child.clone())?;
            lock(&state.materialized).push(child.clone());
            child.scope_set(binding.var.clone(), item.clone());
            let args = node.resolve_args(call_args.clone(), Some(&item));
            if !child.has_args() {
                child.set_args(args);
            }
        }
    }

    run_queue(node.clone()).await
}
