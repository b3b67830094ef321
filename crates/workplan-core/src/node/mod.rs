pub mod job;
mod lifecycle;
pub mod loop_node;
pub mod placeholder;
pub mod queue;
mod scope;

use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, Weak};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::composite::{Composite, TreeLinks};
use crate::emitter::{Bubbling, Emitter, Event, ListenerId};
use crate::lock::lock;
use crate::models::{ExecutionState, WorkError, WorkErrorKind, WorkResult};
use crate::state_machine::StateMachine;

pub use job::{Invocation, JobFn, WorkFuture, job_fn, sync_job_fn};
pub use loop_node::{LoopBinding, LoopSourceFn};

use job::JobState;
use loop_node::LoopState;
use placeholder::PlaceholderState;
use queue::QueueState;
use scope::Scope;

/// Computes arguments at run time. Receives the loop item when called for a
/// loop iteration.
pub type ArgsFn = Arc<dyn Fn(Option<&Value>) -> Vec<Value> + Send + Sync>;

/// Produces a fresh node, given the arguments of the call that needs it.
pub type NodeFactory = Arc<dyn Fn(&[Value]) -> WorkResult<Node> + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Node,
    Job,
    Queue,
    Loop,
    Placeholder,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Node => "node",
            NodeType::Job => "job",
            NodeType::Queue => "queue",
            NodeType::Loop => "loop",
            NodeType::Placeholder => "placeholder",
        }
    }
}

pub(crate) enum NodeKind {
    Bare,
    Job(JobState),
    Queue(QueueState),
    Loop(LoopState),
    Placeholder(PlaceholderState),
}

#[derive(Default)]
struct NodeSettings {
    name: Option<String>,
    invoke: Option<String>,
    args: Option<Vec<Value>>,
    args_fn: Option<ArgsFn>,
    on_success: Option<Node>,
    on_fail: Option<Node>,
    on_fail_condition: Option<Regex>,
    finally: Option<Node>,
    skip_if: bool,
}

struct NodeInner {
    id: String,
    kind: NodeKind,
    links: TreeLinks<Node>,
    machine: StateMachine<ExecutionState>,
    emitter: Emitter<Node>,
    scope: Scope,
    settings: Mutex<NodeSettings>,
}

/// Shared handle to an execution node. Clones refer to the same node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

#[derive(Clone)]
pub struct WeakNode(Weak<NodeInner>);

impl Node {
    pub(crate) fn from_kind(kind: NodeKind) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id: Uuid::new_v4().to_string(),
                kind,
                links: TreeLinks::default(),
                machine: StateMachine::new(ExecutionState::Pending, ExecutionState::moves()),
                emitter: Emitter::new(),
                scope: Scope::default(),
                settings: Mutex::new(NodeSettings::default()),
            }),
        }
    }

    /// A plain node with no work of its own. It can group children and carry
    /// scope, but processing it fails validation.
    pub fn new() -> Self {
        Self::from_kind(NodeKind::Bare)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn node_type(&self) -> NodeType {
        match &self.inner.kind {
            NodeKind::Bare => NodeType::Node,
            NodeKind::Job(_) => NodeType::Job,
            NodeKind::Queue(_) => NodeType::Queue,
            NodeKind::Loop(_) => NodeType::Loop,
            NodeKind::Placeholder(_) => NodeType::Placeholder,
        }
    }

    pub(crate) fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    pub fn state(&self) -> ExecutionState {
        self.inner.machine.state()
    }

    pub fn set_state(&self, state: ExecutionState) -> WorkResult<()> {
        self.set_state_with(state, Vec::new())
    }

    /// Moves to `state`, emitting `state` (new, previous) and then an event
    /// named after the new state carrying `args`.
    pub fn set_state_with(&self, state: ExecutionState, args: Vec<Value>) -> WorkResult<()> {
        let Some(transition) = self
            .inner
            .machine
            .set_state(state)
            .map_err(|error| error.with_node(self.id()))?
        else {
            return Ok(());
        };
        tracing::debug!(
            node = %self.id(),
            name = ?self.name(),
            from = %transition.from,
            to = %transition.to,
            "node state changed"
        );
        self.emit(
            "state",
            vec![json!(transition.to.as_str()), json!(transition.from.as_str())],
        );
        self.emit(transition.to.as_str(), args);
        Ok(())
    }

    /// Returns this node and every descendant to `pending`. Scope contents
    /// are left alone.
    pub fn reset_state(&self) {
        for node in self.traverse() {
            let previous = node.inner.machine.reset();
            node.emit("reset", vec![json!(previous.as_str())]);
        }
    }

    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Event<Node>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.emitter.on(event, handler)
    }

    pub fn once(
        &self,
        event: &str,
        handler: impl Fn(&Event<Node>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.emitter.once(event, handler)
    }

    pub fn on_any(&self, handler: impl Fn(&Event<Node>) + Send + Sync + 'static) -> ListenerId {
        self.inner.emitter.on_any(handler)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.emitter.off(event, id)
    }

    /// Name with scope tokens resolved against the current scope.
    pub fn name(&self) -> Option<String> {
        let raw = lock(&self.inner.settings).name.clone()?;
        Some(crate::token::render(&self.substitute(&Value::String(raw))))
    }

    pub fn set_name(&self, name: impl Into<String>) {
        lock(&self.inner.settings).name = Some(name.into());
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    /// Name of the service function this node wraps, if any.
    pub fn invoke(&self) -> Option<String> {
        lock(&self.inner.settings).invoke.clone()
    }

    pub fn set_invoke(&self, invoke: impl Into<String>) {
        lock(&self.inner.settings).invoke = Some(invoke.into());
    }

    /// Static arguments with scope tokens resolved.
    pub fn args(&self) -> Option<Vec<Value>> {
        let raw = lock(&self.inner.settings).args.clone()?;
        Some(raw.iter().map(|arg| self.substitute(arg)).collect())
    }

    pub fn has_args(&self) -> bool {
        lock(&self.inner.settings)
            .args
            .as_ref()
            .is_some_and(|args| !args.is_empty())
    }

    pub fn set_args(&self, args: Vec<Value>) {
        lock(&self.inner.settings).args = Some(args);
    }

    pub fn clear_args(&self) {
        lock(&self.inner.settings).args = None;
    }

    pub fn with_args(self, args: Vec<Value>) -> Self {
        self.set_args(args);
        self
    }

    pub fn set_args_fn(&self, args_fn: ArgsFn) {
        lock(&self.inner.settings).args_fn = Some(args_fn);
    }

    pub fn with_args_fn(
        self,
        args_fn: impl Fn(Option<&Value>) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.set_args_fn(Arc::new(args_fn));
        self
    }

    pub fn on_success(&self) -> Option<Node> {
        lock(&self.inner.settings).on_success.clone()
    }

    pub fn set_on_success(&self, node: Node) {
        lock(&self.inner.settings).on_success = Some(node);
    }

    pub fn with_on_success(self, node: Node) -> Self {
        self.set_on_success(node);
        self
    }

    pub fn on_fail(&self) -> Option<Node> {
        lock(&self.inner.settings).on_fail.clone()
    }

    pub fn set_on_fail(&self, node: Node) {
        lock(&self.inner.settings).on_fail = Some(node);
    }

    pub fn with_on_fail(self, node: Node) -> Self {
        self.set_on_fail(node);
        self
    }

    pub fn on_fail_condition(&self) -> Option<Regex> {
        lock(&self.inner.settings).on_fail_condition.clone()
    }

    /// Restricts onFail to errors whose message matches `condition`.
    pub fn set_on_fail_condition(&self, condition: Regex) {
        lock(&self.inner.settings).on_fail_condition = Some(condition);
    }

    pub fn with_on_fail_condition(self, condition: Regex) -> Self {
        self.set_on_fail_condition(condition);
        self
    }

    pub fn finally(&self) -> Option<Node> {
        lock(&self.inner.settings).finally.clone()
    }

    pub fn set_finally(&self, node: Node) {
        lock(&self.inner.settings).finally = Some(node);
    }

    pub fn with_finally(self, node: Node) -> Self {
        self.set_finally(node);
        self
    }

    pub fn skip_if(&self) -> bool {
        lock(&self.inner.settings).skip_if
    }

    pub fn set_skip_if(&self, skip: bool) {
        lock(&self.inner.settings).skip_if = skip;
    }

    pub fn with_skip_if(self, skip: bool) -> Self {
        self.set_skip_if(skip);
        self
    }

    pub(crate) fn is_hook(&self, node: &Node) -> bool {
        let settings = lock(&self.inner.settings);
        [&settings.on_success, &settings.on_fail, &settings.finally]
            .into_iter()
            .flatten()
            .any(|hook| hook.same_node(node))
    }

    /// Call-time arguments win, then `args_fn`, then the static arguments.
    pub(crate) fn resolve_args(&self, call_args: Vec<Value>, item: Option<&Value>) -> Vec<Value> {
        if !call_args.is_empty() {
            return call_args;
        }
        let args_fn = lock(&self.inner.settings).args_fn.clone();
        match args_fn {
            Some(args_fn) => args_fn(item),
            None => self.args().unwrap_or_default(),
        }
    }

    /// Checks the minimal contract before processing.
    pub fn validate(&self) -> WorkResult<()> {
        if self.id().is_empty() {
            return Err(WorkError::new(WorkErrorKind::InvalidNode, "node has no id"));
        }
        if matches!(self.kind(), NodeKind::Bare) {
            return Err(WorkError::new(
                WorkErrorKind::InvalidNode,
                format!("not a processable node: {self}"),
            )
            .with_node(self.id()));
        }
        let on_fail_invalid = self.on_fail().is_some_and(|on_fail| {
            on_fail.id().is_empty() || matches!(on_fail.kind(), NodeKind::Bare)
        });
        if on_fail_invalid {
            return Err(WorkError::new(
                WorkErrorKind::InvalidNode,
                "onFail must be a valid node",
            )
            .with_node(self.id()));
        }
        Ok(())
    }

    /// Compact value form handed to hooks and carried by events.
    pub fn descriptor(&self) -> Value {
        json!({
            "id": self.id(),
            "name": self.name(),
            "type": self.node_type().as_str(),
            "state": self.state().as_str(),
        })
    }

    /// Indented outline of the subtree, one line per node.
    pub fn to_tree(&self) -> String {
        let base = self.level();
        self.traverse()
            .map(|node| format!("{}- {node}\n", "  ".repeat(node.level() - base)))
            .collect()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Composite for Node {
    type WeakRef = WeakNode;

    fn links(&self) -> &TreeLinks<Self> {
        &self.inner.links
    }

    fn downgrade(&self) -> WeakNode {
        WeakNode(Arc::downgrade(&self.inner))
    }

    fn upgrade(weak: &WeakNode) -> Option<Self> {
        weak.0.upgrade().map(|inner| Node { inner })
    }

    fn same_node(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn attached(&self, child: &Self) {
        if let Some(queue) = self.queue_state() {
            queue.child_added();
        }
        self.emit("add", vec![child.descriptor()]);
    }

    fn detached(&self, _child: &Self) {
        if let Some(queue) = self.queue_state() {
            queue.child_removed();
        }
    }
}

impl Bubbling for Node {
    fn emitter(&self) -> &Emitter<Self> {
        &self.inner.emitter
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(other)
    }
}

impl Eq for Node {}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = self
            .name()
            .or_else(|| self.invoke())
            .unwrap_or_else(|| self.node_type().as_str().to_string());
        write!(f, "{label}: {}", self.state())
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("type", &self.node_type())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
