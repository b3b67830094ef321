use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::join_all;
use serde_json::Value;

use crate::composite::Composite;
use crate::emitter::Bubbling;
use crate::lock::lock;
use crate::models::{JobStats, WorkError, WorkErrorKind, WorkResult};
use crate::node::{Node, NodeKind};

pub(crate) struct QueueState {
    max_concurrency: AtomicUsize,
    stats: Mutex<JobStats>,
}

impl QueueState {
    pub(crate) fn new(max_concurrency: usize) -> WorkResult<Self> {
        Ok(Self {
            max_concurrency: AtomicUsize::new(check_concurrency(max_concurrency)?),
            stats: Mutex::new(JobStats::default()),
        })
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::SeqCst)
    }

    fn set_max_concurrency(&self, value: usize) -> WorkResult<()> {
        self.max_concurrency
            .store(check_concurrency(value)?, Ordering::SeqCst);
        Ok(())
    }

    fn stats(&self) -> JobStats {
        *lock(&self.stats)
    }

    pub(crate) fn child_added(&self) {
        lock(&self.stats).total += 1;
    }

    pub(crate) fn child_removed(&self) {
        let mut stats = lock(&self.stats);
        stats.total = stats.total.saturating_sub(1);
    }

    fn job_started(&self) {
        lock(&self.stats).active += 1;
    }

    fn job_settled(&self) {
        let mut stats = lock(&self.stats);
        stats.active = stats.active.saturating_sub(1);
        stats.complete += 1;
    }
}

/// Validates a concurrency cap: it must be a positive integer.
pub fn check_concurrency(value: usize) -> WorkResult<usize> {
    if value == 0 {
        return Err(WorkError::new(
            WorkErrorKind::InvalidConfig,
            "maxConcurrency must be a positive integer",
        ));
    }
    Ok(value)
}

/// Same check for a value that arrived as data.
pub fn concurrency_from_value(value: &Value) -> WorkResult<usize> {
    let limit = value
        .as_u64()
        .and_then(|limit| usize::try_from(limit).ok())
        .ok_or_else(|| {
            WorkError::new(
                WorkErrorKind::InvalidConfig,
                format!("maxConcurrency must be a positive integer, got {value}"),
            )
        })?;
    check_concurrency(limit)
}

impl Node {
    /// A node that processes its children with at most `max_concurrency` in
    /// flight.
    pub fn queue(max_concurrency: usize) -> WorkResult<Node> {
        Ok(Node::from_kind(NodeKind::Queue(QueueState::new(
            max_concurrency,
        )?)))
    }

    pub fn queue_of(
        max_concurrency: usize,
        jobs: impl IntoIterator<Item = Node>,
    ) -> WorkResult<Node> {
        let queue = Node::queue(max_concurrency)?;
        for job in jobs {
            queue.add(job)?;
        }
        Ok(queue)
    }

    pub(crate) fn queue_state(&self) -> Option<&QueueState> {
        match self.kind() {
            NodeKind::Queue(queue) => Some(queue),
            NodeKind::Loop(looped) => Some(looped.queue()),
            _ => None,
        }
    }

    /// `None` for nodes that do not schedule children.
    pub fn max_concurrency(&self) -> Option<usize> {
        self.queue_state().map(QueueState::max_concurrency)
    }

    pub fn set_max_concurrency(&self, value: usize) -> WorkResult<()> {
        match self.queue_state() {
            Some(queue) => queue.set_max_concurrency(value),
            None => Err(WorkError::new(
                WorkErrorKind::InvalidConfig,
                format!("{} nodes have no concurrency limit", self.node_type().as_str()),
            )
            .with_node(self.id())),
        }
    }

    pub fn job_stats(&self) -> Option<JobStats> {
        self.queue_state().map(QueueState::stats)
    }
}

/// Runs the queue's children in batches of at most `maxConcurrency`.
///
/// A batch is polled in child order on this task, so its children start in
/// that order, and it is fully awaited before the next one starts. When a
/// child fails the rest of its batch still settles, no further batch starts
/// and the first failure in child order is returned.
pub(crate) async fn run_queue(node: Node) -> WorkResult<Value> {
    let Some(queue) = node.queue_state() else {
        return Err(WorkError::internal("queue scheduler invoked on a non-queue node"));
    };
    let mut pending: VecDeque<Node> = node
        .children()
        .into_iter()
        .filter(|child| !node.is_hook(child))
        .collect();
    let max_concurrency = queue.max_concurrency();
    let mut results = Vec::with_capacity(pending.len());

    tracing::debug!(
        node = %node.id(),
        jobs = pending.len(),
        max_concurrency,
        "queue started"
    );

    let parent = &node;
    while !pending.is_empty() {
        let take = max_concurrency.min(pending.len());
        let batch = pending.drain(..take).map(move |child| {
            queue.job_started();
            parent.emit("job-start", vec![child.descriptor()]);
            async move {
                let outcome = child.process(Vec::new()).await;
                queue.job_settled();
                parent.emit("job-end", vec![child.descriptor()]);
                outcome
            }
        });
        for outcome in join_all(batch).await {
            match outcome {
                Ok(value) => results.push(value),
                Err(error) => {
                    tracing::debug!(node = %node.id(), error = %error, "queue stopped on failed job");
                    return Err(error);
                }
            }
        }
    }

    Ok(Value::Array(results))
}
