use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::models::WorkResult;
use crate::node::{Node, NodeKind};

pub type WorkFuture = Pin<Box<dyn Future<Output = WorkResult<Value>> + Send>>;

pub type JobFn = Arc<dyn Fn(Invocation) -> WorkFuture + Send + Sync>;

/// What a job function receives: its resolved arguments and the node running
/// it, through which scope and ancestors are reachable.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub node: Node,
    pub args: Vec<Value>,
}

impl Invocation {
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }
}

pub fn job_fn<F, Fut>(f: F) -> JobFn
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkResult<Value>> + Send + 'static,
{
    Arc::new(move |invocation| Box::pin(f(invocation)) as WorkFuture)
}

pub fn sync_job_fn<F>(f: F) -> JobFn
where
    F: Fn(Invocation) -> WorkResult<Value> + Send + Sync + 'static,
{
    Arc::new(move |invocation| {
        let outcome = f(invocation);
        Box::pin(async move { outcome }) as WorkFuture
    })
}

pub(crate) struct JobState {
    run: JobFn,
}

impl Node {
    /// A leaf node that runs `run` when processed.
    pub fn job(run: JobFn) -> Node {
        Node::from_kind(NodeKind::Job(JobState { run }))
    }

    pub fn async_job<F, Fut>(f: F) -> Node
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<Value>> + Send + 'static,
    {
        Node::job(job_fn(f))
    }

    pub fn sync_job<F>(f: F) -> Node
    where
        F: Fn(Invocation) -> WorkResult<Value> + Send + Sync + 'static,
    {
        Node::job(sync_job_fn(f))
    }
}

pub(crate) fn run_job(node: Node, state: &JobState, args: Vec<Value>) -> WorkFuture {
    (state.run)(Invocation { node, args })
}
