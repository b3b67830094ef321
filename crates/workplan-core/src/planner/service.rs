use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::models::WorkResult;
use crate::node::{Invocation, JobFn, Node, NodeFactory, job_fn, sync_job_fn};

/// A named function a plan can `invoke`.
#[derive(Clone)]
pub enum ServiceFn {
    /// Work run by a job node.
    Job(JobFn),
    /// Builds a node, for `factory` plans.
    Factory(NodeFactory),
}

/// A bundle of invokable functions registered under one service name.
#[derive(Clone, Default)]
pub struct Service {
    functions: BTreeMap<String, ServiceFn>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<Value>> + Send + 'static,
    {
        self.insert(name, ServiceFn::Job(job_fn(f)));
        self
    }

    pub fn with_sync_job<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Invocation) -> WorkResult<Value> + Send + Sync + 'static,
    {
        self.insert(name, ServiceFn::Job(sync_job_fn(f)));
        self
    }

    pub fn with_factory(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> WorkResult<Node> + Send + Sync + 'static,
    ) -> Self {
        self.insert(name, ServiceFn::Factory(Arc::new(f)));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, function: ServiceFn) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<&ServiceFn> {
        self.functions.get(name)
    }

    /// Adds `other`'s functions, replacing any with the same name.
    pub fn merge(&mut self, other: Service) {
        self.functions.extend(other.functions);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Debug for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
