use serde_json::Value;

use crate::composite::Composite;
use crate::models::{ExecutionState, WorkError, WorkErrorKind, WorkResult};
use crate::node::job::{WorkFuture, run_job};
use crate::node::loop_node::run_loop;
use crate::node::placeholder::run_placeholder;
use crate::node::queue::run_queue;
use crate::node::{Node, NodeKind};

impl Node {
    /// Processes this node and, through it, its subtree.
    ///
    /// Non-empty `args` override both `args_fn` and the static arguments.
    pub fn process(&self, args: Vec<Value>) -> WorkFuture {
        let node = self.clone();
        Box::pin(async move { node.run(args).await })
    }

    async fn run(&self, call_args: Vec<Value>) -> WorkResult<Value> {
        if self.skip_if() {
            for node in self.traverse() {
                node.set_state(ExecutionState::Skipped)?;
            }
            return Ok(Value::Null);
        }

        self.validate()?;
        let args = self.resolve_args(call_args.clone(), None);
        self.set_state(ExecutionState::InProgress)?;

        let worked = self.perform(call_args, args).await;
        if self.state() == ExecutionState::Cancelled {
            tracing::debug!(node = %self.id(), "discarding outcome of cancelled node");
            return Err(WorkError::new(
                WorkErrorKind::Cancelled,
                "node was cancelled while in progress",
            )
            .with_node(self.id()));
        }

        let outcome = match worked {
            Ok(result) => self.succeed(result).await,
            Err(error) => Err(error),
        };
        let outcome = match outcome {
            Ok(result) => Ok(result),
            Err(error) => self.recover(error).await,
        };
        self.run_finally(outcome).await
    }

    async fn perform(&self, call_args: Vec<Value>, args: Vec<Value>) -> WorkResult<Value> {
        let outcome = match self.kind() {
            NodeKind::Bare => Err(WorkError::new(
                WorkErrorKind::InvalidNode,
                "node has no work to perform",
            )),
            NodeKind::Job(state) => run_job(self.clone(), state, args).await,
            NodeKind::Queue(_) => run_queue(self.clone()).await,
            NodeKind::Loop(_) => run_loop(self.clone(), call_args).await,
            NodeKind::Placeholder(state) => run_placeholder(self.clone(), state, args).await,
        };
        outcome.map_err(|error| error.with_node(self.id()))
    }

    async fn succeed(&self, result: Value) -> WorkResult<Value> {
        let result = match self.on_success() {
            Some(hook) => {
                self.run_hook(hook, vec![result, self.descriptor()])
                    .await?
            }
            None => result,
        };
        self.set_state_with(ExecutionState::Successful, vec![result.clone()])?;
        Ok(result)
    }

    async fn recover(&self, error: WorkError) -> WorkResult<Value> {
        self.set_state_with(ExecutionState::Failed, vec![error.to_value()])?;
        let handler = self.on_fail().filter(|_| {
            self.on_fail_condition()
                .is_none_or(|condition| condition.is_match(&error.message))
        });
        let Some(handler) = handler else {
            return Err(error);
        };
        tracing::warn!(
            node = %self.id(),
            handler = %handler.id(),
            error = %error,
            "failure handed to onFail"
        );
        self.run_hook(handler, vec![error.to_value(), self.descriptor()])
            .await
    }

    async fn run_finally(&self, outcome: WorkResult<Value>) -> WorkResult<Value> {
        let Some(hook) = self.finally() else {
            return outcome;
        };
        let so_far = outcome.as_ref().ok().cloned().unwrap_or(Value::Null);
        let finished = self.run_hook(hook, vec![so_far, self.descriptor()]).await;
        match (outcome, finished) {
            (_, Err(error)) => Err(error),
            (Err(error), Ok(_)) => Err(error),
            (Ok(_), Ok(result)) => Ok(result),
        }
    }

    /// Attaches `hook` beneath this node (once) and processes it. `defaults`
    /// become its arguments unless it already has some.
    async fn run_hook(&self, hook: Node, defaults: Vec<Value>) -> WorkResult<Value> {
        if !hook.has_args() {
            hook.set_args(defaults);
        }
        if !self.has_child(&hook) {
            self.add(hook.clone())?;
        }
        hook.process(Vec::new()).await
    }
}
