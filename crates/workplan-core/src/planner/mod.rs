pub mod context;
pub mod plan;
pub mod service;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use serde_json::Value;

pub use context::{Context, ContextEntry, Provider};
pub use plan::{Blueprint, ItemsFn, LoopSource, Plan, PlanType, RepeatForEach, TemplateFn};
pub use service::{Service, ServiceFn};

use crate::composite::Composite;
use crate::config::EngineConfig;
use crate::lock::lock;
use crate::models::{WorkError, WorkErrorKind, WorkResult};
use crate::node::queue::concurrency_from_value;
use crate::node::{JobFn, LoopBinding, LoopSourceFn, Node, NodeFactory};
use crate::token;

struct PlannerInner {
    config: EngineConfig,
    services: Mutex<BTreeMap<String, Service>>,
    ctx: Context,
}

/// Shared handle; clones compile against the same services and context.
#[derive(Clone)]
pub struct Planner {
    inner: Arc<PlannerInner>,
}

impl Default for Planner {
    fn default() -> Self {
        Self::from_parts(EngineConfig::default(), Context::new())
    }
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> WorkResult<Self> {
        Self::with_context(config, Context::new())
    }

    /// Compiles against an existing context instead of a fresh one.
    pub fn with_context(config: EngineConfig, ctx: Context) -> WorkResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, ctx))
    }

    fn from_parts(config: EngineConfig, ctx: Context) -> Self {
        Self {
            inner: Arc::new(PlannerInner {
                config,
                services: Mutex::new(BTreeMap::new()),
                ctx,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn ctx(&self) -> &Context {
        &self.inner.ctx
    }

    /// Registers functions under the default service name.
    pub fn add_service(&self, service: Service) {
        let name = self.inner.config.default_service.clone();
        self.add_service_as(name, service);
    }

    /// Registers functions under `name`, merging into an existing bundle.
    pub fn add_service_as(&self, name: impl Into<String>, service: Service) {
        let name = name.into();
        tracing::debug!(service = %name, functions = service.len(), "service registered");
        let mut services = lock(&self.inner.services);
        match services.get_mut(&name) {
            Some(existing) => existing.merge(service),
            None => {
                services.insert(name, service);
            }
        }
    }

    /// Looks up `invoke` in the named bundle, or the default one.
    pub fn service_function(&self, service: Option<&str>, invoke: &str) -> WorkResult<ServiceFn> {
        let service = service.unwrap_or(&self.inner.config.default_service);
        lock(&self.inner.services)
            .get(service)
            .and_then(|bundle| bundle.get(invoke))
            .cloned()
            .ok_or_else(|| {
                WorkError::new(
                    WorkErrorKind::ServiceFunctionNotFound,
                    format!("could not find function '{invoke}' in service '{service}'"),
                )
            })
    }

    /// Compiles a plan. Already compiled nodes are returned as they are.
    pub fn to_model(&self, blueprint: impl Into<Blueprint>) -> WorkResult<Node> {
        match blueprint.into() {
            Blueprint::Node(node) => Ok(node),
            Blueprint::Plan(plan) => self.compile(*plan),
        }
    }

    fn compile(&self, plan: Plan) -> WorkResult<Node> {
        if plan.plan_type == PlanType::Unknown {
            return Err(invalid_plan(&plan));
        }

        let on_fail = self.compile_hook(plan.on_fail.as_deref())?;
        let on_success = self.compile_hook(plan.on_success.as_deref())?;
        let finally = self.compile_hook(plan.finally.as_deref())?;

        let node = match plan.plan_type {
            PlanType::Job => self.build_job(&plan)?,
            PlanType::Queue => self.build_queue(&plan)?,
            PlanType::Template => self.build_template(&plan)?,
            PlanType::Loop => self.build_loop(&plan)?,
            PlanType::Factory => self.build_factory(&plan)?,
            PlanType::Unknown => return Err(invalid_plan(&plan)),
        };

        if plan.plan_type != PlanType::Factory {
            apply_options(&node, &plan)?;
            if let Some(hook) = on_fail {
                node.set_on_fail(hook);
            }
            if let Some(hook) = on_success {
                node.set_on_success(hook);
            }
            if let Some(hook) = finally {
                node.set_finally(hook);
            }
        }

        if let Some(key) = &plan.result {
            self.store_result(&node, key.clone());
        }

        tracing::debug!(
            plan = plan.plan_type.as_str(),
            node = %node.id(),
            name = ?node.name(),
            "plan compiled"
        );
        Ok(node)
    }

    fn compile_hook(&self, hook: Option<&Blueprint>) -> WorkResult<Option<Node>> {
        hook.map(|blueprint| self.to_model(blueprint.clone()))
            .transpose()
    }

    fn build_job(&self, plan: &Plan) -> WorkResult<Node> {
        let run = match (&plan.invoke, &plan.run) {
            (Some(invoke), _) => self.job_function(plan.service.as_deref(), invoke)?,
            (None, Some(run)) => run.clone(),
            (None, None) => return Err(invalid_plan(plan)),
        };
        let node = Node::job(run);
        if let Some(invoke) = &plan.invoke {
            node.set_invoke(invoke.clone());
        }
        Ok(node)
    }

    fn build_queue(&self, plan: &Plan) -> WorkResult<Node> {
        let entries = plan.queue.as_ref().ok_or_else(|| invalid_plan(plan))?;
        let node = Node::queue(self.concurrency(plan)?)?;
        for entry in entries {
            node.add(self.to_model(entry.clone())?)?;
        }
        Ok(node)
    }

    fn build_template(&self, plan: &Plan) -> WorkResult<Node> {
        let template = plan.template.as_ref().ok_or_else(|| invalid_plan(plan))?;
        let node = Node::queue(self.concurrency(plan)?)?;
        let items = plan
            .repeat_for_each
            .as_ref()
            .map(RepeatForEach::items)
            .unwrap_or_default();
        for item in &items {
            node.add(self.to_model(template(item))?)?;
        }
        Ok(node)
    }

    fn build_loop(&self, plan: &Plan) -> WorkResult<Node> {
        let node = Node::loop_node(self.concurrency(plan)?)?;
        if let Some(source) = &plan.for_each {
            node.set_loop_source(self.loop_source(source.clone()))?;
        }
        let item_plan = plan.node.as_deref().ok_or_else(|| {
            WorkError::new(WorkErrorKind::InvalidPlanType, "loop plan has no node")
        })?;
        node.set_node_factory(self.loop_factory(item_plan)?)?;
        Ok(node)
    }

    fn build_factory(&self, plan: &Plan) -> WorkResult<Node> {
        let node = match (&plan.invoke, &plan.factory) {
            (Some(invoke), _) => {
                let node = match self.service_function(plan.service.as_deref(), invoke)? {
                    ServiceFn::Factory(factory) => factory(&[])?,
                    ServiceFn::Job(_) => {
                        return Err(WorkError::new(
                            WorkErrorKind::InvalidPlanType,
                            format!("service function '{invoke}' is not a node factory"),
                        ));
                    }
                };
                node.validate()?;
                node
            }
            (None, Some(factory)) => factory(&[])?,
            (None, None) => return Err(invalid_plan(plan)),
        };
        if let Some(args) = &plan.args {
            node.set_args(args.clone());
        }
        Ok(node)
    }

    fn job_function(&self, service: Option<&str>, invoke: &str) -> WorkResult<JobFn> {
        match self.service_function(service, invoke)? {
            ServiceFn::Job(run) => Ok(run),
            ServiceFn::Factory(_) => Err(WorkError::new(
                WorkErrorKind::InvalidPlanType,
                format!("service function '{invoke}' builds nodes; use a factory plan"),
            )),
        }
    }

    fn concurrency(&self, plan: &Plan) -> WorkResult<usize> {
        match &plan.max_concurrency {
            Some(limit) => concurrency_from_value(limit),
            None => Ok(self.inner.config.default_max_concurrency),
        }
    }

    /// Evaluated each time the loop runs: `of` is either a context path or
    /// the items themselves.
    fn loop_source(&self, source: LoopSource) -> LoopSourceFn {
        let ctx = self.ctx().clone();
        Arc::new(move || {
            let items = match &source.of {
                Value::String(path) => ctx
                    .resolve_path(path)
                    .filter(|value| !value.is_null())
                    .ok_or_else(|| {
                        WorkError::new(WorkErrorKind::NotFound, format!("of not found: {path}"))
                    })?,
                literal => literal.clone(),
            };
            LoopBinding::from_value(source.var.clone(), items)
        })
    }

    /// Builds the per-item node factory for a loop. Accepts `job` plans with
    /// `invoke` or a function, and `queue` plans; every call compiles a
    /// fresh node.
    pub fn loop_factory(&self, item_plan: &Blueprint) -> WorkResult<NodeFactory> {
        let Blueprint::Plan(plan) = item_plan else {
            return Err(WorkError::new(
                WorkErrorKind::InvalidPlanType,
                "loop node must be a plan, not a compiled node",
            ));
        };
        match (plan.plan_type, &plan.invoke, &plan.run, &plan.queue) {
            (PlanType::Job, Some(invoke), _, _) => {
                self.job_function(plan.service.as_deref(), invoke)?;
            }
            (PlanType::Job, None, Some(_), _) | (PlanType::Queue, _, _, Some(_)) => {}
            _ => return Err(invalid_plan(plan)),
        }
        let planner = self.clone();
        let plan = (**plan).clone();
        Ok(Arc::new(move |_args| planner.to_model(plan.clone())))
    }

    /// Writes the node's own result into the context once it succeeds.
    /// Bubbled `successful` events from descendants are ignored.
    fn store_result(&self, node: &Node, key: String) {
        let ctx = self.ctx().clone();
        let id = node.id().to_string();
        node.on("successful", move |event| {
            if event.target.id() != id {
                return;
            }
            let key = token::render(&event.target.substitute(&Value::String(key.clone())));
            let result = event.args.first().cloned().unwrap_or(Value::Null);
            ctx.set(key, result);
        });
    }
}

/// Settings shared by every plan type that builds its node itself.
fn apply_options(node: &Node, plan: &Plan) -> WorkResult<()> {
    if let Some(name) = &plan.name {
        node.set_name(name.clone());
    }
    if let Some(args) = &plan.args {
        node.set_args(args.clone());
    }
    if let Some(args_fn) = &plan.args_fn {
        node.set_args_fn(args_fn.clone());
    }
    if let Some(pattern) = &plan.on_fail_condition {
        let condition = Regex::new(pattern).map_err(|error| {
            WorkError::new(
                WorkErrorKind::InvalidConfig,
                format!("invalid onFailCondition '{pattern}': {error}"),
            )
        })?;
        node.set_on_fail_condition(condition);
    }
    if plan.skip_if {
        node.set_skip_if(true);
    }
    if let Some(scope) = &plan.scope {
        for (key, value) in scope {
            node.scope_set(key.clone(), value.clone());
        }
    }
    Ok(())
}

fn invalid_plan(plan: &Plan) -> WorkError {
    WorkError::new(
        WorkErrorKind::InvalidPlanType,
        format!("invalid plan item type: {}", plan.plan_type.as_str()),
    )
}
