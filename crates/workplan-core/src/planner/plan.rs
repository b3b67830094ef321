use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::models::{WorkError, WorkErrorKind, WorkResult};
use crate::node::{ArgsFn, Invocation, JobFn, Node, NodeFactory, job_fn, sync_job_fn};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Job,
    Queue,
    Template,
    Loop,
    Factory,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PlanType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanType::Job => "job",
            PlanType::Queue => "queue",
            PlanType::Template => "template",
            PlanType::Loop => "loop",
            PlanType::Factory => "factory",
            PlanType::Unknown => "unknown",
        }
    }
}

/// Produces the plan for one `repeatForEach` item.
pub type TemplateFn = Arc<dyn Fn(&Value) -> Blueprint + Send + Sync>;

pub type ItemsFn = Arc<dyn Fn() -> Vec<Value> + Send + Sync>;

#[derive(Clone)]
pub enum RepeatForEach {
    Items(Vec<Value>),
    Provider(ItemsFn),
}

impl RepeatForEach {
    pub fn items(&self) -> Vec<Value> {
        match self {
            RepeatForEach::Items(items) => items.clone(),
            RepeatForEach::Provider(provider) => provider(),
        }
    }
}

impl<'de> Deserialize<'de> for RepeatForEach {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Value>::deserialize(deserializer).map(RepeatForEach::Items)
    }
}

impl Debug for RepeatForEach {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatForEach::Items(items) => f.debug_tuple("Items").field(items).finish(),
            RepeatForEach::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// `for` clause of a loop plan. `of` is a dotted context path, or the items
/// themselves as an array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopSource {
    pub var: String,
    pub of: Value,
}

/// Declarative description of a node tree. Data fields deserialize from
/// camelCase JSON; function fields are set through the builders.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plan {
    #[serde(rename = "type")]
    pub plan_type: PlanType,
    pub name: Option<String>,
    pub service: Option<String>,
    pub invoke: Option<String>,
    #[serde(skip)]
    pub run: Option<JobFn>,
    #[serde(skip)]
    pub factory: Option<NodeFactory>,
    pub args: Option<Vec<Value>>,
    #[serde(skip)]
    pub args_fn: Option<ArgsFn>,
    pub result: Option<String>,
    pub on_fail: Option<Box<Blueprint>>,
    pub on_fail_condition: Option<String>,
    pub on_success: Option<Box<Blueprint>>,
    pub finally: Option<Box<Blueprint>>,
    pub skip_if: bool,
    pub max_concurrency: Option<Value>,
    pub scope: Option<Map<String, Value>>,
    pub queue: Option<Vec<Blueprint>>,
    #[serde(skip)]
    pub template: Option<TemplateFn>,
    pub repeat_for_each: Option<RepeatForEach>,
    #[serde(rename = "for")]
    pub for_each: Option<LoopSource>,
    pub node: Option<Box<Blueprint>>,
}

impl Plan {
    fn of_type(plan_type: PlanType) -> Self {
        Self {
            plan_type,
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> WorkResult<Self> {
        serde_json::from_str(raw).map_err(|error| {
            WorkError::new(
                WorkErrorKind::InvalidConfig,
                format!("malformed plan: {error}"),
            )
        })
    }

    pub fn from_value(value: Value) -> WorkResult<Self> {
        serde_json::from_value(value).map_err(|error| {
            WorkError::new(
                WorkErrorKind::InvalidConfig,
                format!("malformed plan: {error}"),
            )
        })
    }

    /// A job running `f`.
    pub fn job<F, Fut>(f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<Value>> + Send + 'static,
    {
        Self {
            run: Some(job_fn(f)),
            ..Self::of_type(PlanType::Job)
        }
    }

    pub fn sync_job<F>(f: F) -> Self
    where
        F: Fn(Invocation) -> WorkResult<Value> + Send + Sync + 'static,
    {
        Self {
            run: Some(sync_job_fn(f)),
            ..Self::of_type(PlanType::Job)
        }
    }

    /// A job running the service function `name`.
    pub fn invoke(name: impl Into<String>) -> Self {
        Self {
            invoke: Some(name.into()),
            ..Self::of_type(PlanType::Job)
        }
    }

    pub fn queue<B: Into<Blueprint>>(entries: impl IntoIterator<Item = B>) -> Self {
        Self {
            queue: Some(entries.into_iter().map(Into::into).collect()),
            ..Self::of_type(PlanType::Queue)
        }
    }

    /// A queue with one child per item, each compiled from `template(item)`.
    pub fn template(
        items: Vec<Value>,
        template: impl Fn(&Value) -> Blueprint + Send + Sync + 'static,
    ) -> Self {
        Self {
            template: Some(Arc::new(template)),
            repeat_for_each: Some(RepeatForEach::Items(items)),
            ..Self::of_type(PlanType::Template)
        }
    }

    /// A loop binding `var` to each item of `of`, running `node` per item.
    pub fn loop_over(var: impl Into<String>, of: impl Into<Value>, node: impl Into<Blueprint>) -> Self {
        Self {
            for_each: Some(LoopSource {
                var: var.into(),
                of: of.into(),
            }),
            node: Some(Box::new(node.into())),
            ..Self::of_type(PlanType::Loop)
        }
    }

    pub fn factory(f: impl Fn(&[Value]) -> WorkResult<Node> + Send + Sync + 'static) -> Self {
        Self {
            factory: Some(Arc::new(f)),
            ..Self::of_type(PlanType::Factory)
        }
    }

    /// A node built by the service factory `name`.
    pub fn factory_invoke(name: impl Into<String>) -> Self {
        Self {
            invoke: Some(name.into()),
            ..Self::of_type(PlanType::Factory)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_args_fn(
        mut self,
        args_fn: impl Fn(Option<&Value>) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.args_fn = Some(Arc::new(args_fn));
        self
    }

    /// Stores the node's result in the context under `key` (tokens allowed).
    pub fn with_result(mut self, key: impl Into<String>) -> Self {
        self.result = Some(key.into());
        self
    }

    pub fn with_on_fail(mut self, hook: impl Into<Blueprint>) -> Self {
        self.on_fail = Some(Box::new(hook.into()));
        self
    }

    pub fn with_on_fail_condition(mut self, pattern: impl Into<String>) -> Self {
        self.on_fail_condition = Some(pattern.into());
        self
    }

    pub fn with_on_success(mut self, hook: impl Into<Blueprint>) -> Self {
        self.on_success = Some(Box::new(hook.into()));
        self
    }

    pub fn with_finally(mut self, hook: impl Into<Blueprint>) -> Self {
        self.finally = Some(Box::new(hook.into()));
        self
    }

    pub fn with_skip_if(mut self, skip: bool) -> Self {
        self.skip_if = skip;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(Value::from(limit));
        self
    }

    pub fn with_scope_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.scope
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_repeat_for_each_fn(
        mut self,
        provider: impl Fn() -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.repeat_for_each = Some(RepeatForEach::Provider(Arc::new(provider)));
        self
    }
}

impl Debug for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("type", &self.plan_type)
            .field("name", &self.name)
            .field("service", &self.service)
            .field("invoke", &self.invoke)
            .field("fn", &self.run.is_some())
            .field("args", &self.args)
            .field("result", &self.result)
            .field("queue", &self.queue.as_ref().map(Vec::len))
            .field("for", &self.for_each)
            .finish_non_exhaustive()
    }
}

/// Anything `Planner::to_model` accepts: a plan, or a node that is already
/// compiled and passes through untouched.
#[derive(Clone, Debug)]
pub enum Blueprint {
    Plan(Box<Plan>),
    Node(Node),
}

impl From<Plan> for Blueprint {
    fn from(plan: Plan) -> Self {
        Blueprint::Plan(Box::new(plan))
    }
}

impl From<Node> for Blueprint {
    fn from(node: Node) -> Self {
        Blueprint::Node(node)
    }
}

impl<'de> Deserialize<'de> for Blueprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Plan::deserialize(deserializer).map(Blueprint::from)
    }
}
