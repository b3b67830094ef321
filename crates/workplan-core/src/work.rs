use serde_json::Value;

use crate::config::EngineConfig;
use crate::models::{WorkError, WorkErrorKind, WorkResult};
use crate::node::Node;
use crate::planner::{Blueprint, Context, Planner, Service};

/// One planner plus the model compiled from the current plan.
#[derive(Clone, Default)]
pub struct Work {
    planner: Planner,
    model: Option<Node>,
}

impl Work {
    pub fn new(config: EngineConfig) -> WorkResult<Self> {
        Ok(Self {
            planner: Planner::with_config(config)?,
            model: None,
        })
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn ctx(&self) -> &Context {
        self.planner.ctx()
    }

    pub fn add_service(&self, service: Service) {
        self.planner.add_service(service);
    }

    pub fn add_service_as(&self, name: impl Into<String>, service: Service) {
        self.planner.add_service_as(name, service);
    }

    /// Compiles `plan` and makes it the model. The previous model is kept
    /// when compilation fails.
    pub fn set_plan(&mut self, plan: impl Into<Blueprint>) -> WorkResult<&Node> {
        let model = self.planner.to_model(plan)?;
        Ok(&*self.model.insert(model))
    }

    pub fn model(&self) -> Option<&Node> {
        self.model.as_ref()
    }

    pub async fn process(&self) -> WorkResult<Value> {
        let model = self.model.as_ref().ok_or_else(|| {
            WorkError::new(WorkErrorKind::InvalidNode, "no plan has been set")
        })?;
        model.process(Vec::new()).await
    }
}
