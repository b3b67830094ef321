use serde::{Deserialize, Serialize};

use crate::models::{WorkError, WorkErrorKind, WorkResult};
use crate::node::queue::check_concurrency;

pub const DEFAULT_SERVICE: &str = "default";

/// Engine-wide defaults, applied where a plan does not say otherwise.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Concurrency cap for queue and loop plans without `maxConcurrency`.
    pub default_max_concurrency: usize,
    /// Service bundle used when a plan names no `service`.
    pub default_service: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_concurrency: 1,
            default_service: DEFAULT_SERVICE.to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> WorkResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|error| {
            WorkError::new(
                WorkErrorKind::InvalidConfig,
                format!("malformed engine config: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WorkResult<()> {
        check_concurrency(self.default_max_concurrency)?;
        if self.default_service.trim().is_empty() {
            return Err(WorkError::new(
                WorkErrorKind::InvalidConfig,
                "defaultService must not be empty",
            ));
        }
        Ok(())
    }
}
