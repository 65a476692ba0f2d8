//! Application identity

use serde::{Deserialize, Serialize};
use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name; migration records are keyed by it
    #[serde(default = "default_app_name")]
    pub name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

impl Validatable for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.name, "name", self.domain_name())
    }

    fn domain_name(&self) -> &'static str {
        "app"
    }
}

fn default_app_name() -> String {
    "gofr-app".to_string()
}
