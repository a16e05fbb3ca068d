//! Engine configuration.

use serde::Serialize;

/// Default public suffix for deployment domains.
pub const DEFAULT_DOMAIN_SUFFIX: &str = "vss.io";

/// How many deployments a user may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeploymentMode {
    /// One deployment per user; deploying again replaces it.
    Single,
    /// Any number of deployments per user, each with its own domain.
    Multi,
}

/// Settings the engine needs at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    /// Suffix appended to bare subdomain labels (`blog` becomes `blog.vss.io`).
    pub domain_suffix: String,
    pub deployment_mode: DeploymentMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_owned(),
            deployment_mode: DeploymentMode::Single,
        }
    }
}
