//! CLI configuration.
//!
//! Loads settings from `VSS_*` environment variables with defaults. Command
//! line flags override whatever is read here.

use vss_core::config::{DEFAULT_DOMAIN_SUFFIX, DeploymentMode, EngineConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Log level filter used when `RUST_LOG` is unset (e.g. `warn`, `debug`).
    pub log_level: String,
    pub log_format: LogFormat,
    /// Raw `YYYY-MM-DD` date to pin the clock to. Parsed by the caller.
    pub today: Option<String>,
    /// Suffix appended to bare subdomain labels.
    pub domain_suffix: String,
    /// One deployment per user (`deploy` replaces) when set.
    pub single_deployment: bool,
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VSS_LOG_LEVEL`: log filter (default: `warn`)
    /// - `VSS_LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
    /// - `VSS_TODAY`: pin the clock to a date (default: system date)
    /// - `VSS_DOMAIN_SUFFIX`: domain suffix (default: `vss.io`)
    /// - `VSS_SINGLE_DEPLOYMENT`: one deployment per user (default: `true`)
    #[must_use]
    pub fn from_env() -> Self {
        let log_level = std::env::var("VSS_LOG_LEVEL").unwrap_or_else(|_| "warn".to_owned());

        let log_format = match std::env::var("VSS_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let today = std::env::var("VSS_TODAY")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let domain_suffix = std::env::var("VSS_DOMAIN_SUFFIX")
            .ok()
            .map(|v| v.trim().trim_start_matches('.').to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DOMAIN_SUFFIX.to_owned());

        let single_deployment = std::env::var("VSS_SINGLE_DEPLOYMENT")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            log_level,
            log_format,
            today,
            domain_suffix,
            single_deployment,
        }
    }

    /// The engine settings this configuration selects.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            domain_suffix: self.domain_suffix.clone(),
            deployment_mode: if self.single_deployment {
                DeploymentMode::Single
            } else {
                DeploymentMode::Multi
            },
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_owned(),
            log_format: LogFormat::Pretty,
            today: None,
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_owned(),
            single_deployment: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_engine_config_is_single_mode_on_vss_io() {
        let engine = CliConfig::default().engine_config();
        assert_eq!(engine, EngineConfig::default());
    }

    #[test]
    fn multi_mode_when_single_deployment_is_off() {
        let config = CliConfig {
            single_deployment: false,
            domain_suffix: "example.test".to_owned(),
            ..CliConfig::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.deployment_mode, DeploymentMode::Multi);
        assert_eq!(engine.domain_suffix, "example.test");
    }
}
