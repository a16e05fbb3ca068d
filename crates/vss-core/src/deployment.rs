//! Deployment records.
//!
//! A deployment is one hosted site: a globally unique domain, a stored
//! status, and the uploaded versions behind it. Access logs and traffic
//! series hang off a deployment and are deleted with it.
//!
//! The `status` field here is the *stored* status. Callers that present a
//! deployment should use [`crate::resolver::effective_deployment_status`].

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;

/// Stored deployment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Active,
    Updating,
    Error,
    Suspended,
    PlanExpired,
    LimitExceeded,
}

impl DeploymentStatus {
    /// Statuses written by the reconciler rather than by a person.
    #[must_use]
    pub const fn is_plan_driven(self) -> bool {
        matches!(self, Self::PlanExpired | Self::LimitExceeded)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "Active",
            Self::Updating => "Updating",
            Self::Error => "Error",
            Self::Suspended => "Suspended",
            Self::PlanExpired => "PlanExpired",
            Self::LimitExceeded => "LimitExceeded",
        })
    }
}

/// A hosted site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub user_id: String,
    pub domain: String,
    pub status: DeploymentStatus,
    pub current_version: u32,
    /// Size of the current version.
    pub disk_usage_mb: f64,
    pub traffic_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// A new active deployment at version 1.
    #[must_use]
    pub fn new(
        id: String,
        user_id: String,
        domain: String,
        disk_usage_mb: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            domain,
            status: DeploymentStatus::Active,
            current_version: 1,
            disk_usage_mb,
            traffic_count: 0,
            created_at,
            updated_at: created_at,
        }
    }
}

impl Record for Deployment {
    const PREFIX: &'static str = "deployments/";

    fn id(&self) -> &str {
        &self.id
    }
}

/// One uploaded archive of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub deployment_id: String,
    /// 1-based, increasing per deployment.
    pub version_number: u32,
    pub file_name: String,
    pub file_size_mb: f64,
    pub uploaded_at: DateTime<Utc>,
}

impl Record for Version {
    const PREFIX: &'static str = "versions/";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Review state of a domain change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainRequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// A request to move a deployment to a different domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRequest {
    pub id: String,
    pub deployment_id: String,
    pub current_domain: String,
    pub requested_domain: String,
    pub status: DomainRequestStatus,
    pub created_at: NaiveDate,
}

impl Record for DomainRequest {
    const PREFIX: &'static str = "domain_requests/";

    fn id(&self) -> &str {
        &self.id
    }
}

/// A visitor hit on a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLog {
    pub id: String,
    pub deployment_id: String,
    pub visitor_ip: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub action: String,
    pub user_agent: String,
    pub country: String,
}

impl Record for AccessLog {
    const PREFIX: &'static str = "access_logs/";

    fn id(&self) -> &str {
        &self.id
    }
}

/// One point of a traffic chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPoint {
    pub label: String,
    pub visits: u64,
}

/// Per-deployment traffic chart, keyed by deployment id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSeries {
    pub deployment_id: String,
    pub points: Vec<TrafficPoint>,
}

impl Record for TrafficSeries {
    const PREFIX: &'static str = "traffic/";

    fn id(&self) -> &str {
        &self.deployment_id
    }
}

/// Reduce user input to a bare subdomain label: lowercase, `[a-z0-9-]` only.
#[must_use]
pub fn clean_subdomain(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Turn user input into a full domain under `suffix`.
///
/// Accepts either a bare label (`"My-Blog"`) or a full domain already under
/// the suffix (`"my-blog.vss.io"`). Returns `None` if nothing usable remains.
#[must_use]
pub fn normalize_domain(input: &str, suffix: &str) -> Option<String> {
    let lowered = input.trim().to_lowercase();
    let suffix = suffix.trim_start_matches('.').to_lowercase();
    let label = lowered
        .strip_suffix(&format!(".{suffix}"))
        .unwrap_or(&lowered);
    let label = clean_subdomain(label);
    if label.is_empty() {
        None
    } else {
        Some(format!("{label}.{suffix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_subdomain_strips_everything_but_label_chars() {
        assert_eq!(clean_subdomain("My Blog!"), "myblog");
        assert_eq!(clean_subdomain("  shop-2026 "), "shop-2026");
        assert_eq!(clean_subdomain("Café.vss.io"), "cafvssio");
        assert_eq!(clean_subdomain("***"), "");
    }

    #[test]
    fn normalize_accepts_label_or_full_domain() {
        assert_eq!(
            normalize_domain("MyBlog", "vss.io").as_deref(),
            Some("myblog.vss.io")
        );
        assert_eq!(
            normalize_domain("MyBlog.VSS.io", "vss.io").as_deref(),
            Some("myblog.vss.io")
        );
        assert_eq!(normalize_domain("!!", "vss.io"), None);
    }

    #[test]
    fn plan_driven_statuses() {
        assert!(DeploymentStatus::PlanExpired.is_plan_driven());
        assert!(DeploymentStatus::LimitExceeded.is_plan_driven());
        assert!(!DeploymentStatus::Suspended.is_plan_driven());
        assert!(!DeploymentStatus::Error.is_plan_driven());
    }
}
