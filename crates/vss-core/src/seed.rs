//! Demo dataset.
//!
//! Six users (one admin) and ten deployments in every stored status, with
//! versions, access logs, traffic charts, activity and one pending domain
//! request. The stored statuses are loaded as-is; some of them are stale
//! against the plan rules on purpose so a reconcile pass has work to do.
//! User aggregates are recomputed after loading.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activity::ActivityEntry;
use crate::catalog::PlanCatalog;
use crate::deployment::{AccessLog, Deployment, DomainRequest, TrafficSeries, Version};
use crate::error::{StoreError, UserError};
use crate::store::Tables;
use crate::user::{User, UserDirectory};

const DEMO_JSON: &str = include_str!("seed.json");

#[derive(Debug, Deserialize)]
struct SeedData {
    users: Vec<User>,
    deployments: Vec<Deployment>,
    versions: Vec<Version>,
    activity: Vec<ActivityEntry>,
    access_logs: Vec<AccessLog>,
    traffic: Vec<TrafficSeries>,
    domain_requests: Vec<DomainRequest>,
}

/// Record counts loaded by [`load_demo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub users: usize,
    pub deployments: usize,
    pub versions: usize,
    pub activity: usize,
    pub access_logs: usize,
    pub traffic: usize,
    pub domain_requests: usize,
}

/// Load the demo dataset into empty tables.
///
/// # Errors
///
/// - [`UserError::Store`] if the dataset does not decode, a record already
///   exists, or storage fails.
pub async fn load_demo(
    tables: &Tables,
    catalog: &PlanCatalog,
    today: NaiveDate,
) -> Result<SeedSummary, UserError> {
    let data: SeedData =
        serde_json::from_str(DEMO_JSON).map_err(|e| StoreError::Deserialization {
            key: "seed.json".to_owned(),
            reason: e.to_string(),
        })?;

    catalog.reset_to_defaults().await?;

    for user in &data.users {
        tables.users.insert(user).await?;
        if !tables.emails.claim(&user.email, &user.id).await? {
            return Err(StoreError::Duplicate {
                key: user.email.clone(),
            }
            .into());
        }
    }
    for deployment in &data.deployments {
        tables.deployments.insert(deployment).await?;
        if !tables.domains.claim(&deployment.domain, &deployment.id).await? {
            return Err(StoreError::Duplicate {
                key: deployment.domain.clone(),
            }
            .into());
        }
    }
    for version in &data.versions {
        tables.versions.insert(version).await?;
    }
    for entry in &data.activity {
        tables.activity.insert(entry).await?;
    }
    for log in &data.access_logs {
        tables.access_logs.insert(log).await?;
    }
    for series in &data.traffic {
        tables.traffic.insert(series).await?;
    }
    for request in &data.domain_requests {
        tables.domain_requests.insert(request).await?;
    }

    let directory = UserDirectory::new(tables.clone(), catalog.clone());
    for user in &data.users {
        directory.recompute_aggregates(&user.id, today).await?;
    }

    let summary = SeedSummary {
        users: data.users.len(),
        deployments: data.deployments.len(),
        versions: data.versions.len(),
        activity: data.activity.len(),
        access_logs: data.access_logs.len(),
        traffic: data.traffic.len(),
        domain_requests: data.domain_requests.len(),
    };

    info!(
        users = summary.users,
        deployments = summary.deployments,
        "demo dataset loaded"
    );

    Ok(summary)
}
