//! Deployment reconciler.
//!
//! The write side of the resolver rules. After anything that can change a
//! user's plan, expiry or disk usage, [`Reconciler::reconcile`] walks the
//! user's deployments and rewrites their stored status:
//!
//! - plan expired: `PlanExpired`
//! - disk usage above the effective quota: `LimitExceeded`
//! - stored `PlanExpired`/`LimitExceeded` whose condition has cleared: `Active`
//! - anything else (manual `Suspended`, `Error`, `Updating`) is left alone
//!
//! This is the only code that writes plan-driven statuses. Running it twice
//! with no state change in between writes nothing the second time.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{PlanCatalog, PlanTable};
use crate::deployment::{Deployment, DeploymentStatus};
use crate::error::UserError;
use crate::resolver::{derived_plan_status, effective_plan_limits};
use crate::store::Tables;
use crate::user::{PlanStatus, User};

/// One stored status rewritten by a reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub deployment_id: String,
    pub from: DeploymentStatus,
    pub to: DeploymentStatus,
}

/// Outcome of reconciling one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub user_id: String,
    /// Deployments examined.
    pub examined: usize,
    /// Deployments whose stored status changed.
    pub changes: Vec<StatusChange>,
}

/// The stored status `deployment` should have under the current plan state.
#[must_use]
pub fn reconciled_status(
    deployment: &Deployment,
    owner: &User,
    plans: &PlanTable,
    today: NaiveDate,
) -> DeploymentStatus {
    if derived_plan_status(owner, today) == PlanStatus::Expired {
        return DeploymentStatus::PlanExpired;
    }

    let max_disk = effective_plan_limits(owner, plans, today).max_disk_mb;
    if deployment.disk_usage_mb > f64::from(max_disk) {
        return DeploymentStatus::LimitExceeded;
    }

    if deployment.status.is_plan_driven() {
        DeploymentStatus::Active
    } else {
        deployment.status
    }
}

/// Rewrites stored deployment statuses to match plan and quota state.
#[derive(Clone)]
pub struct Reconciler {
    tables: Tables,
    catalog: PlanCatalog,
}

impl Reconciler {
    /// Create a reconciler over the shared tables.
    #[must_use]
    pub fn new(tables: Tables, catalog: PlanCatalog) -> Self {
        Self { tables, catalog }
    }

    /// Reconcile every deployment owned by `user_id`.
    ///
    /// Callers that may race with other writers for the same user must hold
    /// that user's lock from [`crate::locks::UserLocks`].
    ///
    /// # Errors
    ///
    /// - [`UserError::NotFound`] if the user doesn't exist.
    /// - [`UserError::Catalog`] / [`UserError::Store`] if storage fails.
    pub async fn reconcile(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<ReconcileReport, UserError> {
        let user = self
            .tables
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| UserError::NotFound {
                user_id: user_id.to_owned(),
            })?;
        let plans = self.catalog.snapshot().await?;
        let owned = self
            .tables
            .deployments
            .list_where(|d| d.user_id == user_id)
            .await?;

        let mut report = ReconcileReport {
            user_id: user_id.to_owned(),
            examined: owned.len(),
            changes: Vec::new(),
        };

        for mut deployment in owned {
            let next = reconciled_status(&deployment, &user, &plans, today);
            if next == deployment.status {
                continue;
            }

            info!(
                user_id = %user_id,
                deployment_id = %deployment.id,
                from = %deployment.status,
                to = %next,
                "deployment status reconciled"
            );

            report.changes.push(StatusChange {
                deployment_id: deployment.id.clone(),
                from: deployment.status,
                to: next,
            });
            deployment.status = next;
            self.tables.deployments.update(&deployment).await?;
        }

        debug!(
            user_id = %user_id,
            examined = report.examined,
            changed = report.changes.len(),
            "reconcile pass finished"
        );

        Ok(report)
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}
