//! Admin overrides on user plans.
//!
//! These bypass the request workflow: an admin can assign a tier directly,
//! renew by setting a new expiry, or suspend and reactivate a user's plan.
//! Each change is followed by a reconcile and an aggregate recompute, the
//! same as an approved request.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::activity::{self, ActivityLog};
use crate::catalog::{PlanCatalog, PlanTier};
use crate::clock::Clock;
use crate::error::UserError;
use crate::locks::UserLocks;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::Tables;
use crate::user::{PlanStatus, User, UserDirectory};

/// A user after an admin change, with the statuses it rewrote.
#[derive(Debug, Clone, Serialize)]
pub struct AdminChange {
    pub user: User,
    pub reconcile: ReconcileReport,
}

/// Direct plan and status changes made by an admin.
#[derive(Clone)]
pub struct AdminService {
    users: UserDirectory,
    reconciler: Reconciler,
    activity: ActivityLog,
    locks: Arc<UserLocks>,
    clock: Arc<dyn Clock>,
}

impl AdminService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        tables: Tables,
        catalog: PlanCatalog,
        activity: ActivityLog,
        locks: Arc<UserLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users: UserDirectory::new(tables.clone(), catalog.clone()),
            reconciler: Reconciler::new(tables, catalog),
            activity,
            locks,
            clock,
        }
    }

    /// Assign `tier` and mark the plan Active.
    ///
    /// `expires_at` replaces the expiry when given; otherwise the current
    /// expiry is kept.
    ///
    /// # Errors
    ///
    /// - [`UserError::NotFound`] if the user doesn't exist.
    /// - [`UserError::Store`] / [`UserError::Catalog`] if storage fails.
    pub async fn set_plan(
        &self,
        user_id: &str,
        tier: PlanTier,
        expires_at: Option<NaiveDate>,
    ) -> Result<AdminChange, UserError> {
        let target = match expires_at {
            Some(d) => format!("{tier} until {d}"),
            None => tier.to_string(),
        };
        self.apply(user_id, activity::PLAN_CHANGED, &target, |user| {
            user.plan = tier;
            user.plan_status = PlanStatus::Active;
            if expires_at.is_some() {
                user.plan_expires_at = expires_at;
            }
        })
        .await
    }

    /// Suspend the user's plan. Uploads are blocked until reactivated.
    ///
    /// # Errors
    ///
    /// - [`UserError::NotFound`] if the user doesn't exist.
    /// - [`UserError::Store`] / [`UserError::Catalog`] if storage fails.
    pub async fn suspend_user(
        &self,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<AdminChange, UserError> {
        self.apply(
            user_id,
            activity::USER_SUSPENDED,
            reason.unwrap_or(user_id),
            |user| user.plan_status = PlanStatus::Suspended,
        )
        .await
    }

    /// Lift a suspension.
    ///
    /// # Errors
    ///
    /// - [`UserError::NotFound`] if the user doesn't exist.
    /// - [`UserError::Store`] / [`UserError::Catalog`] if storage fails.
    pub async fn reactivate_user(&self, user_id: &str) -> Result<AdminChange, UserError> {
        self.apply(user_id, activity::USER_REACTIVATED, user_id, |user| {
            user.plan_status = PlanStatus::Active;
        })
        .await
    }

    async fn apply(
        &self,
        user_id: &str,
        action: &str,
        target: &str,
        change: impl FnOnce(&mut User),
    ) -> Result<AdminChange, UserError> {
        let _guard = self.locks.lock(user_id).await;
        let today = self.clock.today();

        let mut user = self.users.get(user_id).await?;
        change(&mut user);
        self.users.save(&user).await?;

        let reconcile = self.reconciler.reconcile(user_id, today).await?;
        let user = self.users.recompute_aggregates(user_id, today).await?;
        self.activity.record(user_id, action, target).await?;

        info!(
            user_id = %user_id,
            action = %action,
            plan = %user.plan,
            plan_status = %user.plan_status,
            changed = reconcile.changes.len(),
            "admin change applied"
        );

        Ok(AdminChange { user, reconcile })
    }
}

impl fmt::Debug for AdminService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminService").finish_non_exhaustive()
    }
}
