//! Read-time plan and status resolution.
//!
//! Every function here is pure: it takes the stored user/deployment, a plan
//! table snapshot and the current date, and returns the *effective* value.
//! Nothing is written. The reconciler in [`crate::reconcile`] is the write
//! side of the same rules, and the two must always agree.
//!
//! Precedence, highest first:
//!
//! 1. plan expiry (`plan_expires_at <= today`)
//! 2. disk usage above the effective plan's quota
//! 3. the stored status

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::catalog::{PlanDefinition, PlanTable, PlanTier};
use crate::deployment::{Deployment, DeploymentStatus};
use crate::user::{PlanStatus, User};

/// A deployment status computed at read time.
///
/// Deliberately a different type from the stored [`DeploymentStatus`] so the
/// two cannot be mixed up; only the reconciler turns one into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EffectiveStatus(DeploymentStatus);

impl EffectiveStatus {
    /// The underlying status value.
    #[must_use]
    pub const fn status(self) -> DeploymentStatus {
        self.0
    }

    /// Whether the public site must not be served.
    #[must_use]
    pub const fn blocks_public_access(self) -> bool {
        matches!(
            self.0,
            DeploymentStatus::Suspended
                | DeploymentStatus::LimitExceeded
                | DeploymentStatus::PlanExpired
        )
    }
}

impl fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The page a public visitor sees instead of the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublicPage {
    PlanExpiredPage,
    SuspendedPage,
}

/// Whether `expires_at` has been reached. A missing expiry never expires.
#[must_use]
pub fn is_expired(expires_at: Option<NaiveDate>, today: NaiveDate) -> bool {
    expires_at.is_some_and(|d| d <= today)
}

/// The user's plan status after applying expiry.
///
/// An expiry date on or before `today` yields `Expired` regardless of the
/// stored status; otherwise the stored status is returned unchanged.
#[must_use]
pub fn derived_plan_status(user: &User, today: NaiveDate) -> PlanStatus {
    if is_expired(user.plan_expires_at, today) {
        PlanStatus::Expired
    } else {
        user.plan_status
    }
}

/// The tier whose limits apply. Expired users fall back to Basic.
#[must_use]
pub fn effective_plan(user: &User, today: NaiveDate) -> PlanTier {
    if derived_plan_status(user, today) == PlanStatus::Expired {
        PlanTier::Basic
    } else {
        user.plan
    }
}

/// The plan definition whose limits apply to `user`.
#[must_use]
pub fn effective_plan_limits<'a>(
    user: &User,
    plans: &'a PlanTable,
    today: NaiveDate,
) -> &'a PlanDefinition {
    plans.get(effective_plan(user, today))
}

/// The status a deployment should be presented with.
#[must_use]
pub fn effective_deployment_status(
    deployment: &Deployment,
    owner: &User,
    plans: &PlanTable,
    today: NaiveDate,
) -> EffectiveStatus {
    if derived_plan_status(owner, today) == PlanStatus::Expired {
        return EffectiveStatus(DeploymentStatus::PlanExpired);
    }

    let max_disk = effective_plan_limits(owner, plans, today).max_disk_mb;
    if deployment.disk_usage_mb > f64::from(max_disk) {
        return EffectiveStatus(DeploymentStatus::LimitExceeded);
    }

    EffectiveStatus(deployment.status)
}

/// Which interstitial page a public visitor gets, or `None` if the site is
/// servable.
#[must_use]
pub fn public_access_target(
    deployment: &Deployment,
    owner: &User,
    plans: &PlanTable,
    today: NaiveDate,
) -> Option<PublicPage> {
    if derived_plan_status(owner, today) == PlanStatus::Expired {
        return Some(PublicPage::PlanExpiredPage);
    }

    effective_deployment_status(deployment, owner, plans, today)
        .blocks_public_access()
        .then_some(PublicPage::SuspendedPage)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::PlanDefinition;
    use crate::clock::parse_date;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn user(plan: PlanTier, status: PlanStatus, expires: Option<&str>) -> User {
        let mut u = User::new_client(
            "u4".to_owned(),
            "Casey Nguyen".to_owned(),
            "casey@example.com".to_owned(),
            date("2025-11-10"),
        );
        u.plan = plan;
        u.plan_status = status;
        u.plan_expires_at = expires.map(date);
        u
    }

    fn deployment(disk: f64, status: DeploymentStatus) -> Deployment {
        let mut d = Deployment::new(
            "d7".to_owned(),
            "u4".to_owned(),
            "resume.vss.io".to_owned(),
            disk,
            date("2025-12-01").and_hms_opt(0, 0, 0).unwrap().and_utc(),
        );
        d.status = status;
        d
    }

    #[test]
    fn expiry_on_the_day_itself_counts() {
        let u = user(PlanTier::Medium, PlanStatus::Active, Some("2026-02-01"));
        assert_eq!(derived_plan_status(&u, date("2026-01-31")), PlanStatus::Active);
        assert_eq!(derived_plan_status(&u, date("2026-02-01")), PlanStatus::Expired);
        assert_eq!(derived_plan_status(&u, date("2026-02-02")), PlanStatus::Expired);
    }

    #[test]
    fn no_expiry_keeps_stored_status() {
        for status in [
            PlanStatus::Active,
            PlanStatus::PendingPayment,
            PlanStatus::Suspended,
            PlanStatus::Expired,
        ] {
            let u = user(PlanTier::Full, status, None);
            assert_eq!(derived_plan_status(&u, date("2030-01-01")), status);
        }
    }

    #[test]
    fn expiry_overrides_suspended_and_pending() {
        for status in [PlanStatus::Suspended, PlanStatus::PendingPayment] {
            let u = user(PlanTier::Full, status, Some("2026-01-01"));
            assert_eq!(derived_plan_status(&u, date("2026-02-01")), PlanStatus::Expired);
        }
    }

    #[test]
    fn expired_user_is_basic_regardless_of_stored_plan() {
        for tier in PlanTier::ALL {
            let u = user(tier, PlanStatus::Active, Some("2026-02-01"));
            assert_eq!(effective_plan(&u, date("2026-02-01")), PlanTier::Basic);
            assert_eq!(effective_plan(&u, date("2026-01-15")), tier);
        }
    }

    #[test]
    fn effective_limits_follow_effective_plan() {
        let plans = PlanTable::default();
        let u = user(PlanTier::Full, PlanStatus::Active, Some("2026-02-01"));
        assert_eq!(effective_plan_limits(&u, &plans, date("2026-01-01")).max_disk_mb, 500);
        assert_eq!(effective_plan_limits(&u, &plans, date("2026-03-01")).max_disk_mb, 50);
    }

    #[test]
    fn expiry_beats_every_stored_deployment_status() {
        let plans = PlanTable::default();
        let owner = user(PlanTier::Medium, PlanStatus::Active, Some("2026-02-01"));
        for stored in [
            DeploymentStatus::Active,
            DeploymentStatus::Suspended,
            DeploymentStatus::Error,
            DeploymentStatus::Updating,
            DeploymentStatus::LimitExceeded,
        ] {
            let d = deployment(45.0, stored);
            assert_eq!(
                effective_deployment_status(&d, &owner, &plans, date("2026-02-01")).status(),
                DeploymentStatus::PlanExpired
            );
        }
    }

    #[test]
    fn medium_user_expired_on_the_day_is_plan_expired_not_limit_checked() {
        let plans = PlanTable::default();
        let owner = user(PlanTier::Medium, PlanStatus::Active, Some("2026-02-01"));
        let today = date("2026-02-01");
        assert_eq!(derived_plan_status(&owner, today), PlanStatus::Expired);
        assert_eq!(effective_plan(&owner, today), PlanTier::Basic);
        let d = deployment(45.0, DeploymentStatus::Active);
        assert_eq!(
            effective_deployment_status(&d, &owner, &plans, today).status(),
            DeploymentStatus::PlanExpired
        );
    }

    #[test]
    fn quota_edit_applies_without_reconcile() {
        let mut plans = PlanTable::default();
        let owner = user(PlanTier::Medium, PlanStatus::Active, None);
        let d = deployment(45.0, DeploymentStatus::Active);
        let today = date("2026-02-14");
        assert_eq!(
            effective_deployment_status(&d, &owner, &plans, today).status(),
            DeploymentStatus::Active
        );

        let mut medium = PlanDefinition::default_for(PlanTier::Medium);
        medium.max_disk_mb = 10;
        plans.set(medium);
        assert_eq!(
            effective_deployment_status(&d, &owner, &plans, today).status(),
            DeploymentStatus::LimitExceeded
        );
    }

    #[test]
    fn usage_equal_to_quota_is_within_limit() {
        let plans = PlanTable::default();
        let owner = user(PlanTier::Basic, PlanStatus::Active, None);
        let d = deployment(50.0, DeploymentStatus::Updating);
        assert_eq!(
            effective_deployment_status(&d, &owner, &plans, date("2026-02-14")).status(),
            DeploymentStatus::Updating
        );
        let over = deployment(50.5, DeploymentStatus::Updating);
        assert_eq!(
            effective_deployment_status(&over, &owner, &plans, date("2026-02-14")).status(),
            DeploymentStatus::LimitExceeded
        );
    }

    #[test]
    fn public_access_precedence() {
        let plans = PlanTable::default();
        let today = date("2026-02-14");

        let expired = user(PlanTier::Full, PlanStatus::Suspended, Some("2026-02-01"));
        let d = deployment(1.0, DeploymentStatus::Active);
        assert_eq!(
            public_access_target(&d, &expired, &plans, today),
            Some(PublicPage::PlanExpiredPage)
        );

        let active = user(PlanTier::Basic, PlanStatus::Active, None);
        let suspended = deployment(1.0, DeploymentStatus::Suspended);
        assert_eq!(
            public_access_target(&suspended, &active, &plans, today),
            Some(PublicPage::SuspendedPage)
        );

        let too_big = deployment(80.0, DeploymentStatus::Active);
        assert_eq!(
            public_access_target(&too_big, &active, &plans, today),
            Some(PublicPage::SuspendedPage)
        );

        let stale = deployment(1.0, DeploymentStatus::PlanExpired);
        assert_eq!(
            public_access_target(&stale, &active, &plans, today),
            Some(PublicPage::SuspendedPage)
        );

        for servable in [
            DeploymentStatus::Active,
            DeploymentStatus::Updating,
            DeploymentStatus::Error,
        ] {
            let ok = deployment(1.0, servable);
            assert_eq!(public_access_target(&ok, &active, &plans, today), None);
        }
    }

    #[test]
    fn resolution_is_idempotent() {
        let plans = PlanTable::default();
        let owner = user(PlanTier::Medium, PlanStatus::Active, Some("2026-03-01"));
        let d = deployment(120.0, DeploymentStatus::Error);
        let today = date("2026-02-14");
        let first = effective_deployment_status(&d, &owner, &plans, today);
        let second = effective_deployment_status(&d, &owner, &plans, today);
        assert_eq!(first, second);
        assert_eq!(d.status, DeploymentStatus::Error);
    }
}
