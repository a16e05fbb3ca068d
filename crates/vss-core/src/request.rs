//! Plan request workflow and subscription ledger.
//!
//! A client asks for a tier for some number of months; an admin approves or
//! rejects. Approval is the only path (besides admin overrides) that changes
//! a user's plan, and it appends an immutable [`LedgerEntry`] recording what
//! was bought. Terminal requests are never edited again.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activity::{self, ActivityLog};
use crate::catalog::{PlanCatalog, PlanTier};
use crate::clock::{Clock, add_months};
use crate::error::RequestError;
use crate::locks::UserLocks;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::{Record, Tables, new_id};
use crate::user::{PlanStatus, User, UserDirectory};

/// Why the client is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Purchase,
    Renewal,
    Upgrade,
}

/// Review state of a plan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        })
    }
}

/// A client's request for a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub id: String,
    pub user_id: String,
    pub request_type: RequestType,
    pub requested_plan: PlanTier,
    pub months: u32,
    /// Monthly price at creation time multiplied by `months`.
    pub price_total: u32,
    pub status: RequestStatus,
    pub created_at: NaiveDate,
    pub note: Option<String>,
}

impl Record for PlanRequest {
    const PREFIX: &'static str = "plan_requests/";

    fn id(&self) -> &str {
        &self.id
    }
}

/// One approved purchase. Append-only; renewals add a new entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub plan_tier: PlanTier,
    pub user_id: String,
    pub purchase_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub total_months_bought: u32,
    pub price_total_paid: u32,
}

impl Record for LedgerEntry {
    const PREFIX: &'static str = "ledger/";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Parameters of a new plan request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlanRequest {
    pub user_id: String,
    pub request_type: RequestType,
    pub requested_plan: PlanTier,
    pub months: u32,
    pub note: Option<String>,
}

/// Everything an approval changed.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub request: PlanRequest,
    pub ledger_entry: LedgerEntry,
    pub user: User,
    pub reconcile: ReconcileReport,
}

/// Renewal when the client asks for the tier they already have, Purchase
/// otherwise.
#[must_use]
pub fn infer_request_type(effective: PlanTier, requested: PlanTier) -> RequestType {
    if effective == requested {
        RequestType::Renewal
    } else {
        RequestType::Purchase
    }
}

/// Create, approve and reject plan requests.
#[derive(Clone)]
pub struct RequestWorkflow {
    tables: Tables,
    catalog: PlanCatalog,
    users: UserDirectory,
    reconciler: Reconciler,
    activity: ActivityLog,
    locks: Arc<UserLocks>,
    clock: Arc<dyn Clock>,
}

impl RequestWorkflow {
    /// Wire the workflow to its collaborators.
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
            reconciler: Reconciler::new(tables.clone(), catalog.clone()),
            tables,
            catalog,
            activity,
            locks,
            clock,
        }
    }

    /// Open a Pending request.
    ///
    /// # Errors
    ///
    /// - [`RequestError::InvalidMonths`] if `months` is zero.
    /// - [`RequestError::UserNotFound`] if the user doesn't exist.
    /// - [`RequestError::PlanDisabled`] if the tier is not offered.
    /// - [`RequestError::PendingRequestExists`] if the user already waits on one.
    /// - [`RequestError::Store`] / [`RequestError::Catalog`] if storage fails.
    pub async fn create(&self, new: NewPlanRequest) -> Result<PlanRequest, RequestError> {
        if new.months == 0 {
            return Err(RequestError::InvalidMonths { months: new.months });
        }
        if self.tables.users.get(&new.user_id).await?.is_none() {
            return Err(RequestError::UserNotFound {
                user_id: new.user_id,
            });
        }
        let plan = self.catalog.get(new.requested_plan).await?;
        if !plan.enabled {
            return Err(RequestError::PlanDisabled {
                tier: new.requested_plan,
            });
        }

        let _guard = self.locks.lock(&new.user_id).await;

        let pending = self
            .tables
            .plan_requests
            .list_where(|r| r.user_id == new.user_id && r.status == RequestStatus::Pending)
            .await?;
        if let Some(existing) = pending.into_iter().next() {
            return Err(RequestError::PendingRequestExists {
                user_id: new.user_id,
                request_id: existing.id,
            });
        }

        let request = PlanRequest {
            id: new_id("req"),
            user_id: new.user_id,
            request_type: new.request_type,
            requested_plan: new.requested_plan,
            months: new.months,
            price_total: plan.price.saturating_mul(new.months),
            status: RequestStatus::Pending,
            created_at: self.clock.today(),
            note: new.note.filter(|n| !n.trim().is_empty()),
        };
        self.tables.plan_requests.insert(&request).await?;
        self.activity
            .record(
                &request.user_id,
                activity::PLAN_REQUESTED,
                &format!("{} x{}", request.requested_plan, request.months),
            )
            .await?;

        info!(
            request_id = %request.id,
            user_id = %request.user_id,
            plan = %request.requested_plan,
            months = request.months,
            price_total = request.price_total,
            "plan request created"
        );

        Ok(request)
    }

    /// Approve a Pending request and apply it to the user.
    ///
    /// The new expiry is `override_expires_at` if given, otherwise today plus
    /// the requested months.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotFound`] if the request doesn't exist.
    /// - [`RequestError::NotPending`] if it was already decided.
    /// - [`RequestError::UserNotFound`] if the requesting user is gone.
    /// - [`RequestError::Store`] / [`RequestError::User`] if storage fails.
    pub async fn approve(
        &self,
        request_id: &str,
        override_expires_at: Option<NaiveDate>,
    ) -> Result<Approval, RequestError> {
        let user_id = self.fetch(request_id).await?.user_id;
        let _guard = self.locks.lock(&user_id).await;

        // Re-read under the lock so two approvals cannot both see Pending.
        let mut request = self.fetch_pending(request_id).await?;
        let mut user = self
            .tables
            .users
            .get(&request.user_id)
            .await?
            .ok_or_else(|| RequestError::UserNotFound {
                user_id: request.user_id.clone(),
            })?;

        let today = self.clock.today();
        let expires_at = override_expires_at.unwrap_or_else(|| add_months(today, request.months));

        request.status = RequestStatus::Approved;
        self.tables.plan_requests.update(&request).await?;

        let ledger_entry = LedgerEntry {
            id: new_id("sub"),
            plan_tier: request.requested_plan,
            user_id: request.user_id.clone(),
            purchase_date: today,
            expiration_date: expires_at,
            total_months_bought: request.months,
            price_total_paid: request.price_total,
        };
        self.tables.ledger.insert(&ledger_entry).await?;

        user.plan = request.requested_plan;
        user.plan_status = PlanStatus::Active;
        user.plan_expires_at = Some(expires_at);
        self.users.save(&user).await?;

        let reconcile = self.reconciler.reconcile(&user.id, today).await?;
        let user = self.users.recompute_aggregates(&user.id, today).await?;

        self.activity
            .record(
                &user.id,
                activity::PLAN_APPROVED,
                &format!("{} until {expires_at}", request.requested_plan),
            )
            .await?;

        info!(
            request_id = %request.id,
            user_id = %user.id,
            plan = %request.requested_plan,
            expires_at = %expires_at,
            changed = reconcile.changes.len(),
            "plan request approved"
        );

        Ok(Approval {
            request,
            ledger_entry,
            user,
            reconcile,
        })
    }

    /// Reject a Pending request. The user is not touched.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotFound`] if the request doesn't exist.
    /// - [`RequestError::NotPending`] if it was already decided.
    /// - [`RequestError::Store`] if storage fails.
    pub async fn reject(&self, request_id: &str) -> Result<PlanRequest, RequestError> {
        let user_id = self.fetch(request_id).await?.user_id;
        let _guard = self.locks.lock(&user_id).await;

        let mut request = self.fetch_pending(request_id).await?;
        request.status = RequestStatus::Rejected;
        self.tables.plan_requests.update(&request).await?;
        self.activity
            .record(
                &request.user_id,
                activity::PLAN_REJECTED,
                request.requested_plan.as_str(),
            )
            .await?;

        info!(request_id = %request.id, user_id = %request.user_id, "plan request rejected");

        Ok(request)
    }

    /// All requests, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Store`] if storage fails.
    pub async fn list(&self) -> Result<Vec<PlanRequest>, RequestError> {
        let mut requests = self.tables.plan_requests.list().await?;
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }

    /// Requests of one user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Store`] if storage fails.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<PlanRequest>, RequestError> {
        let mut requests = self.list().await?;
        requests.retain(|r| r.user_id == user_id);
        Ok(requests)
    }

    /// Ledger entries of one user, oldest purchase first.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Store`] if storage fails.
    pub async fn ledger_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>, RequestError> {
        let mut entries = self
            .tables
            .ledger
            .list_where(|e| e.user_id == user_id)
            .await?;
        entries.sort_by(|a, b| {
            a.purchase_date
                .cmp(&b.purchase_date)
                .then_with(|| a.expiration_date.cmp(&b.expiration_date))
        });
        Ok(entries)
    }

    async fn fetch(&self, request_id: &str) -> Result<PlanRequest, RequestError> {
        self.tables
            .plan_requests
            .get(request_id)
            .await?
            .ok_or_else(|| RequestError::NotFound {
                request_id: request_id.to_owned(),
            })
    }

    async fn fetch_pending(&self, request_id: &str) -> Result<PlanRequest, RequestError> {
        let request = self.fetch(request_id).await?;
        if request.status == RequestStatus::Pending {
            Ok(request)
        } else {
            Err(RequestError::NotPending {
                request_id: request.id,
                status: request.status,
            })
        }
    }
}

impl fmt::Debug for RequestWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestWorkflow").finish_non_exhaustive()
    }
}
