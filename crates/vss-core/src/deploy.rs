//! Deployment mutations: uploads, replacement, domain changes.
//!
//! Every mutation here validates fully before writing, runs under the
//! owner's lock, and finishes by reconciling the owner's stored statuses and
//! recomputing their aggregates so the user record never drifts from the
//! deployments it summarizes.
//!
//! Domain uniqueness is enforced through [`crate::store::UniqueIndex`]: a
//! domain is claimed with an atomic insert-if-absent before any deployment
//! record is written, so two users racing for the same name cannot both win.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::activity::{self, ActivityLog};
use crate::catalog::PlanCatalog;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::deployment::{
    AccessLog, Deployment, DeploymentStatus, DomainRequest, DomainRequestStatus, TrafficSeries,
    Version, normalize_domain,
};
use crate::error::DeploymentError;
use crate::locks::UserLocks;
use crate::reconcile::Reconciler;
use crate::resolver::{derived_plan_status, effective_plan_limits};
use crate::store::{Tables, new_id};
use crate::user::{PlanStatus, User, UserDirectory};

/// An uploaded site archive, as the mutation service sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub file_size_mb: f64,
}

impl Upload {
    /// Describe an upload.
    #[must_use]
    pub fn new(file_name: impl Into<String>, file_size_mb: f64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size_mb,
        }
    }
}

/// A deployment together with the version just written for it.
#[derive(Debug, Clone, Serialize)]
pub struct Deployed {
    pub deployment: Deployment,
    pub version: Version,
}

/// Writes deployments, versions and domain requests.
#[derive(Clone)]
pub struct DeploymentService {
    tables: Tables,
    catalog: PlanCatalog,
    users: UserDirectory,
    reconciler: Reconciler,
    activity: ActivityLog,
    locks: Arc<UserLocks>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl DeploymentService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        tables: Tables,
        catalog: PlanCatalog,
        activity: ActivityLog,
        locks: Arc<UserLocks>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            users: UserDirectory::new(tables.clone(), catalog.clone()),
            reconciler: Reconciler::new(tables.clone(), catalog.clone()),
            tables,
            catalog,
            activity,
            locks,
            clock,
            config,
        }
    }

    /// Add a new version to an existing deployment.
    ///
    /// The version number is one more than the highest existing number, and
    /// the deployment's disk usage becomes the new archive's size.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::NotFound`] if the deployment doesn't exist.
    /// - [`DeploymentError::InvalidFileSize`] for a negative or non-finite size.
    /// - [`DeploymentError::PlanUnavailable`] if the owner's plan is expired or suspended.
    /// - [`DeploymentError::UploadTooLarge`] if the size exceeds the plan's upload limit.
    /// - [`DeploymentError::Store`] / [`DeploymentError::User`] if storage fails.
    pub async fn upload_new_version(
        &self,
        deployment_id: &str,
        upload: &Upload,
    ) -> Result<Deployed, DeploymentError> {
        check_size(upload.file_size_mb)?;
        let owner_id = self.deployment(deployment_id).await?.user_id;
        let _guard = self.locks.lock(&owner_id).await;

        let mut deployment = self.deployment(deployment_id).await?;
        let owner = self.owner(&deployment.user_id).await?;
        let today = self.clock.today();
        self.check_upload(&owner, upload, today).await?;

        let latest = self
            .tables
            .versions
            .list_where(|v| v.deployment_id == deployment_id)
            .await?
            .iter()
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0);
        let now = self.clock.now();
        let version = Version {
            id: new_id("ver"),
            deployment_id: deployment.id.clone(),
            version_number: latest.saturating_add(1),
            file_name: upload.file_name.clone(),
            file_size_mb: upload.file_size_mb,
            uploaded_at: now,
        };
        self.tables.versions.insert(&version).await?;

        deployment.current_version = version.version_number;
        deployment.disk_usage_mb = upload.file_size_mb;
        deployment.updated_at = now;
        self.tables.deployments.update(&deployment).await?;

        self.activity
            .record(&owner.id, activity::UPDATED_VERSION, &deployment.domain)
            .await?;
        self.settle(&owner.id, today).await?;

        info!(
            deployment_id = %deployment.id,
            version = version.version_number,
            size_mb = upload.file_size_mb,
            "new version uploaded"
        );

        let deployment = self.deployment(deployment_id).await?;
        Ok(Deployed {
            deployment,
            version,
        })
    }

    /// Replace everything the user has deployed with one fresh deployment.
    ///
    /// All existing deployments of the user are deleted together with their
    /// versions, access logs, domain requests and traffic series. The user
    /// may reuse a domain one of those deployments held.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::UserNotFound`] if the user doesn't exist.
    /// - [`DeploymentError::InvalidDomain`] if nothing usable remains of `domain`.
    /// - [`DeploymentError::DomainTaken`] if another user's deployment holds it.
    /// - the upload errors of [`Self::upload_new_version`].
    pub async fn replace_single_deployment(
        &self,
        user_id: &str,
        domain: &str,
        upload: &Upload,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Deployed, DeploymentError> {
        check_size(upload.file_size_mb)?;
        let domain = self.normalize(domain)?;
        let _guard = self.locks.lock(user_id).await;

        let owner = self.owner(user_id).await?;
        let today = self.clock.today();
        self.check_upload(&owner, upload, today).await?;

        let existing = self
            .tables
            .deployments
            .list_where(|d| d.user_id == user_id)
            .await?;
        let deployment_id = new_id("dep");
        let reused = self.take_domain(&domain, &deployment_id, &existing).await?;

        for old in &existing {
            self.delete_cascade(old, &domain).await?;
        }

        let created_at = created_at.unwrap_or_else(|| self.clock.now());
        let deployed = self
            .insert_deployment(deployment_id, user_id, domain, upload, created_at)
            .await?;

        let action = if existing.is_empty() {
            activity::DEPLOYED
        } else {
            activity::REPLACED_DEPLOYMENT
        };
        self.activity
            .record(user_id, action, &deployed.deployment.domain)
            .await?;
        self.settle(user_id, today).await?;

        info!(
            user_id = %user_id,
            deployment_id = %deployed.deployment.id,
            domain = %deployed.deployment.domain,
            replaced = existing.len(),
            reused_domain = reused,
            "single deployment replaced"
        );

        self.refreshed(deployed).await
    }

    /// Add another deployment for the user under a new domain.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::UserNotFound`] if the user doesn't exist.
    /// - [`DeploymentError::InvalidDomain`] if nothing usable remains of `domain`.
    /// - [`DeploymentError::DomainTaken`] if any deployment holds it.
    /// - the upload errors of [`Self::upload_new_version`].
    pub async fn create_deployment(
        &self,
        user_id: &str,
        domain: &str,
        upload: &Upload,
    ) -> Result<Deployed, DeploymentError> {
        check_size(upload.file_size_mb)?;
        let domain = self.normalize(domain)?;
        let _guard = self.locks.lock(user_id).await;

        let owner = self.owner(user_id).await?;
        let today = self.clock.today();
        self.check_upload(&owner, upload, today).await?;

        let deployment_id = new_id("dep");
        if !self.tables.domains.claim(&domain, &deployment_id).await? {
            return Err(DeploymentError::DomainTaken { domain });
        }

        let deployed = self
            .insert_deployment(deployment_id, user_id, domain, upload, self.clock.now())
            .await?;
        self.activity
            .record(user_id, activity::DEPLOYED, &deployed.deployment.domain)
            .await?;
        self.settle(user_id, today).await?;

        info!(
            user_id = %user_id,
            deployment_id = %deployed.deployment.id,
            domain = %deployed.deployment.domain,
            "deployment created"
        );

        self.refreshed(deployed).await
    }

    /// Ask for a deployment to be moved to another subdomain.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::NotFound`] if the deployment doesn't exist.
    /// - [`DeploymentError::InvalidDomain`] if the cleaned subdomain is empty.
    /// - [`DeploymentError::SameAsCurrent`] if it is the current domain.
    /// - [`DeploymentError::DomainTaken`] if another deployment holds it.
    /// - [`DeploymentError::Store`] if storage fails.
    pub async fn create_domain_request(
        &self,
        deployment_id: &str,
        requested_subdomain: &str,
    ) -> Result<DomainRequest, DeploymentError> {
        let deployment = self.deployment(deployment_id).await?;
        let requested = self.normalize(requested_subdomain)?;

        if requested.eq_ignore_ascii_case(&deployment.domain) {
            return Err(DeploymentError::SameAsCurrent { domain: requested });
        }
        let holder = self.tables.domains.owner(&requested).await?;
        if holder.is_some_and(|h| h != deployment.id) {
            return Err(DeploymentError::DomainTaken { domain: requested });
        }

        let request = DomainRequest {
            id: new_id("dr"),
            deployment_id: deployment.id.clone(),
            current_domain: deployment.domain.clone(),
            requested_domain: requested,
            status: DomainRequestStatus::Pending,
            created_at: self.clock.today(),
        };
        self.tables.domain_requests.insert(&request).await?;
        self.activity
            .record(
                &deployment.user_id,
                activity::DOMAIN_CHANGE_REQUEST,
                &request.requested_domain,
            )
            .await?;

        info!(
            request_id = %request.id,
            deployment_id = %deployment.id,
            requested = %request.requested_domain,
            "domain change requested"
        );

        Ok(request)
    }

    /// Approve a domain request and move the deployment to the new domain.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::DomainRequestNotFound`] / [`DeploymentError::NotFound`].
    /// - [`DeploymentError::DomainRequestNotPending`] if already decided.
    /// - [`DeploymentError::DomainTaken`] if the domain was claimed meanwhile.
    /// - [`DeploymentError::Store`] if storage fails.
    pub async fn approve_domain_request(
        &self,
        request_id: &str,
    ) -> Result<Deployment, DeploymentError> {
        let owner = self.request_owner(request_id).await?;
        let _guard = self.locks.lock(&owner).await;
        // Re-read both under the lock so queued approvals see the latest domain.
        let mut request = self.pending_domain_request(request_id).await?;
        let mut deployment = self.deployment(&request.deployment_id).await?;

        let claimed = self
            .tables
            .domains
            .claim(&request.requested_domain, &deployment.id)
            .await?;
        if !claimed
            && self
                .tables
                .domains
                .owner(&request.requested_domain)
                .await?
                .as_deref()
                != Some(deployment.id.as_str())
        {
            return Err(DeploymentError::DomainTaken {
                domain: request.requested_domain,
            });
        }
        if !deployment.domain.eq_ignore_ascii_case(&request.requested_domain) {
            self.tables.domains.release(&deployment.domain).await?;
        }

        let previous = std::mem::replace(&mut deployment.domain, request.requested_domain.clone());
        deployment.updated_at = self.clock.now();
        self.tables.deployments.update(&deployment).await?;

        request.status = DomainRequestStatus::Approved;
        self.tables.domain_requests.update(&request).await?;
        self.activity
            .record(&deployment.user_id, activity::DOMAIN_CHANGED, &deployment.domain)
            .await?;

        info!(
            request_id = %request.id,
            deployment_id = %deployment.id,
            from = %previous,
            to = %deployment.domain,
            "domain request approved"
        );

        Ok(deployment)
    }

    /// Reject a domain request. The deployment is not touched.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::DomainRequestNotFound`] if it doesn't exist.
    /// - [`DeploymentError::DomainRequestNotPending`] if already decided.
    /// - [`DeploymentError::Store`] if storage fails.
    pub async fn reject_domain_request(
        &self,
        request_id: &str,
    ) -> Result<DomainRequest, DeploymentError> {
        let owner = self.request_owner(request_id).await?;
        let _guard = self.locks.lock(&owner).await;
        let mut request = self.pending_domain_request(request_id).await?;
        request.status = DomainRequestStatus::Rejected;
        self.tables.domain_requests.update(&request).await?;

        if let Some(deployment) = self.tables.deployments.get(&request.deployment_id).await? {
            self.activity
                .record(
                    &deployment.user_id,
                    activity::DOMAIN_REQUEST_REJECTED,
                    &request.requested_domain,
                )
                .await?;
        }

        info!(request_id = %request.id, "domain request rejected");

        Ok(request)
    }

    /// Set a manual stored status (`Suspended` or `Active`) and re-derive
    /// plan-driven statuses on top of it.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::NotFound`] if the deployment doesn't exist.
    /// - [`DeploymentError::Store`] / [`DeploymentError::User`] if storage fails.
    pub async fn set_manual_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
    ) -> Result<Deployment, DeploymentError> {
        let owner_id = self.deployment(deployment_id).await?.user_id;
        let _guard = self.locks.lock(&owner_id).await;

        let mut deployment = self.deployment(deployment_id).await?;
        deployment.status = status;
        deployment.updated_at = self.clock.now();
        self.tables.deployments.update(&deployment).await?;

        let action = if status == DeploymentStatus::Suspended {
            activity::DEPLOYMENT_SUSPENDED
        } else {
            activity::DEPLOYMENT_REACTIVATED
        };
        self.activity
            .record(&owner_id, action, &deployment.domain)
            .await?;
        self.settle(&owner_id, self.clock.today()).await?;

        info!(deployment_id = %deployment_id, status = %status, "deployment status set");

        self.deployment(deployment_id).await
    }

    /// Look up a deployment by id.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::NotFound`] if the deployment doesn't exist.
    /// - [`DeploymentError::Store`] if storage fails.
    pub async fn deployment(&self, deployment_id: &str) -> Result<Deployment, DeploymentError> {
        self.tables
            .deployments
            .get(deployment_id)
            .await?
            .ok_or_else(|| DeploymentError::NotFound {
                deployment_id: deployment_id.to_owned(),
            })
    }

    /// All deployments, or only those of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Store`] if storage fails.
    pub async fn list(&self, user_id: Option<&str>) -> Result<Vec<Deployment>, DeploymentError> {
        let mut deployments = self
            .tables
            .deployments
            .list_where(|d| user_id.is_none_or(|u| d.user_id == u))
            .await?;
        deployments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(deployments)
    }

    /// Versions of a deployment, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Store`] if storage fails.
    pub async fn versions(&self, deployment_id: &str) -> Result<Vec<Version>, DeploymentError> {
        let mut versions = self
            .tables
            .versions
            .list_where(|v| v.deployment_id == deployment_id)
            .await?;
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    /// Domain requests, optionally only those still pending.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Store`] if storage fails.
    pub async fn domain_requests(
        &self,
        pending_only: bool,
    ) -> Result<Vec<DomainRequest>, DeploymentError> {
        Ok(self
            .tables
            .domain_requests
            .list_where(|r| !pending_only || r.status == DomainRequestStatus::Pending)
            .await?)
    }

    /// Access log lines of a deployment, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Store`] if storage fails.
    pub async fn access_logs(&self, deployment_id: &str) -> Result<Vec<AccessLog>, DeploymentError> {
        let mut logs = self
            .tables
            .access_logs
            .list_where(|l| l.deployment_id == deployment_id)
            .await?;
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(logs)
    }

    /// Traffic chart of a deployment, if one was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Store`] if storage fails.
    pub async fn traffic(
        &self,
        deployment_id: &str,
    ) -> Result<Option<TrafficSeries>, DeploymentError> {
        Ok(self.tables.traffic.get(deployment_id).await?)
    }

    fn normalize(&self, input: &str) -> Result<String, DeploymentError> {
        normalize_domain(input, &self.config.domain_suffix).ok_or_else(|| {
            DeploymentError::InvalidDomain {
                input: input.to_owned(),
            }
        })
    }

    async fn owner(&self, user_id: &str) -> Result<User, DeploymentError> {
        self.tables
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| DeploymentError::UserNotFound {
                user_id: user_id.to_owned(),
            })
    }

    async fn check_upload(
        &self,
        owner: &User,
        upload: &Upload,
        today: NaiveDate,
    ) -> Result<(), DeploymentError> {
        let status = derived_plan_status(owner, today);
        if matches!(status, PlanStatus::Expired | PlanStatus::Suspended) {
            return Err(DeploymentError::PlanUnavailable {
                user_id: owner.id.clone(),
                status,
            });
        }

        let plans = self.catalog.snapshot().await?;
        let limits = effective_plan_limits(owner, &plans, today);
        if upload.file_size_mb > f64::from(limits.max_upload_mb) {
            return Err(DeploymentError::UploadTooLarge {
                size_mb: upload.file_size_mb,
                max_mb: limits.max_upload_mb,
                tier: limits.tier,
            });
        }
        Ok(())
    }

    /// Claim `domain` for `new_id`, allowing a takeover from one of the
    /// user's own deployments in `own`. Returns whether it was a takeover.
    async fn take_domain(
        &self,
        domain: &str,
        new_id: &str,
        own: &[Deployment],
    ) -> Result<bool, DeploymentError> {
        if self.tables.domains.claim(domain, new_id).await? {
            return Ok(false);
        }
        let holder = self.tables.domains.owner(domain).await?;
        match holder {
            Some(h) if own.iter().any(|d| d.id == h) => {
                self.tables.domains.assign(domain, new_id).await?;
                Ok(true)
            }
            _ => Err(DeploymentError::DomainTaken {
                domain: domain.to_owned(),
            }),
        }
    }

    /// Delete a deployment and everything hanging off it. The domain index
    /// entry is released unless it is `keep_domain`.
    async fn delete_cascade(
        &self,
        deployment: &Deployment,
        keep_domain: &str,
    ) -> Result<(), DeploymentError> {
        let id = deployment.id.as_str();
        for v in self.tables.versions.list_where(|v| v.deployment_id == id).await? {
            self.tables.versions.delete(&v.id).await?;
        }
        for l in self.tables.access_logs.list_where(|l| l.deployment_id == id).await? {
            self.tables.access_logs.delete(&l.id).await?;
        }
        for r in self.tables.domain_requests.list_where(|r| r.deployment_id == id).await? {
            self.tables.domain_requests.delete(&r.id).await?;
        }
        self.tables.traffic.delete(id).await?;
        self.tables.deployments.delete(id).await?;
        if !deployment.domain.eq_ignore_ascii_case(keep_domain) {
            self.tables.domains.release(&deployment.domain).await?;
        }

        debug!(deployment_id = %id, domain = %deployment.domain, "deployment deleted");
        Ok(())
    }

    async fn insert_deployment(
        &self,
        deployment_id: String,
        user_id: &str,
        domain: String,
        upload: &Upload,
        created_at: DateTime<Utc>,
    ) -> Result<Deployed, DeploymentError> {
        let deployment = Deployment::new(
            deployment_id,
            user_id.to_owned(),
            domain,
            upload.file_size_mb,
            created_at,
        );
        let version = Version {
            id: new_id("ver"),
            deployment_id: deployment.id.clone(),
            version_number: 1,
            file_name: upload.file_name.clone(),
            file_size_mb: upload.file_size_mb,
            uploaded_at: created_at,
        };
        self.tables.deployments.insert(&deployment).await?;
        self.tables.versions.insert(&version).await?;
        Ok(Deployed {
            deployment,
            version,
        })
    }

    async fn settle(&self, user_id: &str, today: NaiveDate) -> Result<(), DeploymentError> {
        self.reconciler.reconcile(user_id, today).await?;
        self.users.recompute_aggregates(user_id, today).await?;
        Ok(())
    }

    async fn refreshed(&self, deployed: Deployed) -> Result<Deployed, DeploymentError> {
        let deployment = self.deployment(&deployed.deployment.id).await?;
        Ok(Deployed {
            deployment,
            version: deployed.version,
        })
    }

    async fn domain_request(&self, request_id: &str) -> Result<DomainRequest, DeploymentError> {
        self.tables
            .domain_requests
            .get(request_id)
            .await?
            .ok_or_else(|| DeploymentError::DomainRequestNotFound {
                request_id: request_id.to_owned(),
            })
    }

    /// User whose lock guards decisions on `request_id`. A request whose
    /// deployment is gone is keyed by the deployment id instead.
    async fn request_owner(&self, request_id: &str) -> Result<String, DeploymentError> {
        let request = self.domain_request(request_id).await?;
        Ok(self
            .tables
            .deployments
            .get(&request.deployment_id)
            .await?
            .map_or(request.deployment_id, |d| d.user_id))
    }

    async fn pending_domain_request(
        &self,
        request_id: &str,
    ) -> Result<DomainRequest, DeploymentError> {
        let request = self.domain_request(request_id).await?;
        if request.status != DomainRequestStatus::Pending {
            return Err(DeploymentError::DomainRequestNotPending {
                request_id: request.id,
            });
        }
        Ok(request)
    }
}

fn check_size(size_mb: f64) -> Result<(), DeploymentError> {
    if size_mb.is_finite() && size_mb >= 0.0 {
        Ok(())
    } else {
        Err(DeploymentError::InvalidFileSize { size_mb })
    }
}

impl fmt::Debug for DeploymentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vss_storage::{MemoryBackend, StorageBackend};

    use super::*;
    use crate::catalog::{PlanPatch, PlanTier};
    use crate::clock::{FixedClock, parse_date};
    use crate::deployment::TrafficPoint;
    use crate::error::ErrorKind;
    use crate::store::Table;

    struct Fixture {
        tables: Tables,
        catalog: PlanCatalog,
        clock: Arc<FixedClock>,
        locks: Arc<UserLocks>,
        service: DeploymentService,
    }

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    async fn fixture() -> Fixture {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let tables = Tables::new(&storage);
        let catalog = PlanCatalog::from_table(tables.plans.clone());
        let clock = Arc::new(FixedClock::on(date("2026-02-14")));
        let activity = ActivityLog::new(Table::new(Arc::clone(&storage)), clock.clone());
        let locks = Arc::new(UserLocks::new());
        let service = DeploymentService::new(
            tables.clone(),
            catalog.clone(),
            activity,
            Arc::clone(&locks),
            clock.clone(),
            EngineConfig::default(),
        );

        for (id, plan) in [("u1", PlanTier::Medium), ("u2", PlanTier::Basic)] {
            let mut user = User::new_client(
                id.to_owned(),
                format!("User {id}"),
                format!("{id}@example.com"),
                date("2025-09-15"),
            );
            user.plan = plan;
            user.plan_expires_at = (plan != PlanTier::Basic).then(|| date("2026-12-31"));
            tables.users.insert(&user).await.unwrap();
        }

        Fixture {
            tables,
            catalog,
            clock,
            locks,
            service,
        }
    }

    async fn user(f: &Fixture, id: &str) -> User {
        f.tables.users.get(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn first_deploy_then_replace() {
        let f = fixture().await;
        let first = f
            .service
            .replace_single_deployment("u1", "Portfolio", &Upload::new("site.zip", 2.4), None)
            .await
            .unwrap();
        assert_eq!(first.deployment.domain, "portfolio.vss.io");
        assert_eq!(first.deployment.current_version, 1);
        assert_eq!(first.deployment.status, DeploymentStatus::Active);
        assert_eq!(first.version.version_number, 1);

        f.tables
            .traffic
            .insert(&TrafficSeries {
                deployment_id: first.deployment.id.clone(),
                points: vec![TrafficPoint {
                    label: "Feb 1".to_owned(),
                    visits: 10,
                }],
            })
            .await
            .unwrap();
        f.service
            .create_domain_request(&first.deployment.id, "folio")
            .await
            .unwrap();

        let second = f
            .service
            .replace_single_deployment("u1", "portfolio.vss.io", &Upload::new("v2.zip", 3.0), None)
            .await
            .unwrap();
        assert_ne!(second.deployment.id, first.deployment.id);
        assert_eq!(second.deployment.domain, "portfolio.vss.io");

        let remaining = f.service.list(Some("u1")).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(f.service.versions(&first.deployment.id).await.unwrap().is_empty());
        assert!(f.service.traffic(&first.deployment.id).await.unwrap().is_none());
        assert!(f.service.domain_requests(false).await.unwrap().is_empty());
        assert_eq!(
            f.tables.domains.owner("portfolio.vss.io").await.unwrap().as_deref(),
            Some(second.deployment.id.as_str())
        );

        let u1 = user(&f, "u1").await;
        assert_eq!(u1.deployments_count, 1);
        assert!((u1.disk_usage_mb - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn replace_releases_the_old_domain() {
        let f = fixture().await;
        f.service
            .replace_single_deployment("u1", "old", &Upload::new("a.zip", 1.0), None)
            .await
            .unwrap();
        f.service
            .replace_single_deployment("u1", "new", &Upload::new("b.zip", 1.0), None)
            .await
            .unwrap();
        assert!(f.tables.domains.owner("old.vss.io").await.unwrap().is_none());

        f.service
            .replace_single_deployment("u2", "OLD", &Upload::new("c.zip", 1.0), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn other_users_domain_is_taken_case_insensitively() {
        let f = fixture().await;
        f.service
            .replace_single_deployment("u1", "shop", &Upload::new("a.zip", 1.0), None)
            .await
            .unwrap();
        let err = f
            .service
            .replace_single_deployment("u2", "SHOP.vss.io", &Upload::new("b.zip", 1.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::DomainTaken { .. }));
        assert!(f.service.list(Some("u2")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_increments_from_max_version() {
        let f = fixture().await;
        let d = f
            .service
            .replace_single_deployment("u1", "blog", &Upload::new("v1.zip", 1.0), None)
            .await
            .unwrap()
            .deployment;
        f.tables
            .versions
            .insert(&Version {
                id: "v-old".to_owned(),
                deployment_id: d.id.clone(),
                version_number: 4,
                file_name: "v4.zip".to_owned(),
                file_size_mb: 1.0,
                uploaded_at: f.clock.now(),
            })
            .await
            .unwrap();

        let up = f
            .service
            .upload_new_version(&d.id, &Upload::new("v5.zip", 7.5))
            .await
            .unwrap();
        assert_eq!(up.version.version_number, 5);
        assert_eq!(up.deployment.current_version, 5);
        assert!((up.deployment.disk_usage_mb - 7.5).abs() < f64::EPSILON);
        assert!((user(&f, "u1").await.disk_usage_mb - 7.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn upload_gating() {
        let f = fixture().await;
        let d = f
            .service
            .replace_single_deployment("u1", "blog", &Upload::new("v1.zip", 1.0), None)
            .await
            .unwrap()
            .deployment;

        let err = f
            .service
            .upload_new_version(&d.id, &Upload::new("big.zip", 10.5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeploymentError::UploadTooLarge {
                max_mb: 10,
                tier: PlanTier::Medium,
                ..
            }
        ));

        let err = f
            .service
            .upload_new_version(&d.id, &Upload::new("bad.zip", -1.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        f.clock.set_date(date("2026-12-31"));
        let err = f
            .service
            .upload_new_version(&d.id, &Upload::new("v2.zip", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeploymentError::PlanUnavailable {
                status: PlanStatus::Expired,
                ..
            }
        ));

        let err = f
            .service
            .upload_new_version("missing", &Upload::new("v2.zip", 1.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn upload_over_quota_is_reconciled_to_limit_exceeded() {
        let f = fixture().await;
        let d = f
            .service
            .replace_single_deployment("u1", "blog", &Upload::new("v1.zip", 1.0), None)
            .await
            .unwrap()
            .deployment;
        f.catalog
            .update(
                PlanTier::Medium,
                &PlanPatch {
                    max_disk_mb: Some(5),
                    ..PlanPatch::default()
                },
            )
            .await
            .unwrap();

        let up = f
            .service
            .upload_new_version(&d.id, &Upload::new("v2.zip", 8.0))
            .await
            .unwrap();
        assert_eq!(up.deployment.status, DeploymentStatus::LimitExceeded);
    }

    #[tokio::test]
    async fn multi_mode_create_keeps_existing() {
        let f = fixture().await;
        f.service
            .create_deployment("u1", "one", &Upload::new("a.zip", 1.0))
            .await
            .unwrap();
        f.service
            .create_deployment("u1", "two", &Upload::new("b.zip", 2.0))
            .await
            .unwrap();
        let err = f
            .service
            .create_deployment("u2", "one", &Upload::new("c.zip", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::DomainTaken { .. }));

        let u1 = user(&f, "u1").await;
        assert_eq!(u1.deployments_count, 2);
        assert!((u1.disk_usage_mb - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn domain_request_validation() {
        let f = fixture().await;
        let a = f
            .service
            .create_deployment("u1", "alpha", &Upload::new("a.zip", 1.0))
            .await
            .unwrap()
            .deployment;
        f.service
            .create_deployment("u2", "beta", &Upload::new("b.zip", 1.0))
            .await
            .unwrap();

        let err = f.service.create_domain_request(&a.id, "!!!").await.unwrap_err();
        assert!(matches!(err, DeploymentError::InvalidDomain { .. }));
        let err = f.service.create_domain_request(&a.id, "ALPHA").await.unwrap_err();
        assert!(matches!(err, DeploymentError::SameAsCurrent { .. }));
        let err = f.service.create_domain_request(&a.id, "Beta").await.unwrap_err();
        assert!(matches!(err, DeploymentError::DomainTaken { .. }));
        let err = f.service.create_domain_request("nope", "gamma").await.unwrap_err();
        assert!(matches!(err, DeploymentError::NotFound { .. }));

        let req = f.service.create_domain_request(&a.id, "Gamma!").await.unwrap();
        assert_eq!(req.requested_domain, "gamma.vss.io");
        assert_eq!(req.current_domain, "alpha.vss.io");
        assert_eq!(req.status, DomainRequestStatus::Pending);
    }

    #[tokio::test]
    async fn approving_a_domain_request_moves_the_index() {
        let f = fixture().await;
        let a = f
            .service
            .create_deployment("u1", "alpha", &Upload::new("a.zip", 1.0))
            .await
            .unwrap()
            .deployment;
        let req = f.service.create_domain_request(&a.id, "gamma").await.unwrap();

        let moved = f.service.approve_domain_request(&req.id).await.unwrap();
        assert_eq!(moved.domain, "gamma.vss.io");
        assert!(f.tables.domains.owner("alpha.vss.io").await.unwrap().is_none());
        assert_eq!(
            f.tables.domains.owner("gamma.vss.io").await.unwrap().as_deref(),
            Some(a.id.as_str())
        );

        let err = f.service.approve_domain_request(&req.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        let err = f.service.reject_domain_request(&req.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn domain_claimed_after_request_cannot_be_approved() {
        let f = fixture().await;
        let a = f
            .service
            .create_deployment("u1", "alpha", &Upload::new("a.zip", 1.0))
            .await
            .unwrap()
            .deployment;
        let req = f.service.create_domain_request(&a.id, "gamma").await.unwrap();
        f.service
            .create_deployment("u2", "gamma", &Upload::new("g.zip", 1.0))
            .await
            .unwrap();

        let err = f.service.approve_domain_request(&req.id).await.unwrap_err();
        assert!(matches!(err, DeploymentError::DomainTaken { .. }));
        let rejected = f.service.reject_domain_request(&req.id).await.unwrap();
        assert_eq!(rejected.status, DomainRequestStatus::Rejected);
    }

    #[tokio::test]
    async fn queued_domain_approvals_release_every_superseded_domain() {
        let f = fixture().await;
        let a = f
            .service
            .create_deployment("u1", "alpha", &Upload::new("a.zip", 1.0))
            .await
            .unwrap()
            .deployment;
        let to_x = f.service.create_domain_request(&a.id, "xray").await.unwrap();
        let to_y = f.service.create_domain_request(&a.id, "yank").await.unwrap();

        let guard = f.locks.lock("u1").await;
        let (sx, sy) = (f.service.clone(), f.service.clone());
        let (ix, iy) = (to_x.id.clone(), to_y.id.clone());
        let hx = tokio::spawn(async move { sx.approve_domain_request(&ix).await });
        let hy = tokio::spawn(async move { sy.approve_domain_request(&iy).await });
        tokio::task::yield_now().await;
        drop(guard);
        hx.await.unwrap().unwrap();
        hy.await.unwrap().unwrap();

        let final_domain = f.service.deployment(&a.id).await.unwrap().domain;
        assert!(final_domain == "xray.vss.io" || final_domain == "yank.vss.io");
        for domain in ["alpha.vss.io", "xray.vss.io", "yank.vss.io"] {
            let owner = f.tables.domains.owner(domain).await.unwrap();
            if domain == final_domain {
                assert_eq!(owner.as_deref(), Some(a.id.as_str()));
            } else {
                assert!(owner.is_none(), "{domain} still held");
            }
        }

        let loser = if final_domain == "xray.vss.io" { "yank" } else { "xray" };
        f.service
            .create_deployment("u2", loser, &Upload::new("b.zip", 1.0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn one_domain_request_is_decided_once() {
        let f = fixture().await;
        let a = f
            .service
            .create_deployment("u1", "alpha", &Upload::new("a.zip", 1.0))
            .await
            .unwrap()
            .deployment;
        let req = f.service.create_domain_request(&a.id, "gamma").await.unwrap();

        let (s1, s2, s3) = (f.service.clone(), f.service.clone(), f.service.clone());
        let (i1, i2, i3) = (req.id.clone(), req.id.clone(), req.id.clone());
        let (r1, r2, r3) = tokio::join!(
            tokio::spawn(async move { s1.approve_domain_request(&i1).await.map(|_| ()) }),
            tokio::spawn(async move { s2.approve_domain_request(&i2).await.map(|_| ()) }),
            tokio::spawn(async move { s3.reject_domain_request(&i3).await.map(|_| ()) }),
        );
        let results = [r1.unwrap(), r2.unwrap(), r3.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(err, DeploymentError::DomainRequestNotPending { .. }));
        }

        let stored = f.tables.domain_requests.get(&req.id).await.unwrap().unwrap();
        let domain = f.service.deployment(&a.id).await.unwrap().domain;
        assert_ne!(stored.status, DomainRequestStatus::Pending);
        if stored.status == DomainRequestStatus::Approved {
            assert_eq!(domain, "gamma.vss.io");
        } else {
            assert_eq!(domain, "alpha.vss.io");
        }
    }

    #[tokio::test]
    async fn manual_suspension_survives_reconcile() {
        let f = fixture().await;
        let a = f
            .service
            .create_deployment("u1", "alpha", &Upload::new("a.zip", 1.0))
            .await
            .unwrap()
            .deployment;
        let suspended = f
            .service
            .set_manual_status(&a.id, DeploymentStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(suspended.status, DeploymentStatus::Suspended);

        let active = f
            .service
            .set_manual_status(&a.id, DeploymentStatus::Active)
            .await
            .unwrap();
        assert_eq!(active.status, DeploymentStatus::Active);
    }

    #[tokio::test]
    async fn racing_users_get_one_domain_winner() {
        let f = fixture().await;
        let a = f.service.clone();
        let b = f.service.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move {
                a.replace_single_deployment("u1", "race", &Upload::new("a.zip", 1.0), None)
                    .await
            }),
            tokio::spawn(async move {
                b.replace_single_deployment("u2", "race", &Upload::new("b.zip", 1.0), None)
                    .await
            }),
        );
        let results = [ra.unwrap(), rb.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(f.service.list(None).await.unwrap().len(), 1);
    }
}
