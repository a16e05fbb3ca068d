//! The engine facade.
//!
//! [`Platform`] owns one set of tables and wires every service to the same
//! clock, lock table and activity log. Presentation goes through the view
//! methods here, which always apply the resolver, so a caller never sees a
//! stored status where an effective one is meant.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;
use vss_storage::{MemoryBackend, StorageBackend};

use crate::activity::ActivityLog;
use crate::admin::AdminService;
use crate::catalog::{PlanCatalog, PlanDefinition, PlanTable, PlanTier};
use crate::clock::Clock;
use crate::config::{DeploymentMode, EngineConfig};
use crate::deploy::{Deployed, DeploymentService, Upload};
use crate::deployment::{Deployment, DeploymentStatus};
use crate::error::{DeploymentError, UserError};
use crate::locks::UserLocks;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::request::RequestWorkflow;
use crate::resolver::{
    EffectiveStatus, PublicPage, derived_plan_status, effective_deployment_status, effective_plan,
    public_access_target,
};
use crate::seed::{self, SeedSummary};
use crate::store::Tables;
use crate::user::{PlanStatus, Role, User, UserDirectory};

/// A user as it should be presented.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub derived_plan_status: PlanStatus,
    pub effective_plan: PlanTier,
    pub limits: PlanDefinition,
}

/// A deployment as it should be presented.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentView {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub effective_status: EffectiveStatus,
    /// What a public visitor is shown instead of the site, if anything.
    pub public_page: Option<PublicPage>,
}

/// Platform-wide counters for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlatformStats {
    pub clients: usize,
    pub deployments: usize,
    pub storage_used_mb: f64,
    pub traffic: u64,
    pub basic_clients: usize,
    pub medium_clients: usize,
    pub full_clients: usize,
    pub active_plans: usize,
    pub expired_plans: usize,
    pub suspended_plans: usize,
}

/// Every engine service over one shared store.
#[derive(Clone)]
pub struct Platform {
    tables: Tables,
    catalog: PlanCatalog,
    users: UserDirectory,
    requests: RequestWorkflow,
    deployments: DeploymentService,
    admin: AdminService,
    reconciler: Reconciler,
    activity: ActivityLog,
    locks: Arc<UserLocks>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Platform {
    /// Build the engine over `storage`.
    #[must_use]
    pub fn new(
        storage: &Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let tables = Tables::new(storage);
        let catalog = PlanCatalog::from_table(tables.plans.clone());
        let activity = ActivityLog::new(tables.activity.clone(), Arc::clone(&clock));
        let locks = Arc::new(UserLocks::new());

        Self {
            users: UserDirectory::new(tables.clone(), catalog.clone()),
            requests: RequestWorkflow::new(
                tables.clone(),
                catalog.clone(),
                activity.clone(),
                Arc::clone(&locks),
                Arc::clone(&clock),
            ),
            deployments: DeploymentService::new(
                tables.clone(),
                catalog.clone(),
                activity.clone(),
                Arc::clone(&locks),
                Arc::clone(&clock),
                config.clone(),
            ),
            admin: AdminService::new(
                tables.clone(),
                catalog.clone(),
                activity.clone(),
                Arc::clone(&locks),
                Arc::clone(&clock),
            ),
            reconciler: Reconciler::new(tables.clone(), catalog.clone()),
            tables,
            catalog,
            activity,
            locks,
            clock,
            config,
        }
    }

    /// An in-memory engine loaded with the demo dataset.
    ///
    /// # Errors
    ///
    /// Returns [`UserError`] if the dataset fails to load.
    pub async fn demo(
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<(Self, SeedSummary), UserError> {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let platform = Self::new(&storage, clock, config);
        let summary = platform.load_demo().await?;
        Ok((platform, summary))
    }

    /// Load the demo dataset into this engine's (empty) store.
    ///
    /// # Errors
    ///
    /// Returns [`UserError`] if a record already exists or storage fails.
    pub async fn load_demo(&self) -> Result<SeedSummary, UserError> {
        seed::load_demo(&self.tables, &self.catalog, self.today()).await
    }

    /// The clock's current date.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    #[must_use]
    pub const fn users(&self) -> &UserDirectory {
        &self.users
    }

    #[must_use]
    pub const fn requests(&self) -> &RequestWorkflow {
        &self.requests
    }

    #[must_use]
    pub const fn deployments(&self) -> &DeploymentService {
        &self.deployments
    }

    #[must_use]
    pub const fn admin(&self) -> &AdminService {
        &self.admin
    }

    #[must_use]
    pub const fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Present one user.
    ///
    /// # Errors
    ///
    /// - [`UserError::NotFound`] if the user doesn't exist.
    /// - [`UserError::Store`] / [`UserError::Catalog`] if storage fails.
    pub async fn user_view(&self, user_id: &str) -> Result<UserView, UserError> {
        let user = self.users.get(user_id).await?;
        let plans = self.catalog.snapshot().await?;
        Ok(self.present_user(user, &plans))
    }

    /// Present every user.
    ///
    /// # Errors
    ///
    /// Returns [`UserError`] if storage fails.
    pub async fn user_views(&self) -> Result<Vec<UserView>, UserError> {
        let plans = self.catalog.snapshot().await?;
        Ok(self
            .users
            .list()
            .await?
            .into_iter()
            .map(|u| self.present_user(u, &plans))
            .collect())
    }

    /// Present deployments, all or those of one user.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::UserNotFound`] if a deployment's owner is missing.
    /// - [`DeploymentError::Store`] / [`DeploymentError::Catalog`] if storage fails.
    pub async fn deployment_views(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<DeploymentView>, DeploymentError> {
        let plans = self.catalog.snapshot().await?;
        let users = self.tables.users.list().await?;
        let today = self.today();

        self.deployments
            .list(user_id)
            .await?
            .into_iter()
            .map(|d| -> Result<DeploymentView, DeploymentError> {
                let owner = users.iter().find(|u| u.id == d.user_id).ok_or_else(|| {
                    DeploymentError::UserNotFound {
                        user_id: d.user_id.clone(),
                    }
                })?;
                Ok(present_deployment(d, owner, &plans, today))
            })
            .collect()
    }

    /// Present one deployment.
    ///
    /// # Errors
    ///
    /// - [`DeploymentError::NotFound`] / [`DeploymentError::UserNotFound`].
    /// - [`DeploymentError::Store`] / [`DeploymentError::Catalog`] if storage fails.
    pub async fn deployment_view(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentView, DeploymentError> {
        let deployment = self.deployments.deployment(deployment_id).await?;
        let owner = self
            .tables
            .users
            .get(&deployment.user_id)
            .await?
            .ok_or_else(|| DeploymentError::UserNotFound {
                user_id: deployment.user_id.clone(),
            })?;
        let plans = self.catalog.snapshot().await?;
        Ok(present_deployment(deployment, &owner, &plans, self.today()))
    }

    /// Deploy according to the configured mode: replace the user's site in
    /// single mode, add another one in multi mode.
    ///
    /// # Errors
    ///
    /// See [`DeploymentService::replace_single_deployment`] and
    /// [`DeploymentService::create_deployment`].
    pub async fn deploy(
        &self,
        user_id: &str,
        domain: &str,
        upload: &Upload,
    ) -> Result<Deployed, DeploymentError> {
        match self.config.deployment_mode {
            DeploymentMode::Single => {
                self.deployments
                    .replace_single_deployment(user_id, domain, upload, None)
                    .await
            }
            DeploymentMode::Multi => {
                self.deployments
                    .create_deployment(user_id, domain, upload)
                    .await
            }
        }
    }

    /// Reconcile one user under their lock, then refresh aggregates.
    ///
    /// # Errors
    ///
    /// - [`UserError::NotFound`] if the user doesn't exist.
    /// - [`UserError::Store`] / [`UserError::Catalog`] if storage fails.
    pub async fn reconcile_user(&self, user_id: &str) -> Result<ReconcileReport, UserError> {
        let _guard = self.locks.lock(user_id).await;
        let today = self.today();
        let report = self.reconciler.reconcile(user_id, today).await?;
        self.users.recompute_aggregates(user_id, today).await?;
        Ok(report)
    }

    /// Reconcile every user.
    ///
    /// # Errors
    ///
    /// Returns [`UserError`] on the first failure.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileReport>, UserError> {
        let mut reports = Vec::new();
        for user in self.users.list().await? {
            reports.push(self.reconcile_user(&user.id).await?);
        }

        info!(
            users = reports.len(),
            changed = reports.iter().map(|r| r.changes.len()).sum::<usize>(),
            "reconciled all users"
        );

        Ok(reports)
    }

    /// Suspend a deployment by hand.
    ///
    /// # Errors
    ///
    /// See [`DeploymentService::set_manual_status`].
    pub async fn admin_suspend_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Deployment, DeploymentError> {
        self.deployments
            .set_manual_status(deployment_id, DeploymentStatus::Suspended)
            .await
    }

    /// Lift a manual suspension.
    ///
    /// # Errors
    ///
    /// See [`DeploymentService::set_manual_status`].
    pub async fn admin_reactivate_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Deployment, DeploymentError> {
        self.deployments
            .set_manual_status(deployment_id, DeploymentStatus::Active)
            .await
    }

    /// Dashboard counters. Plan counts use the derived status.
    ///
    /// # Errors
    ///
    /// Returns [`UserError`] if storage fails.
    pub async fn stats(&self) -> Result<PlatformStats, UserError> {
        let today = self.today();
        let clients: Vec<User> = self
            .users
            .list()
            .await?
            .into_iter()
            .filter(|u| u.role == Role::Client)
            .collect();
        let deployments = self.tables.deployments.list().await?;

        let count_plan = |tier| clients.iter().filter(|u| u.plan == tier).count();
        let count_status = |status| {
            clients
                .iter()
                .filter(|u| derived_plan_status(u, today) == status)
                .count()
        };

        Ok(PlatformStats {
            clients: clients.len(),
            deployments: deployments.len(),
            storage_used_mb: deployments.iter().map(|d| d.disk_usage_mb).sum(),
            traffic: deployments.iter().map(|d| d.traffic_count).sum(),
            basic_clients: count_plan(PlanTier::Basic),
            medium_clients: count_plan(PlanTier::Medium),
            full_clients: count_plan(PlanTier::Full),
            active_plans: count_status(PlanStatus::Active),
            expired_plans: count_status(PlanStatus::Expired),
            suspended_plans: count_status(PlanStatus::Suspended),
        })
    }

    fn present_user(&self, user: User, plans: &PlanTable) -> UserView {
        let today = self.today();
        let tier = effective_plan(&user, today);
        UserView {
            derived_plan_status: derived_plan_status(&user, today),
            effective_plan: tier,
            limits: plans.get(tier).clone(),
            user,
        }
    }
}

fn present_deployment(
    deployment: Deployment,
    owner: &User,
    plans: &PlanTable,
    today: NaiveDate,
) -> DeploymentView {
    DeploymentView {
        effective_status: effective_deployment_status(&deployment, owner, plans, today),
        public_page: public_access_target(&deployment, owner, plans, today),
        deployment,
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
