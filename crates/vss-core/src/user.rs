//! Users and their derived aggregates.
//!
//! A user's `plan_status` is the stored value. What the rest of the system
//! should act on is the derived status from [`crate::resolver`], which
//! accounts for expiry. The aggregate fields (`disk_usage_mb`,
//! `deployments_count`, `max_disk_mb`) are never edited directly; they are
//! recomputed from the user's deployments after every mutation.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{PlanCatalog, PlanTier};
use crate::error::UserError;
use crate::resolver;
use crate::store::{Record, Tables, new_id};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Client,
}

/// Stored plan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Active,
    PendingPayment,
    Expired,
    Suspended,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "Active",
            Self::PendingPayment => "PendingPayment",
            Self::Expired => "Expired",
            Self::Suspended => "Suspended",
        })
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub plan: PlanTier,
    pub plan_status: PlanStatus,
    pub plan_expires_at: Option<NaiveDate>,
    pub created_at: NaiveDate,
    /// Derived: number of deployments owned.
    pub deployments_count: u32,
    /// Derived: sum of the owned deployments' disk usage.
    pub disk_usage_mb: f64,
    /// Derived: disk quota of the effective plan.
    pub max_disk_mb: u32,
}

impl User {
    /// A freshly registered client: Basic, Active, no expiry.
    #[must_use]
    pub fn new_client(id: String, name: String, email: String, created_at: NaiveDate) -> Self {
        Self {
            id,
            name,
            email,
            role: Role::Client,
            plan: PlanTier::Basic,
            plan_status: PlanStatus::Active,
            plan_expires_at: None,
            created_at,
            deployments_count: 0,
            disk_usage_mb: 0.0,
            max_disk_mb: crate::catalog::PlanDefinition::default_for(PlanTier::Basic).max_disk_mb,
        }
    }
}

impl Record for User {
    const PREFIX: &'static str = "users/";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Registration, lookup, and aggregate maintenance for users.
#[derive(Clone)]
pub struct UserDirectory {
    tables: Tables,
    catalog: PlanCatalog,
}

impl UserDirectory {
    /// Create a directory over the shared tables.
    #[must_use]
    pub fn new(tables: Tables, catalog: PlanCatalog) -> Self {
        Self { tables, catalog }
    }

    /// Register a new client account.
    ///
    /// # Errors
    ///
    /// - [`UserError::InvalidInput`] if the name is blank or the email has no `@`.
    /// - [`UserError::EmailTaken`] if the email is already registered.
    /// - [`UserError::Store`] if storage fails.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        today: NaiveDate,
    ) -> Result<User, UserError> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() {
            return Err(UserError::InvalidInput {
                reason: "name must not be empty".to_owned(),
            });
        }
        if !email.contains('@') {
            return Err(UserError::InvalidInput {
                reason: format!("'{email}' is not an email address"),
            });
        }

        let id = new_id("usr");
        if !self.tables.emails.claim(&email, &id).await? {
            return Err(UserError::EmailTaken { email });
        }
        // Records written without going through the index still count.
        let unindexed = self
            .tables
            .users
            .list_where(|u| u.email.eq_ignore_ascii_case(&email))
            .await?;
        if !unindexed.is_empty() {
            self.tables.emails.release(&email).await?;
            return Err(UserError::EmailTaken { email });
        }

        let user = User::new_client(id, name.to_owned(), email, today);
        self.tables.users.insert(&user).await?;

        info!(user_id = %user.id, "user registered");

        Ok(user)
    }

    /// Look up a user by id.
    ///
    /// # Errors
    ///
    /// - [`UserError::NotFound`] if the user doesn't exist.
    /// - [`UserError::Store`] if storage fails.
    pub async fn get(&self, user_id: &str) -> Result<User, UserError> {
        self.tables
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| UserError::NotFound {
                user_id: user_id.to_owned(),
            })
    }

    /// All users in id order.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::Store`] if storage fails.
    pub async fn list(&self) -> Result<Vec<User>, UserError> {
        Ok(self.tables.users.list().await?)
    }

    /// Persist a modified user.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::Store`] if storage fails.
    pub async fn save(&self, user: &User) -> Result<(), UserError> {
        self.tables.users.update(user).await?;
        Ok(())
    }

    /// Recompute the derived fields of `user_id` from its deployments.
    ///
    /// # Errors
    ///
    /// - [`UserError::NotFound`] if the user doesn't exist.
    /// - [`UserError::Catalog`] / [`UserError::Store`] if storage fails.
    pub async fn recompute_aggregates(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<User, UserError> {
        let mut user = self.get(user_id).await?;
        let owned = self
            .tables
            .deployments
            .list_where(|d| d.user_id == user_id)
            .await?;
        let plans = self.catalog.snapshot().await?;

        user.deployments_count = u32::try_from(owned.len()).unwrap_or(u32::MAX);
        user.disk_usage_mb = owned.iter().map(|d| d.disk_usage_mb).sum();
        user.max_disk_mb = resolver::effective_plan_limits(&user, &plans, today).max_disk_mb;
        self.save(&user).await?;

        debug!(
            user_id = %user.id,
            deployments = user.deployments_count,
            disk_usage_mb = user.disk_usage_mb,
            max_disk_mb = user.max_disk_mb,
            "user aggregates recomputed"
        );

        Ok(user)
    }
}

impl fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDirectory").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use vss_storage::{MemoryBackend, StorageBackend};

    use super::*;
    use crate::clock::parse_date;
    use crate::deployment::{Deployment, DeploymentStatus};

    fn directory() -> (UserDirectory, Tables) {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let tables = Tables::new(&storage);
        let catalog = PlanCatalog::from_table(tables.plans.clone());
        (UserDirectory::new(tables.clone(), catalog), tables)
    }

    fn today() -> NaiveDate {
        parse_date("2026-02-14").unwrap()
    }

    #[tokio::test]
    async fn register_creates_basic_active_client() {
        let (dir, _) = directory();
        let user = dir.register("Jordan Lee", "Jordan@Example.com", today()).await.unwrap();
        assert_eq!(user.role, Role::Client);
        assert_eq!(user.plan, PlanTier::Basic);
        assert_eq!(user.plan_status, PlanStatus::Active);
        assert_eq!(user.plan_expires_at, None);
        assert_eq!(user.email, "jordan@example.com");
        assert_eq!(user.created_at, today());
        assert_eq!(dir.get(&user.id).await.unwrap(), user);
    }

    #[tokio::test]
    async fn register_rejects_bad_input_and_duplicates() {
        let (dir, _) = directory();
        assert!(matches!(
            dir.register("  ", "a@b.c", today()).await,
            Err(UserError::InvalidInput { .. })
        ));
        assert!(matches!(
            dir.register("A", "nope", today()).await,
            Err(UserError::InvalidInput { .. })
        ));
        dir.register("A", "a@b.c", today()).await.unwrap();
        assert!(matches!(
            dir.register("B", "A@B.C", today()).await,
            Err(UserError::EmailTaken { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_registrations_with_one_email_have_one_winner() {
        let (dir, tables) = directory();
        let tasks: Vec<_> = ["Sam@Example.com", "sam@example.com", " SAM@example.COM "]
            .into_iter()
            .map(|email| {
                let dir = dir.clone();
                tokio::spawn(async move { dir.register("Sam", email, today()).await })
            })
            .collect();

        let mut winners = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(user) => winners.push(user),
                Err(err) => assert!(matches!(err, UserError::EmailTaken { .. })),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(tables.users.list().await.unwrap().len(), 1);
        assert_eq!(
            tables.emails.owner("sam@example.com").await.unwrap().as_deref(),
            Some(winners[0].id.as_str())
        );
    }

    #[tokio::test]
    async fn unindexed_user_email_blocks_registration() {
        let (dir, tables) = directory();
        let legacy = User::new_client(
            "u9".to_owned(),
            "Legacy".to_owned(),
            "old@example.com".to_owned(),
            today(),
        );
        tables.users.insert(&legacy).await.unwrap();

        let err = dir.register("New", "OLD@example.com", today()).await.unwrap_err();
        assert!(matches!(err, UserError::EmailTaken { .. }));
        assert!(tables.emails.owner("old@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_unknown_user_is_not_found() {
        let (dir, _) = directory();
        let err = dir.get("ghost").await.unwrap_err();
        assert!(matches!(err, UserError::NotFound { .. }));
    }

    #[tokio::test]
    async fn aggregates_sum_owned_deployments() {
        let (dir, tables) = directory();
        let user = dir.register("Alex", "alex@example.com", today()).await.unwrap();
        for (id, disk) in [("d1", 10.0), ("d2", 8.5)] {
            let mut dep = Deployment::new(
                id.to_owned(),
                user.id.clone(),
                format!("{id}.vss.io"),
                disk,
                today().and_hms_opt(9, 0, 0).unwrap().and_utc(),
            );
            dep.status = DeploymentStatus::Active;
            tables.deployments.insert(&dep).await.unwrap();
        }

        let updated = dir.recompute_aggregates(&user.id, today()).await.unwrap();
        assert_eq!(updated.deployments_count, 2);
        assert!((updated.disk_usage_mb - 18.5).abs() < f64::EPSILON);
        assert_eq!(updated.max_disk_mb, 50);
    }
}
