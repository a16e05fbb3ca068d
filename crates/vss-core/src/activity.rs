//! Append-only activity log.
//!
//! Every mutation records who did what to which target. Entries are never
//! edited or deleted, including when the target deployment is removed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{Record, Table, new_id};

pub const DEPLOYED: &str = "Deployed";
pub const REPLACED_DEPLOYMENT: &str = "Replaced deployment";
pub const UPDATED_VERSION: &str = "Updated version";
pub const DOMAIN_CHANGE_REQUEST: &str = "Domain change request";
pub const DOMAIN_CHANGED: &str = "Domain changed";
pub const DOMAIN_REQUEST_REJECTED: &str = "Domain request rejected";
pub const PLAN_REQUESTED: &str = "Plan request created";
pub const PLAN_APPROVED: &str = "Plan request approved";
pub const PLAN_REJECTED: &str = "Plan request rejected";
pub const PLAN_CHANGED: &str = "Plan changed";
pub const USER_SUSPENDED: &str = "Suspended user";
pub const USER_REACTIVATED: &str = "Reactivated user";
pub const DEPLOYMENT_SUSPENDED: &str = "Suspended deployment";
pub const DEPLOYMENT_REACTIVATED: &str = "Reactivated deployment";

/// One activity log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub user_id: String,
    pub action: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
}

impl Record for ActivityEntry {
    const PREFIX: &'static str = "activity/";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Writer and reader for the activity log.
#[derive(Clone)]
pub struct ActivityLog {
    entries: Table<ActivityEntry>,
    clock: Arc<dyn Clock>,
}

impl ActivityLog {
    /// Create a log over `entries`, timestamped by `clock`.
    #[must_use]
    pub fn new(entries: Table<ActivityEntry>, clock: Arc<dyn Clock>) -> Self {
        Self { entries, clock }
    }

    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn record(
        &self,
        user_id: &str,
        action: &str,
        target: &str,
    ) -> Result<ActivityEntry, StoreError> {
        let entry = ActivityEntry {
            id: new_id("act"),
            user_id: user_id.to_owned(),
            action: action.to_owned(),
            target: target.to_owned(),
            timestamp: self.clock.now(),
        };
        self.entries.insert(&entry).await?;

        info!(user_id = %user_id, action = %action, target = %target, "activity recorded");

        Ok(entry)
    }

    /// All entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn list(&self) -> Result<Vec<ActivityEntry>, StoreError> {
        let mut entries = self.entries.list().await?;
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Entries for one user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<ActivityEntry>, StoreError> {
        let mut entries = self.list().await?;
        entries.retain(|e| e.user_id == user_id);
        Ok(entries)
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog").finish_non_exhaustive()
    }
}
