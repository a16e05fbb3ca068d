//! Typed record tables over a [`StorageBackend`].
//!
//! Every entity (users, deployments, versions, requests, ledger entries, …)
//! lives in its own [`Table`] under a fixed key prefix, serialized as JSON.
//! The rules engine only ever talks to tables, so swapping the in-memory
//! backend for a database-backed one does not touch the resolver or the
//! workflows.
//!
//! Domain and email uniqueness are enforced by a [`UniqueIndex`], which
//! claims `idx/domains/<lowercase domain>` or `idx/emails/<lowercase email>`
//! with an atomic insert-if-absent.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;
use vss_storage::StorageBackend;

use crate::activity::ActivityEntry;
use crate::catalog::PlanDefinition;
use crate::deployment::{AccessLog, Deployment, DomainRequest, TrafficSeries, Version};
use crate::error::StoreError;
use crate::request::{LedgerEntry, PlanRequest};
use crate::user::User;

const DOMAIN_INDEX_PREFIX: &str = "idx/domains/";
const EMAIL_INDEX_PREFIX: &str = "idx/emails/";

/// A persisted entity with a stable string id.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Key prefix for this entity, ending in `/`.
    const PREFIX: &'static str;

    /// The record's id (the key suffix).
    fn id(&self) -> &str;
}

/// Generate a fresh record id such as `dep_3f2a…`.
#[must_use]
pub fn new_id(kind: &str) -> String {
    format!("{kind}_{}", Uuid::new_v4().simple())
}

/// JSON-encoded records of one entity type.
pub struct Table<T> {
    storage: Arc<dyn StorageBackend>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> Table<T> {
    /// Create a table view over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            _marker: PhantomData,
        }
    }

    fn key(id: &str) -> String {
        format!("{}{id}", T::PREFIX)
    }

    fn encode(record: &T) -> Result<(String, Vec<u8>), StoreError> {
        let key = Self::key(record.id());
        let bytes = serde_json::to_vec(record).map_err(|e| StoreError::Serialization {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        Ok((key, bytes))
    }

    /// Fetch a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Deserialization`] if the stored bytes are not a
    /// valid record, or [`StoreError::Storage`] if the backend fails.
    pub async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        let key = Self::key(id);
        let Some(data) = self.storage.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| StoreError::Deserialization {
                key,
                reason: e.to_string(),
            })
    }

    /// List every record in key order.
    ///
    /// Records that fail to decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend fails.
    pub async fn list(&self) -> Result<Vec<T>, StoreError> {
        let keys = self.storage.list(T::PREFIX).await?;
        let mut records = Vec::with_capacity(keys.len());

        for key in &keys {
            if let Some(data) = self.storage.get(key).await? {
                match serde_json::from_slice::<T>(&data) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(key = %key, error = %e, "skipping undecodable record"),
                }
            }
        }

        Ok(records)
    }

    /// List the records matching a predicate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend fails.
    pub async fn list_where(&self, pred: impl Fn(&T) -> bool) -> Result<Vec<T>, StoreError> {
        let mut records = self.list().await?;
        records.retain(|r| pred(r));
        Ok(records)
    }

    /// Insert a new record. Fails if the id is already in use.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Duplicate`] if a record with this id exists.
    /// - [`StoreError::Serialization`] / [`StoreError::Storage`] on failure.
    pub async fn insert(&self, record: &T) -> Result<(), StoreError> {
        let (key, bytes) = Self::encode(record)?;
        if self.storage.put_if_absent(&key, &bytes).await? {
            Ok(())
        } else {
            Err(StoreError::Duplicate { key })
        }
    }

    /// Write a record, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] / [`StoreError::Storage`] on failure.
    pub async fn update(&self, record: &T) -> Result<(), StoreError> {
        let (key, bytes) = Self::encode(record)?;
        self.storage.put(&key, &bytes).await?;
        Ok(())
    }

    /// Delete a record. Deleting a missing id is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend fails.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.storage.delete(&Self::key(id)).await?;
        Ok(())
    }
}

impl<T> std::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("record", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// Case-insensitive ownership index mapping a unique value to the id of the
/// record holding it.
#[derive(Clone)]
pub struct UniqueIndex {
    storage: Arc<dyn StorageBackend>,
    prefix: &'static str,
}

impl UniqueIndex {
    /// Deployment domains, held by deployment id.
    #[must_use]
    pub fn domains(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            prefix: DOMAIN_INDEX_PREFIX,
        }
    }

    /// User emails, held by user id.
    #[must_use]
    pub fn emails(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            prefix: EMAIL_INDEX_PREFIX,
        }
    }

    fn key(&self, value: &str) -> String {
        format!("{}{}", self.prefix, value.trim().to_lowercase())
    }

    /// The id currently holding `value`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend fails.
    pub async fn owner(&self, value: &str) -> Result<Option<String>, StoreError> {
        let owner = self.storage.get(&self.key(value)).await?;
        Ok(owner.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Atomically claim `value` for `holder`.
    ///
    /// Returns `false` if it is already held.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend fails.
    pub async fn claim(&self, value: &str, holder: &str) -> Result<bool, StoreError> {
        let claimed = self
            .storage
            .put_if_absent(&self.key(value), holder.as_bytes())
            .await?;
        Ok(claimed)
    }

    /// Point an already-held value at a different holder.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend fails.
    pub async fn assign(&self, value: &str, holder: &str) -> Result<(), StoreError> {
        self.storage
            .put(&self.key(value), holder.as_bytes())
            .await?;
        Ok(())
    }

    /// Release `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend fails.
    pub async fn release(&self, value: &str) -> Result<(), StoreError> {
        self.storage.delete(&self.key(value)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for UniqueIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniqueIndex")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Every table the engine reads or writes, sharing one backend.
#[derive(Clone, Debug)]
pub struct Tables {
    pub plans: Table<PlanDefinition>,
    pub users: Table<User>,
    pub deployments: Table<Deployment>,
    pub versions: Table<Version>,
    pub plan_requests: Table<PlanRequest>,
    pub ledger: Table<LedgerEntry>,
    pub domain_requests: Table<DomainRequest>,
    pub access_logs: Table<AccessLog>,
    pub traffic: Table<TrafficSeries>,
    pub activity: Table<ActivityEntry>,
    pub domains: UniqueIndex,
    pub emails: UniqueIndex,
}

impl Tables {
    /// Open all tables over `storage`.
    #[must_use]
    pub fn new(storage: &Arc<dyn StorageBackend>) -> Self {
        Self {
            plans: Table::new(Arc::clone(storage)),
            users: Table::new(Arc::clone(storage)),
            deployments: Table::new(Arc::clone(storage)),
            versions: Table::new(Arc::clone(storage)),
            plan_requests: Table::new(Arc::clone(storage)),
            ledger: Table::new(Arc::clone(storage)),
            domain_requests: Table::new(Arc::clone(storage)),
            access_logs: Table::new(Arc::clone(storage)),
            traffic: Table::new(Arc::clone(storage)),
            activity: Table::new(Arc::clone(storage)),
            domains: UniqueIndex::domains(Arc::clone(storage)),
            emails: UniqueIndex::emails(Arc::clone(storage)),
        }
    }
}
