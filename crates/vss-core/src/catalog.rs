//! Plan catalog.
//!
//! Holds one [`PlanDefinition`] per [`PlanTier`]. Admins can toggle a tier,
//! change its price and quotas, or reset everything to the built-in
//! defaults. Quota changes apply to every user on the tier at their next
//! status resolution; there is no migration or grandfathering step.
//!
//! Definitions are stored at `plans/<Tier>`. A tier with no stored record
//! resolves to its default, so a fresh store needs no seeding.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use vss_storage::StorageBackend;

use crate::error::CatalogError;
use crate::store::{Record, Table};

/// A subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlanTier {
    Basic,
    Medium,
    Full,
}

impl PlanTier {
    /// Every tier, cheapest first.
    pub const ALL: [Self; 3] = [Self::Basic, Self::Medium, Self::Full];

    /// Canonical name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Medium => "Medium",
            Self::Full => "Full",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Basic => 0,
            Self::Medium => 1,
            Self::Full => 2,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "medium" => Ok(Self::Medium),
            "full" => Ok(Self::Full),
            _ => Err(CatalogError::UnknownTier { name: s.to_owned() }),
        }
    }
}

/// How often a plan is billed. Only monthly billing exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
}

/// Quotas and pricing for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDefinition {
    pub tier: PlanTier,
    /// Whether users may request this tier.
    pub enabled: bool,
    /// Disk quota for each deployment.
    pub max_disk_mb: u32,
    /// Largest single upload.
    pub max_upload_mb: u32,
    /// Price per billing interval.
    pub price: u32,
    pub interval: BillingInterval,
}

impl PlanDefinition {
    /// The built-in definition for `tier`.
    #[must_use]
    pub const fn default_for(tier: PlanTier) -> Self {
        let (max_disk_mb, max_upload_mb, price) = match tier {
            PlanTier::Basic => (50, 5, 0),
            PlanTier::Medium => (200, 10, 19),
            PlanTier::Full => (500, 20, 49),
        };
        Self {
            tier,
            enabled: true,
            max_disk_mb,
            max_upload_mb,
            price,
            interval: BillingInterval::Monthly,
        }
    }
}

impl Record for PlanDefinition {
    const PREFIX: &'static str = "plans/";

    fn id(&self) -> &str {
        self.tier.as_str()
    }
}

/// A partial update to a plan definition. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPatch {
    pub enabled: Option<bool>,
    pub price: Option<u32>,
    pub max_disk_mb: Option<u32>,
    pub max_upload_mb: Option<u32>,
}

impl PlanPatch {
    /// Build a patch from raw form text, clamping every numeric field with
    /// [`clamp_non_negative_int`].
    #[must_use]
    pub fn from_text(
        enabled: Option<bool>,
        price: Option<&str>,
        max_disk_mb: Option<&str>,
        max_upload_mb: Option<&str>,
    ) -> Self {
        Self {
            enabled,
            price: price.map(clamp_non_negative_int),
            max_disk_mb: max_disk_mb.map(clamp_non_negative_int),
            max_upload_mb: max_upload_mb.map(clamp_non_negative_int),
        }
    }

    fn apply(&self, def: &mut PlanDefinition) {
        if let Some(enabled) = self.enabled {
            def.enabled = enabled;
        }
        if let Some(price) = self.price {
            def.price = price;
        }
        if let Some(max_disk_mb) = self.max_disk_mb {
            def.max_disk_mb = max_disk_mb;
        }
        if let Some(max_upload_mb) = self.max_upload_mb {
            def.max_upload_mb = max_upload_mb;
        }
    }
}

/// Parse the leading integer of `input`, clamped to `0..=u32::MAX`.
///
/// Leading whitespace and an optional sign are accepted and anything after
/// the digits is ignored (`"12.7"` is 12, `"30MB"` is 30). Input with no
/// leading digits is 0, as are negative numbers.
#[must_use]
pub fn clamp_non_negative_int(input: &str) -> u32 {
    let s = input.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: u64 = 0;
    let mut seen_digit = false;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        seen_digit = true;
        value = value.saturating_mul(10).saturating_add(u64::from(b - b'0'));
    }

    if !seen_digit || negative {
        return 0;
    }
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// An owned snapshot of all three definitions, for the pure resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanTable {
    plans: [PlanDefinition; 3],
}

impl PlanTable {
    /// The definition for `tier`.
    #[must_use]
    pub const fn get(&self, tier: PlanTier) -> &PlanDefinition {
        &self.plans[tier.index()]
    }

    /// All definitions, cheapest first.
    #[must_use]
    pub const fn all(&self) -> &[PlanDefinition; 3] {
        &self.plans
    }

    /// Replace the definition for its tier.
    pub fn set(&mut self, def: PlanDefinition) {
        let idx = def.tier.index();
        self.plans[idx] = def;
    }
}

impl Default for PlanTable {
    fn default() -> Self {
        Self {
            plans: PlanTier::ALL.map(PlanDefinition::default_for),
        }
    }
}

/// Stored, admin-editable plan definitions.
#[derive(Clone)]
pub struct PlanCatalog {
    plans: Table<PlanDefinition>,
}

impl PlanCatalog {
    /// Create a catalog backed by `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            plans: Table::new(storage),
        }
    }

    /// Create a catalog over an existing plans table.
    #[must_use]
    pub fn from_table(plans: Table<PlanDefinition>) -> Self {
        Self { plans }
    }

    /// The current definition of `tier`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if storage fails.
    pub async fn get(&self, tier: PlanTier) -> Result<PlanDefinition, CatalogError> {
        Ok(self
            .plans
            .get(tier.as_str())
            .await?
            .unwrap_or_else(|| PlanDefinition::default_for(tier)))
    }

    /// All definitions, cheapest first.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if storage fails.
    pub async fn get_all(&self) -> Result<Vec<PlanDefinition>, CatalogError> {
        Ok(self.snapshot().await?.all().to_vec())
    }

    /// Snapshot every definition for read-time resolution.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if storage fails.
    pub async fn snapshot(&self) -> Result<PlanTable, CatalogError> {
        let mut table = PlanTable::default();
        for tier in PlanTier::ALL {
            table.set(self.get(tier).await?);
        }
        Ok(table)
    }

    /// Apply `patch` to `tier`, replacing only the supplied fields.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if storage fails.
    pub async fn update(
        &self,
        tier: PlanTier,
        patch: &PlanPatch,
    ) -> Result<PlanDefinition, CatalogError> {
        let mut def = self.get(tier).await?;
        patch.apply(&mut def);
        self.plans.update(&def).await?;

        info!(
            tier = %tier,
            enabled = def.enabled,
            price = def.price,
            max_disk_mb = def.max_disk_mb,
            max_upload_mb = def.max_upload_mb,
            "plan definition updated"
        );

        Ok(def)
    }

    /// Enable or disable `tier`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if storage fails.
    pub async fn set_enabled(
        &self,
        tier: PlanTier,
        enabled: bool,
    ) -> Result<PlanDefinition, CatalogError> {
        let patch = PlanPatch {
            enabled: Some(enabled),
            ..PlanPatch::default()
        };
        self.update(tier, &patch).await
    }

    /// Restore every tier to its built-in definition.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Store`] if storage fails.
    pub async fn reset_to_defaults(&self) -> Result<(), CatalogError> {
        for tier in PlanTier::ALL {
            self.plans.update(&PlanDefinition::default_for(tier)).await?;
        }
        info!("plan catalog reset to defaults");
        Ok(())
    }
}

impl fmt::Debug for PlanCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCatalog").finish_non_exhaustive()
    }
}
