//! Purchase plans.

use std::collections::HashSet;

use ephemera_types::billing::Tier;
use ephemera_types::{Result, ServiceError};

/// Validated set of tiers. Names are unique and every tier lasts at least a day.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    tiers: Vec<Tier>,
}

impl Default for TierCatalog {
    fn default() -> Self {
        Self {
            tiers: ephemera_types::billing::default_tiers(),
        }
    }
}

impl TierCatalog {
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(ServiceError::validation("tier catalog is empty"));
        }
        let mut seen = HashSet::new();
        for tier in &tiers {
            if tier.name.trim().is_empty() {
                return Err(ServiceError::validation("tier name is empty"));
            }
            if tier.days_valid == 0 {
                return Err(ServiceError::validation(format!(
                    "tier {} has no duration",
                    tier.name
                )));
            }
            if !seen.insert(tier.name.as_str()) {
                return Err(ServiceError::validation(format!(
                    "duplicate tier {}",
                    tier.name
                )));
            }
        }
        Ok(Self { tiers })
    }

    /// Look up a tier by name.
    pub fn get(&self, name: &str) -> Result<&Tier> {
        self.tiers
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ServiceError::validation(format!("unknown tier: {name}")))
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }
}
