//! Plan tiers and the price → plan lookup.
//!
//! The price table is fixed for the life of the process: it is either the
//! compiled-in production table or a YAML file read once at start-up.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::foundation::ValidationError;

/// Internal plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// No paid entitlement.
    Free,
    /// Recurring monthly subscription.
    Monthly,
    /// Recurring annual subscription.
    Annual,
    /// One-time purchase, never expires.
    Lifetime,
    /// One-time team purchase, never expires.
    LifetimeTeam,
}

impl PlanTier {
    /// Wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Monthly => "monthly",
            PlanTier::Annual => "annual",
            PlanTier::Lifetime => "lifetime",
            PlanTier::LifetimeTeam => "lifetime_team",
        }
    }

    /// Returns true if this tier is a paid tier.
    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanTier::Free)
    }

    /// Returns true if the tier is billed per period.
    pub fn is_recurring(&self) -> bool {
        matches!(self, PlanTier::Monthly | PlanTier::Annual)
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "monthly" => Ok(PlanTier::Monthly),
            "annual" => Ok(PlanTier::Annual),
            "lifetime" => Ok(PlanTier::Lifetime),
            "lifetime_team" => Ok(PlanTier::LifetimeTeam),
            other => Err(ValidationError::invalid_format(
                "plan_tier",
                format!("unknown plan '{}'", other),
            )),
        }
    }
}

/// How a purchase is billed. Selects the fallback tier for unmapped prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseKind {
    Recurring,
    OneTime,
}

impl PurchaseKind {
    /// Tier assumed when the price identifier is not in the table.
    pub fn fallback_tier(&self) -> PlanTier {
        match self {
            PurchaseKind::Recurring => PlanTier::Monthly,
            PurchaseKind::OneTime => PlanTier::Lifetime,
        }
    }
}

/// Outcome of a price lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanResolution {
    pub tier: PlanTier,
    /// False when the fallback tier was used.
    pub mapped: bool,
}

static DEFAULT_PRICE_TABLE: Lazy<HashMap<String, PlanTier>> = Lazy::new(|| {
    [
        ("price_1SaMthK12hmLPpaYMCTzzlPB", PlanTier::Monthly),
        ("price_1SaMuMK12hmLPpaYNt3jOIT3", PlanTier::Annual),
        ("price_1SaMusK12hmLPpaYVpdgy4Ks", PlanTier::Lifetime),
        ("price_1SaN4iK12hmLPpaYk8iSS7Yo", PlanTier::LifetimeTeam),
    ]
    .into_iter()
    .map(|(price, tier)| (price.to_string(), tier))
    .collect()
});

/// Errors loading a price table.
#[derive(Debug, Error)]
pub enum PlanTableError {
    #[error("failed to read price table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse price table: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("price table is empty")]
    Empty,

    #[error("price '{0}' maps to the free tier")]
    FreeTierPriced(String),
}

#[derive(Deserialize)]
struct PriceTableFile {
    prices: HashMap<String, PlanTier>,
}

/// Static lookup from provider price identifiers to plan tiers.
#[derive(Debug, Clone)]
pub struct PlanMapper {
    prices: HashMap<String, PlanTier>,
}

impl PlanMapper {
    /// Builds a mapper from an explicit table.
    pub fn new(prices: HashMap<String, PlanTier>) -> Result<Self, PlanTableError> {
        if prices.is_empty() {
            return Err(PlanTableError::Empty);
        }
        if let Some((price, _)) = prices.iter().find(|(_, tier)| !tier.is_paid()) {
            return Err(PlanTableError::FreeTierPriced(price.clone()));
        }
        Ok(Self { prices })
    }

    /// Parses a table of the form:
    ///
    /// ```yaml
    /// prices:
    ///   price_abc: monthly
    ///   price_def: lifetime_team
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PlanTableError> {
        let file: PriceTableFile = serde_yaml::from_str(yaml)?;
        Self::new(file.prices)
    }

    /// Reads and parses a YAML price table from disk.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PlanTableError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Exact lookup without fallback.
    pub fn lookup(&self, price_id: &str) -> Option<PlanTier> {
        self.prices.get(price_id).copied()
    }

    /// Resolves a price to a tier, never failing.
    ///
    /// Unmapped or missing identifiers resolve to the purchase kind's
    /// fallback tier with `mapped = false`.
    pub fn resolve(&self, price_id: Option<&str>, kind: PurchaseKind) -> PlanResolution {
        match price_id.and_then(|id| self.lookup(id)) {
            Some(tier) => PlanResolution { tier, mapped: true },
            None => PlanResolution {
                tier: kind.fallback_tier(),
                mapped: false,
            },
        }
    }

    /// Number of mapped prices.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PlanMapper {
    fn default() -> Self {
        Self {
            prices: DEFAULT_PRICE_TABLE.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_table_maps_production_prices() {
        let mapper = PlanMapper::default();

        assert_eq!(mapper.lookup("price_1SaMthK12hmLPpaYMCTzzlPB"), Some(PlanTier::Monthly));
        assert_eq!(mapper.lookup("price_1SaMuMK12hmLPpaYNt3jOIT3"), Some(PlanTier::Annual));
        assert_eq!(mapper.lookup("price_1SaMusK12hmLPpaYVpdgy4Ks"), Some(PlanTier::Lifetime));
        assert_eq!(
            mapper.lookup("price_1SaN4iK12hmLPpaYk8iSS7Yo"),
            Some(PlanTier::LifetimeTeam)
        );
        assert_eq!(mapper.len(), 4);
    }

    #[test]
    fn unmapped_recurring_price_falls_back_to_monthly() {
        let resolution = PlanMapper::default().resolve(Some("price_new"), PurchaseKind::Recurring);

        assert_eq!(resolution.tier, PlanTier::Monthly);
        assert!(!resolution.mapped);
    }

    #[test]
    fn unmapped_one_time_price_falls_back_to_lifetime() {
        let resolution = PlanMapper::default().resolve(Some("price_new"), PurchaseKind::OneTime);

        assert_eq!(resolution.tier, PlanTier::Lifetime);
        assert!(!resolution.mapped);
    }

    #[test]
    fn missing_price_is_treated_as_unmapped() {
        let resolution = PlanMapper::default().resolve(None, PurchaseKind::Recurring);
        assert_eq!(resolution.tier, PlanTier::Monthly);
        assert!(!resolution.mapped);
    }

    #[test]
    fn mapped_price_ignores_purchase_kind() {
        let resolution = PlanMapper::default()
            .resolve(Some("price_1SaMuMK12hmLPpaYNt3jOIT3"), PurchaseKind::OneTime);
        assert_eq!(resolution, PlanResolution { tier: PlanTier::Annual, mapped: true });
    }

    #[test]
    fn yaml_table_replaces_defaults() {
        let mapper = PlanMapper::from_yaml_str(
            "prices:\n  price_a: annual\n  price_b: lifetime_team\n",
        )
        .unwrap();

        assert_eq!(mapper.lookup("price_a"), Some(PlanTier::Annual));
        assert_eq!(mapper.lookup("price_b"), Some(PlanTier::LifetimeTeam));
        assert_eq!(mapper.lookup("price_1SaMthK12hmLPpaYMCTzzlPB"), None);
    }

    #[test]
    fn yaml_table_rejects_unknown_plan() {
        let result = PlanMapper::from_yaml_str("prices:\n  price_a: platinum\n");
        assert!(matches!(result, Err(PlanTableError::Yaml(_))));
    }

    #[test]
    fn yaml_table_rejects_free_tier() {
        let result = PlanMapper::from_yaml_str("prices:\n  price_a: free\n");
        assert!(matches!(result, Err(PlanTableError::FreeTierPriced(p)) if p == "price_a"));
    }

    #[test]
    fn yaml_table_rejects_empty_table() {
        let result = PlanMapper::from_yaml_str("prices: {}\n");
        assert!(matches!(result, Err(PlanTableError::Empty)));
    }

    #[test]
    fn yaml_table_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prices:").unwrap();
        writeln!(file, "  price_x: monthly").unwrap();

        let mapper = PlanMapper::from_yaml_file(file.path()).unwrap();
        assert_eq!(mapper.lookup("price_x"), Some(PlanTier::Monthly));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = PlanMapper::from_yaml_file("/nonexistent/prices.yaml");
        assert!(matches!(result, Err(PlanTableError::Io(_))));
    }

    #[test]
    fn tier_parses_from_storage_string() {
        for tier in [
            PlanTier::Free,
            PlanTier::Monthly,
            PlanTier::Annual,
            PlanTier::Lifetime,
            PlanTier::LifetimeTeam,
        ] {
            assert_eq!(tier.as_str().parse::<PlanTier>().unwrap(), tier);
        }
        assert!("gold".parse::<PlanTier>().is_err());
    }

    #[test]
    fn only_subscriptions_recur() {
        assert!(PlanTier::Monthly.is_recurring());
        assert!(PlanTier::Annual.is_recurring());
        assert!(!PlanTier::Lifetime.is_recurring());
        assert!(!PlanTier::Free.is_paid());
    }
}
