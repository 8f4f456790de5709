//! Liquidation start timestamps per vault.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::Excluded;
use vault_core::{EntityLedger, Timestamp};

/// Vault id to the ordered set of its liquidation start timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiquidationWindowIndex {
    starts: BTreeMap<String, BTreeSet<Timestamp>>,
}

impl LiquidationWindowIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every ledger; vaults never liquidated get an empty set.
    pub fn from_ledgers<'a, I>(ledgers: I) -> Self
    where
        I: IntoIterator<Item = &'a EntityLedger>,
    {
        let mut index = Self::new();
        for ledger in ledgers {
            index.add_ledger(ledger);
        }
        index
    }

    pub fn add_ledger(&mut self, ledger: &EntityLedger) {
        self.starts
            .entry(ledger.entity_id.clone())
            .or_default()
            .extend(ledger.liquidation_starts());
    }

    pub fn insert(&mut self, entity_id: impl Into<String>, start: Timestamp) {
        self.starts.entry(entity_id.into()).or_default().insert(start);
    }

    /// Start timestamps of one vault.
    pub fn starts(&self, entity_id: &str) -> Option<&BTreeSet<Timestamp>> {
        self.starts.get(entity_id)
    }

    /// Vaults indexed.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Earliest start strictly between `from` and `to`.
    pub fn first_between(
        &self,
        entity_id: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Option<Timestamp> {
        if from >= to {
            return None;
        }
        self.starts
            .get(entity_id)?
            .range((Excluded(from), Excluded(to)))
            .next()
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_between() {
        let mut index = LiquidationWindowIndex::new();
        index.insert("v", 100);
        index.insert("v", 150);
        index.insert("v", 175);

        assert_eq!(index.first_between("v", 100, 200), Some(150));
        assert_eq!(index.first_between("v", 99, 200), Some(100));
        assert_eq!(index.first_between("v", 150, 175), None);
        assert_eq!(index.first_between("v", 150, 176), Some(175));
        assert_eq!(index.first_between("v", 200, 300), None);
    }

    #[test]
    fn test_degenerate_intervals() {
        let mut index = LiquidationWindowIndex::new();
        index.insert("v", 100);
        assert_eq!(index.first_between("v", 100, 100), None);
        assert_eq!(index.first_between("v", 100, 101), None);
        assert_eq!(index.first_between("v", 200, 50), None);
        assert_eq!(index.first_between("missing", 0, 1_000), None);
    }

    #[test]
    fn test_from_ledgers() {
        let ledger = EntityLedger {
            entity_id: "0x1-ETH-A".to_string(),
            collateral_type: "ETH-A".to_string(),
            rate: 1.0,
            entries: Vec::new(),
            price_series: Vec::new(),
        };
        let index = LiquidationWindowIndex::from_ledgers([&ledger]);
        assert_eq!(index.len(), 1);
        assert!(index.starts("0x1-ETH-A").unwrap().is_empty());
    }
}
