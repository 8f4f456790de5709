//! Subgraph wire records.
//!
//! These mirror the GraphQL response shapes. Numeric fields arrive as
//! decimal strings (sometimes as JSON numbers) and are kept raw until the
//! decoder parses them, so a malformed value never fails deserialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use vault_core::{Checkpoint, CheckpointAggregate, EntityState, Snapshot, Timestamp};

/// A numeric field as received: decimal string or JSON number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "NumberRepr", into = "String")]
pub struct RawNumber(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<NumberRepr> for RawNumber {
    fn from(repr: NumberRepr) -> Self {
        match repr {
            NumberRepr::Text(s) => RawNumber(s),
            NumberRepr::Int(i) => RawNumber(i.to_string()),
            NumberRepr::Float(f) => RawNumber(f.to_string()),
        }
    }
}

impl From<RawNumber> for String {
    fn from(raw: RawNumber) -> Self {
        raw.0
    }
}

impl RawNumber {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as a finite float.
    pub fn to_f64(&self) -> Option<f64> {
        self.0.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Parse as an integer (accepts integral decimals such as "12.0").
    pub fn to_i64(&self) -> Option<i64> {
        let trimmed = self.0.trim();
        trimmed.parse::<i64>().ok().or_else(|| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && v.fract() == 0.0)
                .map(|v| v as i64)
        })
    }
}

/// Either a bare address or an `{ id }` entity reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OwnerRef {
    Address(String),
    Entity { id: String },
}

impl OwnerRef {
    pub fn id(&self) -> &str {
        match self {
            OwnerRef::Address(id) => id,
            OwnerRef::Entity { id } => id,
        }
    }
}

/// Vault log, discriminated by the GraphQL `__typename`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__typename", rename_all_fields = "camelCase")]
pub enum RawLog {
    VaultCreationLog {
        id: String,
        transaction: Option<String>,
        timestamp: RawNumber,
    },
    VaultCollateralChangeLog {
        id: String,
        transaction: Option<String>,
        timestamp: RawNumber,
        collateral_diff: Option<RawNumber>,
        collateral_after: Option<RawNumber>,
        collateral_before: Option<RawNumber>,
    },
    VaultDebtChangeLog {
        id: String,
        transaction: Option<String>,
        timestamp: RawNumber,
        debt_diff: Option<RawNumber>,
        debt_after: Option<RawNumber>,
        debt_before: Option<RawNumber>,
    },
    VaultTransferChangeLog {
        id: String,
        transaction: Option<String>,
        timestamp: RawNumber,
        previous_owner: Option<OwnerRef>,
        next_owner: Option<OwnerRef>,
    },
    VaultSplitChangeLog {
        id: String,
        transaction: Option<String>,
        timestamp: RawNumber,
        dst: String,
        src: String,
        collateral_to_move: Option<RawNumber>,
        debt_to_move: Option<RawNumber>,
        block: Option<RawNumber>,
    },
    /// Any log type this pipeline does not understand.
    #[serde(other)]
    Unknown,
}

impl RawLog {
    /// Log id, if the variant carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            RawLog::VaultCreationLog { id, .. }
            | RawLog::VaultCollateralChangeLog { id, .. }
            | RawLog::VaultDebtChangeLog { id, .. }
            | RawLog::VaultTransferChangeLog { id, .. }
            | RawLog::VaultSplitChangeLog { id, .. } => Some(id),
            RawLog::Unknown => None,
        }
    }
}

/// Collateral auction (clip) record for a vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleAuction {
    pub id: String,
    pub vault: Option<OwnerRef>,
    pub amount_dai_to_raise: Option<RawNumber>,
    pub amount_collateral_to_sell: Option<RawNumber>,
    pub bought_at: Option<RawNumber>,
    pub is_active: Option<bool>,
    pub started_at: Option<RawNumber>,
    pub reseted_at: Option<RawNumber>,
    pub updated_at: Option<RawNumber>,
}

/// `collateralType { id rate }` reference on a vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralTypeRef {
    pub id: String,
    pub rate: Option<RawNumber>,
}

/// Vault entity as returned by `vaults(...)` queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    pub id: String,
    #[serde(default)]
    pub cdp_id: Option<RawNumber>,
    #[serde(default)]
    pub opened_at: Option<RawNumber>,
    #[serde(default)]
    pub updated_at: Option<RawNumber>,
    #[serde(default)]
    pub updated_at_block: Option<RawNumber>,
    #[serde(default)]
    pub updated_at_transaction: Option<String>,
    #[serde(default)]
    pub collateral: Option<RawNumber>,
    #[serde(default)]
    pub debt: Option<RawNumber>,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    #[serde(default)]
    pub safety_level: Option<String>,
    #[serde(default)]
    pub collateral_type: Option<CollateralTypeRef>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

impl VaultRecord {
    /// Address part of an `address-ilk` vault id.
    pub fn address(&self) -> &str {
        address_of(&self.id)
    }

    /// Point-in-time state; unparseable balances read as zero.
    pub fn to_entity_state(&self) -> EntityState {
        EntityState {
            id: self.id.clone(),
            collateral: balance_or_zero(&self.id, "collateral", self.collateral.as_ref()),
            debt: balance_or_zero(&self.id, "debt", self.debt.as_ref()),
            cdp_id: self.cdp_id.as_ref().map(|c| c.as_str().to_string()),
            owner: self.owner.as_ref().map(|o| o.id().to_string()),
            updated_at: self.updated_at.as_ref().and_then(RawNumber::to_i64),
            updated_at_block: self
                .updated_at_block
                .as_ref()
                .and_then(RawNumber::to_i64)
                .and_then(|b| Checkpoint::try_from(b).ok()),
            updated_at_transaction: self.updated_at_transaction.clone(),
            safety_level: self.safety_level.clone(),
        }
    }
}

/// Address part of an `address-ilk` vault id.
pub fn address_of(vault_id: &str) -> &str {
    vault_id.split('-').next().unwrap_or_default()
}

fn balance_or_zero(vault_id: &str, field: &str, raw: Option<&RawNumber>) -> f64 {
    match raw {
        None => 0.0,
        Some(raw) => raw.to_f64().unwrap_or_else(|| {
            warn!(vault = vault_id, field, value = raw.as_str(), "Unparseable balance, using 0");
            0.0
        }),
    }
}

/// Everything fetched for one vault's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultHistoryBundle {
    /// Vault with its own logs (newest first, as served).
    pub vault: VaultRecord,
    /// Auctions against the vault.
    #[serde(default)]
    pub sale_auctions: Vec<SaleAuction>,
    /// Split logs whose destination is this vault's address.
    #[serde(default)]
    pub split_logs_as_destination: Vec<RawLog>,
}

/// Oracle price poke for a collateral class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdateLog {
    pub id: String,
    pub timestamp: RawNumber,
    #[serde(default)]
    pub collateral: Option<OwnerRef>,
    pub new_value: Option<RawNumber>,
    pub new_spot_price: Option<RawNumber>,
}

/// Oracle price reference on a collateral type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralPrice {
    pub id: Option<String>,
    pub value: Option<RawNumber>,
    pub spot_price: Option<RawNumber>,
}

/// `collateralType(id, block)` aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralTypeRecord {
    pub vault_count: Option<RawNumber>,
    pub unmanaged_vault_count: Option<RawNumber>,
    pub price: Option<CollateralPrice>,
    pub rate: Option<RawNumber>,
    pub liquidation_ratio: Option<RawNumber>,
}

impl CollateralTypeRecord {
    /// Managed plus unmanaged vaults.
    pub fn total_vault_count(&self) -> u64 {
        let count = |raw: &Option<RawNumber>| {
            raw.as_ref()
                .and_then(RawNumber::to_i64)
                .and_then(|c| u64::try_from(c).ok())
                .unwrap_or(0)
        };
        count(&self.vault_count) + count(&self.unmanaged_vault_count)
    }
}

/// Assemble a snapshot from one checkpoint's query results.
pub fn assemble_snapshot(
    checkpoint: Checkpoint,
    collateral_type: &str,
    aggregate: Option<&CollateralTypeRecord>,
    timestamp: Timestamp,
    vaults: &[VaultRecord],
) -> Snapshot {
    let parse = |raw: Option<&RawNumber>| raw.and_then(RawNumber::to_f64).unwrap_or(0.0);
    let aggregate = CheckpointAggregate {
        collateral_type: collateral_type.to_string(),
        timestamp,
        price: parse(aggregate.and_then(|a| a.price.as_ref()).and_then(|p| p.value.as_ref())),
        rate: parse(aggregate.and_then(|a| a.rate.as_ref())),
        liquidation_ratio: parse(aggregate.and_then(|a| a.liquidation_ratio.as_ref())),
        count: aggregate.map(CollateralTypeRecord::total_vault_count).unwrap_or(0),
    };

    let mut entities = BTreeMap::new();
    for vault in vaults {
        entities
            .entry(vault.id.clone())
            .or_insert_with(|| vault.to_entity_state());
    }

    Snapshot {
        checkpoint,
        aggregate,
        entities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_number_accepts_strings_and_numbers() {
        let values: Vec<RawNumber> = serde_json::from_str(r#"["1.5", 2, 3.25, "abc"]"#).unwrap();
        assert_eq!(values[0].to_f64(), Some(1.5));
        assert_eq!(values[1].to_i64(), Some(2));
        assert_eq!(values[2].to_f64(), Some(3.25));
        assert_eq!(values[3].to_f64(), None);
        assert_eq!(RawNumber::new("12.0").to_i64(), Some(12));
        assert_eq!(RawNumber::new("NaN").to_f64(), None);
    }

    #[test]
    fn test_raw_log_typename_dispatch() {
        let json = r#"[
            {"__typename": "VaultCollateralChangeLog", "id": "0xa-1", "transaction": "0xa",
             "timestamp": "100", "collateralDiff": "2", "collateralAfter": "2",
             "collateralBefore": "0"},
            {"__typename": "VaultTransferChangeLog", "id": "0xb-3", "transaction": "0xb",
             "timestamp": "200", "previousOwner": {"id": "0x1"}, "nextOwner": {"id": "0x2"}},
            {"__typename": "VaultSomethingNewLog", "id": "0xc-0"}
        ]"#;
        let logs: Vec<RawLog> = serde_json::from_str(json).unwrap();
        assert!(matches!(logs[0], RawLog::VaultCollateralChangeLog { .. }));
        match &logs[1] {
            RawLog::VaultTransferChangeLog { next_owner, .. } => {
                assert_eq!(next_owner.as_ref().unwrap().id(), "0x2");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(logs[2], RawLog::Unknown);
        assert_eq!(logs[2].id(), None);
    }

    #[test]
    fn test_vault_record_to_state() {
        let json = r#"{"id": "0xabc-ETH-A", "collateral": "10.5", "debt": "oops",
                       "cdpId": "42", "owner": "0xowner", "updatedAt": "1600000000",
                       "updatedAtBlock": "11000000", "safetyLevel": "SAFE"}"#;
        let vault: VaultRecord = serde_json::from_str(json).unwrap();
        let state = vault.to_entity_state();
        assert_eq!(vault.address(), "0xabc");
        assert_eq!(state.collateral, 10.5);
        assert_eq!(state.debt, 0.0);
        assert_eq!(state.cdp_id.as_deref(), Some("42"));
        assert_eq!(state.owner.as_deref(), Some("0xowner"));
        assert_eq!(state.updated_at, Some(1_600_000_000));
        assert_eq!(state.updated_at_block, Some(11_000_000));
    }

    #[test]
    fn test_assemble_snapshot_keeps_first_duplicate() {
        let aggregate: CollateralTypeRecord = serde_json::from_str(
            r#"{"vaultCount": "2", "unmanagedVaultCount": "1",
                "price": {"id": "p", "value": "250.5", "spotPrice": "166.9"},
                "rate": "1.02", "liquidationRatio": "1.5"}"#,
        )
        .unwrap();
        let first: VaultRecord =
            serde_json::from_str(r#"{"id": "0x1-ETH-A", "collateral": "1", "debt": "1"}"#).unwrap();
        let dup: VaultRecord =
            serde_json::from_str(r#"{"id": "0x1-ETH-A", "collateral": "9", "debt": "9"}"#).unwrap();

        let snapshot = assemble_snapshot(7, "ETH-A", Some(&aggregate), 1234, &[first, dup]);
        assert_eq!(snapshot.aggregate.count, 3);
        assert_eq!(snapshot.aggregate.price, 250.5);
        assert_eq!(snapshot.aggregate.liquidation_ratio, 1.5);
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.get("0x1-ETH-A").unwrap().collateral, 1.0);
    }
}
