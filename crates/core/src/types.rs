//! Core data types for the vault-history pipeline.

use crate::sequence::SequenceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unix timestamp in seconds (UTC), as reported by the subgraph.
pub type Timestamp = i64;

/// Block height at which a snapshot was captured.
pub type Checkpoint = u64;

/// Current wall-clock time in seconds.
#[inline]
pub fn now_seconds() -> Timestamp {
    Utc::now().timestamp()
}

/// Render a timestamp for log output.
pub fn ts_to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// Discriminant of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Creation,
    CollateralChange,
    DebtChange,
    Transfer,
    Split,
    LiquidationStart,
    LiquidationFinish,
    OraclePriceUpdate,
}

impl EventKind {
    /// Ordering rank among events sharing a timestamp.
    ///
    /// Auction pseudo-events follow the vault's own logs, and a start
    /// precedes a finish.
    #[inline]
    pub fn merge_rank(self) -> u8 {
        match self {
            EventKind::LiquidationStart => 1,
            EventKind::LiquidationFinish => 2,
            _ => 0,
        }
    }
}

/// Explicit before/after/diff triple carried by a change log.
///
/// `None` means the field was missing or not a number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub before: Option<f64>,
    pub after: Option<f64>,
    pub diff: Option<f64>,
}

/// Raw collateral/debt balances a generic log may report about its vault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportedBalance {
    pub collateral: Option<f64>,
    pub debt: Option<f64>,
}

/// Kind-specific event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    /// Vault opened.
    Creation,
    /// Collateral locked or freed.
    CollateralChange(BalanceChange),
    /// Debt drawn or repaid.
    DebtChange(BalanceChange),
    /// Ownership moved; balances untouched.
    Transfer {
        previous_owner: Option<String>,
        next_owner: Option<String>,
    },
    /// Collateral and debt moved between two vault addresses.
    Split {
        source: String,
        destination: String,
        collateral_moved: Option<f64>,
        debt_moved: Option<f64>,
    },
    /// Collateral auction started.
    LiquidationStart { auction_id: String },
    /// Collateral auction settled; the vault is closed out.
    LiquidationFinish { auction_id: String },
    /// Oracle price poke for a collateral class.
    OraclePriceUpdate {
        collateral_type: String,
        new_value: Option<f64>,
        new_spot_price: Option<f64>,
    },
}

/// A single vault event, already decoded from its wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Block timestamp (seconds).
    pub timestamp: Timestamp,
    /// Log id used to order events within a timestamp.
    pub sequence_id: SequenceId,
    /// Raw balances reported alongside the log, if any.
    #[serde(default)]
    pub reported: ReportedBalance,
    /// Kind-specific data.
    pub payload: EventPayload,
}

impl Event {
    /// Create an event without reported balances.
    pub fn new(
        timestamp: Timestamp,
        sequence_id: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            timestamp,
            sequence_id: SequenceId::new(sequence_id),
            reported: ReportedBalance::default(),
            payload,
        }
    }

    /// Attach reported balances.
    pub fn with_reported(mut self, collateral: Option<f64>, debt: Option<f64>) -> Self {
        self.reported = ReportedBalance { collateral, debt };
        self
    }

    /// Event discriminant.
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Creation => EventKind::Creation,
            EventPayload::CollateralChange(_) => EventKind::CollateralChange,
            EventPayload::DebtChange(_) => EventKind::DebtChange,
            EventPayload::Transfer { .. } => EventKind::Transfer,
            EventPayload::Split { .. } => EventKind::Split,
            EventPayload::LiquidationStart { .. } => EventKind::LiquidationStart,
            EventPayload::LiquidationFinish { .. } => EventKind::LiquidationFinish,
            EventPayload::OraclePriceUpdate { .. } => EventKind::OraclePriceUpdate,
        }
    }

    /// Is this a raw oracle price update?
    #[inline]
    pub fn is_price_update(&self) -> bool {
        matches!(self.payload, EventPayload::OraclePriceUpdate { .. })
    }

    /// Chronological ordering: timestamp, merge rank, then sequence id.
    pub fn chronological_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.kind().merge_rank().cmp(&other.kind().merge_rank()))
            .then_with(|| self.sequence_id.cmp(&other.sequence_id))
    }
}

/// One reconstructed ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: Timestamp,
    pub kind: EventKind,
    pub sequence_id: SequenceId,
    pub collateral_before: f64,
    pub collateral_after: f64,
    pub collateral_change: f64,
    pub debt_before: f64,
    pub debt_after: f64,
    pub debt_change: f64,
    /// Oracle price in effect at this entry (0 if none known yet).
    pub oracle_price: f64,
    /// Spot price in effect at this entry (0 if none known yet).
    pub spot_price: f64,
    /// Collateralization ratio before the event.
    pub pre_ratio: f64,
    /// Collateralization ratio after the event.
    pub post_ratio: f64,
}

/// Oracle price sampled at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: Timestamp,
    pub value: f64,
    pub spot_price: f64,
}

/// Chronological balance history of one vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLedger {
    /// Vault id (`address-ilk`).
    pub entity_id: String,
    /// Collateral class (ilk).
    pub collateral_type: String,
    /// Stability rate used in ratio computation.
    pub rate: f64,
    /// Entries in ascending chronological order.
    pub entries: Vec<LedgerEntry>,
    /// Oracle price series, ascending and unique by timestamp.
    pub price_series: Vec<PricePoint>,
}

impl EntityLedger {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamps of every liquidation start, in ledger order.
    pub fn liquidation_starts(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.entries
            .iter()
            .filter(|e| e.kind == EventKind::LiquidationStart)
            .map(|e| e.timestamp)
    }
}

/// Point-in-time vault state inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: String,
    pub collateral: f64,
    pub debt: f64,
    pub cdp_id: Option<String>,
    pub owner: Option<String>,
    pub updated_at: Option<Timestamp>,
    pub updated_at_block: Option<Checkpoint>,
    pub updated_at_transaction: Option<String>,
    pub safety_level: Option<String>,
}

impl EntityState {
    /// Strictly above both thresholds.
    #[inline]
    pub fn is_active(&self, min_collateral: f64, min_debt: f64) -> bool {
        self.collateral > min_collateral && self.debt > min_debt
    }
}

/// Collateral-class aggregate captured with a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointAggregate {
    pub collateral_type: String,
    /// Block timestamp of the checkpoint.
    pub timestamp: Timestamp,
    pub price: f64,
    pub rate: f64,
    pub liquidation_ratio: f64,
    /// Vault count reported by the collateral class.
    pub count: u64,
}

/// Immutable set of vault states at one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub checkpoint: Checkpoint,
    pub aggregate: CheckpointAggregate,
    pub entities: BTreeMap<String, EntityState>,
}

impl Snapshot {
    /// Checkpoint timestamp.
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.aggregate.timestamp
    }

    /// Look up a vault by id.
    pub fn get(&self, id: &str) -> Option<&EntityState> {
        self.entities.get(id)
    }

    /// Metadata for transition records.
    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            checkpoint: self.checkpoint,
            timestamp: self.aggregate.timestamp,
            price: self.aggregate.price,
            rate: self.aggregate.rate,
            liquidation_ratio: self.aggregate.liquidation_ratio,
        }
    }
}

/// Market context at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub checkpoint: Checkpoint,
    pub timestamp: Timestamp,
    pub price: f64,
    pub rate: f64,
    pub liquidation_ratio: f64,
}

/// Before/after state of one vault across a checkpoint pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTransition {
    pub first: EntityState,
    /// `None` when the vault is missing from the second snapshot.
    pub second: Option<EntityState>,
    pub liquidated: bool,
    pub liquidation_timestamp: Option<Timestamp>,
}

/// One labeled row of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Zero-based index of the checkpoint pair.
    pub pair_index: usize,
    pub first: CheckpointMeta,
    pub second: CheckpointMeta,
    pub per_entity: BTreeMap<String, EntityTransition>,
}

impl TransitionRecord {
    /// Number of vaults labeled liquidated.
    pub fn liquidated_count(&self) -> usize {
        self.per_entity.values().filter(|t| t.liquidated).count()
    }
}
