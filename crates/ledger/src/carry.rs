//! Carry-forward fold over chronologically sorted events.
//!
//! Each event contributes a collateral side and a debt side. A side may carry
//! explicit before/after values (change logs) or only a change (splits,
//! transfers, the generic delta rule). Missing values are filled from the
//! previous entry's after-values.

use crate::oracle::OracleSeries;
use crate::ratio::collateralization_ratio;
use vault_core::{BalanceChange, Event, EventKind, EventPayload, LedgerEntry, ReportedBalance};

/// Per-vault inputs that stay fixed during the fold.
#[derive(Debug, Clone, Copy)]
pub struct FoldContext<'a> {
    pub entity_id: &'a str,
    pub rate: f64,
    pub oracle: &'a OracleSeries,
}

/// One balance side of an event before carry-forward.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Side {
    before: Option<f64>,
    after: Option<f64>,
    change: f64,
}

impl Side {
    fn delta(change: f64) -> Self {
        Self {
            change,
            ..Self::default()
        }
    }

    fn explicit(change: &BalanceChange) -> Self {
        let derived = match (change.before, change.after) {
            (Some(before), Some(after)) => Some(after - before),
            _ => None,
        };
        Self {
            before: change.before,
            after: change.after,
            change: change.diff.or(derived).unwrap_or(0.0),
        }
    }
}

/// Resolved (before, after, change) for one side.
#[derive(Debug, Clone, Copy)]
struct Resolved {
    before: f64,
    after: f64,
    change: f64,
}

/// Accumulator threaded through the fold.
#[derive(Debug, Default)]
pub struct LedgerFold {
    pub entries: Vec<LedgerEntry>,
    collateral: f64,
    debt: f64,
    price: Option<(f64, f64)>,
    previous_reported: Option<ReportedBalance>,
    /// Entries without any known oracle price.
    pub missing_prices: u64,
    /// Splits naming neither side as this vault.
    pub unmatched_splits: u64,
}

impl LedgerFold {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Fold one event into the ledger.
    pub fn push(mut self, event: &Event, ctx: &FoldContext<'_>) -> Self {
        self.apply(event, ctx);
        self
    }

    fn apply(&mut self, event: &Event, ctx: &FoldContext<'_>) {
        let index = self.entries.len();
        let (collateral_side, debt_side) = self.sides(event, index, ctx);
        let closes = event.kind() == EventKind::LiquidationFinish;
        let collateral = Self::resolve(collateral_side, self.collateral, closes);
        let debt = Self::resolve(debt_side, self.debt, closes);

        let price = ctx
            .oracle
            .latest_at(event.timestamp)
            .map(|p| (p.value, p.spot_price))
            .or(self.price);
        if price.is_none() {
            self.missing_prices += 1;
        }
        let (oracle_price, spot_price) = price.unwrap_or((0.0, 0.0));

        let (pre_ratio, post_ratio) = if index == 0 {
            (0.0, 0.0)
        } else {
            (
                collateralization_ratio(oracle_price, collateral.before, debt.before, ctx.rate),
                collateralization_ratio(oracle_price, collateral.after, debt.after, ctx.rate),
            )
        };

        self.entries.push(LedgerEntry {
            timestamp: event.timestamp,
            kind: event.kind(),
            sequence_id: event.sequence_id.clone(),
            collateral_before: collateral.before,
            collateral_after: collateral.after,
            collateral_change: collateral.change,
            debt_before: debt.before,
            debt_after: debt.after,
            debt_change: debt.change,
            oracle_price,
            spot_price,
            pre_ratio,
            post_ratio,
        });

        self.collateral = collateral.after;
        self.debt = debt.after;
        self.price = price;
        self.previous_reported = Some(event.reported);
    }

    /// Fill a side from the carried balance.
    ///
    /// A settled auction zeroes the vault. An explicit after-value fixes the
    /// change so that `after == before + change` always holds.
    fn resolve(side: Side, carried: f64, closes: bool) -> Resolved {
        let before = side.before.unwrap_or(carried);
        if closes {
            return Resolved {
                before,
                after: 0.0,
                change: -before,
            };
        }
        match side.after {
            Some(after) => Resolved {
                before,
                after,
                change: after - before,
            },
            None => Resolved {
                before,
                after: before + side.change,
                change: side.change,
            },
        }
    }

    fn sides(&mut self, event: &Event, index: usize, ctx: &FoldContext<'_>) -> (Side, Side) {
        match &event.payload {
            EventPayload::CollateralChange(change) => (
                Side::explicit(change),
                self.reported_delta(event, index, Field::Debt),
            ),
            EventPayload::DebtChange(change) => (
                self.reported_delta(event, index, Field::Collateral),
                Side::explicit(change),
            ),
            EventPayload::Split {
                source,
                destination,
                collateral_moved,
                debt_moved,
            } => {
                let sign = if !source.is_empty() && ctx.entity_id.contains(source.as_str()) {
                    -1.0
                } else if !destination.is_empty() && ctx.entity_id.contains(destination.as_str()) {
                    1.0
                } else {
                    self.unmatched_splits += 1;
                    0.0
                };
                (
                    Side::delta(sign * collateral_moved.unwrap_or(0.0)),
                    Side::delta(sign * debt_moved.unwrap_or(0.0)),
                )
            }
            EventPayload::Transfer { .. } => (Side::delta(0.0), Side::delta(0.0)),
            EventPayload::Creation
            | EventPayload::LiquidationStart { .. }
            | EventPayload::LiquidationFinish { .. }
            | EventPayload::OraclePriceUpdate { .. } => (
                self.reported_delta(event, index, Field::Collateral),
                self.reported_delta(event, index, Field::Debt),
            ),
        }
    }

    /// Difference of a reported balance against the preceding event.
    ///
    /// Applies from the third entry on; anything not computable is 0.
    fn reported_delta(&self, event: &Event, index: usize, field: Field) -> Side {
        if index <= 1 {
            return Side::delta(0.0);
        }
        let current = field.of(&event.reported);
        let previous = self.previous_reported.as_ref().and_then(|r| field.of(r));
        let delta = match (current, previous) {
            (Some(current), Some(previous)) => current - previous,
            _ => 0.0,
        };
        Side::delta(if delta.is_finite() { delta } else { 0.0 })
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Collateral,
    Debt,
}

impl Field {
    fn of(self, reported: &ReportedBalance) -> Option<f64> {
        match self {
            Field::Collateral => reported.collateral,
            Field::Debt => reported.debt,
        }
    }
}
