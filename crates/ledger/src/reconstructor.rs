//! Ledger reconstruction.
//!
//! Turns one vault's unordered, mixed-kind events into a chronological,
//! gap-filled ledger of balances and collateralization ratios.

use crate::carry::{FoldContext, LedgerFold};
use crate::oracle::OracleSeries;
use std::borrow::Cow;
use tracing::{debug, warn};
use vault_core::config::LedgerConfig;
use vault_core::{now_seconds, EntityLedger, Event, Timestamp};
use vault_ingestion::DecodedHistory;

/// Statistics accumulated across reconstructed vaults.
#[derive(Debug, Clone, Default)]
pub struct ReconstructionStats {
    /// Vaults reconstructed.
    pub entities: u64,
    /// Ledger entries produced.
    pub entries: u64,
    /// Raw price updates folded into oracle series.
    pub price_updates_folded: u64,
    /// Entries without a known oracle price.
    pub missing_prices: u64,
    /// Split events matching neither side.
    pub unmatched_splits: u64,
}

impl ReconstructionStats {
    /// Fraction of entries priced at 0 for lack of an oracle update.
    pub fn missing_price_frac(&self) -> f64 {
        if self.entries > 0 {
            self.missing_prices as f64 / self.entries as f64
        } else {
            0.0
        }
    }

    /// Reset statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

type Clock = Box<dyn Fn() -> Timestamp + Send + Sync>;

/// Ledger reconstructor.
pub struct LedgerReconstructor {
    /// Synthetic price sample points per ledger.
    sample_points: usize,
    /// Wall clock used for degenerate price series.
    clock: Clock,
    stats: ReconstructionStats,
}

impl Default for LedgerReconstructor {
    fn default() -> Self {
        Self::new(&LedgerConfig::default())
    }
}

impl LedgerReconstructor {
    /// Create a new reconstructor from configuration.
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            sample_points: config.price_sample_points,
            clock: Box::new(now_seconds),
            stats: ReconstructionStats::default(),
        }
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Reconstruct one vault's ledger.
    ///
    /// Price updates among the vault's events are folded into `oracle`; every
    /// other event yields exactly one entry.
    pub fn reconstruct(&mut self, history: &DecodedHistory, oracle: &OracleSeries) -> EntityLedger {
        let (prices, mut events): (Vec<&Event>, Vec<&Event>) =
            history.events.iter().partition(|e| e.is_price_update());

        let matching = oracle.collateral_type() == history.collateral_type;
        if !matching && !oracle.is_empty() {
            warn!(
                vault = %history.entity_id,
                vault_class = %history.collateral_type,
                oracle_class = oracle.collateral_type(),
                "Oracle series for another collateral class, ignoring"
            );
        }
        let series: Cow<'_, OracleSeries> = match (matching, prices.is_empty()) {
            (true, true) => Cow::Borrowed(oracle),
            (true, false) => Cow::Owned(oracle.merged_with(prices.iter().copied())),
            (false, _) => Cow::Owned(OracleSeries::from_events(
                &history.collateral_type,
                prices.iter().copied(),
            )),
        };

        events.sort_by(|a, b| a.chronological_cmp(b));

        let ctx = FoldContext {
            entity_id: &history.entity_id,
            rate: history.rate,
            oracle: &series,
        };
        let fold = events
            .iter()
            .fold(LedgerFold::with_capacity(events.len()), |acc, event| acc.push(event, &ctx));

        let timestamps: Vec<Timestamp> = fold.entries.iter().map(|e| e.timestamp).collect();
        let price_series = series.sample(&timestamps, self.sample_points, (self.clock)());

        self.stats.entities += 1;
        self.stats.entries += fold.entries.len() as u64;
        self.stats.price_updates_folded += prices.len() as u64;
        self.stats.missing_prices += fold.missing_prices;
        self.stats.unmatched_splits += fold.unmatched_splits;

        debug!(
            vault = %history.entity_id,
            entries = fold.entries.len(),
            price_points = price_series.len(),
            missing_prices = fold.missing_prices,
            "Reconstructed ledger"
        );

        EntityLedger {
            entity_id: history.entity_id.clone(),
            collateral_type: history.collateral_type.clone(),
            rate: history.rate,
            entries: fold.entries,
            price_series,
        }
    }

    /// Get reconstruction statistics.
    pub fn stats(&self) -> &ReconstructionStats {
        &self.stats
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use vault_core::{BalanceChange, EventKind, EventPayload, LedgerEntry, PricePoint};
    use vault_ingestion::{EventDecoder, RawLog, RawNumber, VaultHistoryBundle, VaultRecord};

    const VAULT: &str = "0xabc-ETH-A";

    fn collateral(ts: Timestamp, id: &str, before: f64, after: f64) -> Event {
        Event::new(
            ts,
            id,
            EventPayload::CollateralChange(BalanceChange {
                before: Some(before),
                after: Some(after),
                diff: Some(after - before),
            }),
        )
    }

    fn debt(ts: Timestamp, id: &str, before: f64, after: f64) -> Event {
        Event::new(
            ts,
            id,
            EventPayload::DebtChange(BalanceChange {
                before: Some(before),
                after: Some(after),
                diff: Some(after - before),
            }),
        )
    }

    fn start(ts: Timestamp, auction: &str) -> Event {
        Event::new(
            ts,
            format!("liquidationStartLog-{auction}"),
            EventPayload::LiquidationStart {
                auction_id: auction.to_string(),
            },
        )
    }

    fn finish(ts: Timestamp, auction: &str) -> Event {
        Event::new(
            ts,
            format!("liquidationFinishLog-{auction}"),
            EventPayload::LiquidationFinish {
                auction_id: auction.to_string(),
            },
        )
    }

    fn history(events: Vec<Event>) -> DecodedHistory {
        DecodedHistory {
            entity_id: VAULT.to_string(),
            collateral_type: "ETH-A".to_string(),
            rate: 1.0,
            events,
        }
    }

    fn oracle() -> OracleSeries {
        OracleSeries::from_points(
            "ETH-A",
            vec![PricePoint {
                timestamp: 50,
                value: 200.0,
                spot_price: 133.0,
            }],
        )
    }

    fn reconstructor() -> LedgerReconstructor {
        LedgerReconstructor::default().with_clock(|| 1_000)
    }

    fn lifecycle() -> Vec<Event> {
        vec![
            finish(180, "1"),
            debt(120, "0x2-1", 0.0, 100.0),
            start(150, "1"),
            collateral(100, "0x1-0", 0.0, 10.0),
        ]
    }

    #[test]
    fn test_lifecycle_ledger() {
        let ledger = reconstructor().reconstruct(&history(lifecycle()), &oracle());

        assert_eq!(ledger.len(), 4);
        let kinds: Vec<EventKind> = ledger.entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::CollateralChange,
                EventKind::DebtChange,
                EventKind::LiquidationStart,
                EventKind::LiquidationFinish
            ]
        );

        let first = &ledger.entries[0];
        assert_relative_eq!(first.collateral_after, 10.0);
        assert_eq!(first.pre_ratio, 0.0);
        assert_eq!(first.post_ratio, 0.0);

        let second = &ledger.entries[1];
        assert_relative_eq!(second.collateral_before, 10.0);
        assert_relative_eq!(second.collateral_after, 10.0);
        assert_relative_eq!(second.debt_after, 100.0);
        assert_eq!(second.pre_ratio, 0.0);
        assert_relative_eq!(second.post_ratio, 20.0);

        let started = &ledger.entries[2];
        assert_relative_eq!(started.pre_ratio, 20.0);
        assert_relative_eq!(started.post_ratio, 20.0);

        let closed = &ledger.entries[3];
        assert_eq!(closed.collateral_after, 0.0);
        assert_relative_eq!(closed.collateral_change, -10.0);
        assert_eq!(closed.debt_after, 0.0);
        assert_relative_eq!(closed.debt_change, -100.0);
        assert_eq!(closed.post_ratio, 0.0);
        assert_relative_eq!(closed.oracle_price, 200.0);
        assert_relative_eq!(closed.spot_price, 133.0);

        assert_eq!(ledger.liquidation_starts().collect::<Vec<_>>(), vec![150]);
    }

    fn assert_balances_chain(entries: &[LedgerEntry]) {
        for entry in entries {
            if entry.kind == EventKind::LiquidationFinish {
                assert_eq!(entry.collateral_after, 0.0);
                assert_eq!(entry.collateral_change, -entry.collateral_before);
                assert_eq!(entry.debt_after, 0.0);
                assert_eq!(entry.debt_change, -entry.debt_before);
            } else {
                assert_relative_eq!(
                    entry.collateral_after,
                    entry.collateral_before + entry.collateral_change
                );
                assert_relative_eq!(entry.debt_after, entry.debt_before + entry.debt_change);
            }
        }
        for pair in entries.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_balances_chain() {
        let ledger = reconstructor().reconstruct(&history(lifecycle()), &oracle());
        assert_balances_chain(&ledger.entries);
    }

    #[test]
    fn test_balances_chain_mixed_events() {
        let events = vec![
            Event::new(160, "0x7-0", EventPayload::Creation).with_reported(None, Some(f64::NAN)),
            Event::new(
                120,
                "0x3-0",
                EventPayload::Split {
                    source: "0xabc".to_string(),
                    destination: "0xdef".to_string(),
                    collateral_moved: Some(2.0),
                    debt_moved: None,
                },
            ),
            debt(110, "0x2-0", 0.0, 50.0),
            Event::new(
                130,
                "0x4-0",
                EventPayload::Transfer {
                    previous_owner: Some("0xold".to_string()),
                    next_owner: None,
                },
            ),
            Event::new(140, "0x5-0", EventPayload::CollateralChange(BalanceChange::default())),
            collateral(100, "0x1-0", 0.0, 10.0),
            Event::new(
                150,
                "0x6-0",
                EventPayload::DebtChange(BalanceChange {
                    before: None,
                    after: None,
                    diff: Some(-10.0),
                }),
            ),
        ];
        let ledger = reconstructor().reconstruct(&history(events), &oracle());

        assert_eq!(ledger.len(), 7);
        assert_balances_chain(&ledger.entries);
        for pair in ledger.entries.windows(2) {
            assert_relative_eq!(pair[1].collateral_before, pair[0].collateral_after);
            assert_relative_eq!(pair[1].debt_before, pair[0].debt_after);
        }

        let split = &ledger.entries[2];
        assert_relative_eq!(split.collateral_change, -2.0);
        assert_eq!(split.debt_change, 0.0);
        let malformed = &ledger.entries[4];
        assert_eq!(malformed.collateral_change, 0.0);
        assert_relative_eq!(malformed.collateral_after, 8.0);

        let last = &ledger.entries[6];
        assert_eq!(last.kind, EventKind::Creation);
        assert_relative_eq!(last.collateral_after, 8.0);
        assert_relative_eq!(last.debt_after, 40.0);
        assert_relative_eq!(last.post_ratio, 200.0 * 8.0 / 40.0);
    }

    fn raw(s: &str) -> Option<RawNumber> {
        Some(RawNumber::new(s))
    }

    #[test]
    fn test_log_with_bad_timestamp_keeps_its_entry() {
        let logs = vec![
            RawLog::VaultCollateralChangeLog {
                id: "0xc-2".to_string(),
                transaction: None,
                timestamp: RawNumber::new("300"),
                collateral_diff: raw("5"),
                collateral_after: None,
                collateral_before: None,
            },
            RawLog::VaultDebtChangeLog {
                id: "0xb-1".to_string(),
                transaction: None,
                timestamp: RawNumber::new(""),
                debt_diff: raw("100"),
                debt_after: None,
                debt_before: None,
            },
            RawLog::VaultCollateralChangeLog {
                id: "0xa-0".to_string(),
                transaction: None,
                timestamp: RawNumber::new("100"),
                collateral_diff: raw("10"),
                collateral_after: raw("10"),
                collateral_before: raw("0"),
            },
        ];
        let bundle = VaultHistoryBundle {
            vault: VaultRecord {
                id: VAULT.to_string(),
                cdp_id: None,
                opened_at: None,
                updated_at: None,
                updated_at_block: None,
                updated_at_transaction: None,
                collateral: None,
                debt: None,
                owner: None,
                safety_level: None,
                collateral_type: None,
                logs: logs.clone(),
            },
            sale_auctions: Vec::new(),
            split_logs_as_destination: Vec::new(),
        };

        let mut decoder = EventDecoder::new();
        let decoded = decoder.decode_history(&bundle);
        let ledger = reconstructor().reconstruct(&decoded, &oracle());

        assert_eq!(ledger.len(), logs.len());
        assert_eq!(decoder.stats().malformed_fields, 1);
        let ids: Vec<&str> = ledger.entries.iter().map(|e| e.sequence_id.as_str()).collect();
        assert_eq!(ids, vec!["0xa-0", "0xb-1", "0xc-2"]);

        let last = &ledger.entries[2];
        assert_relative_eq!(last.collateral_after, 15.0);
        assert_relative_eq!(last.debt_after, 100.0);
        assert_balances_chain(&ledger.entries);
    }

    #[test]
    fn test_permutations_give_same_ledger() {
        let mut reconstructor = reconstructor();
        let expected = reconstructor.reconstruct(&history(lifecycle()), &oracle());

        let mut events = lifecycle();
        for _ in 0..events.len() {
            events.rotate_left(1);
            assert_eq!(reconstructor.reconstruct(&history(events.clone()), &oracle()), expected);
        }
        events.reverse();
        assert_eq!(reconstructor.reconstruct(&history(events), &oracle()), expected);
    }

    #[test]
    fn test_same_timestamp_orders_by_sequence_id() {
        let events = vec![
            collateral(100, "0xa-10", 0.0, 1.0),
            collateral(100, "0xb-2", 0.0, 1.0),
            collateral(100, "0xc-2-1", 0.0, 1.0),
            collateral(100, "0xd-2-0", 0.0, 1.0),
            collateral(100, "0xe-3", 0.0, 1.0),
        ];
        let ledger = reconstructor().reconstruct(&history(events), &oracle());
        let order: Vec<&str> = ledger.entries.iter().map(|e| e.sequence_id.as_str()).collect();
        assert_eq!(order, vec!["0xd-2-0", "0xc-2-1", "0xb-2", "0xe-3", "0xa-10"]);
    }

    #[test]
    fn test_price_updates_folded_not_emitted() {
        let mut events = lifecycle();
        events.push(Event::new(
            110,
            "0xp-0",
            EventPayload::OraclePriceUpdate {
                collateral_type: "ETH-A".to_string(),
                new_value: Some(300.0),
                new_spot_price: Some(200.0),
            },
        ));
        let mut reconstructor = reconstructor();
        let ledger = reconstructor.reconstruct(&history(events), &oracle());

        assert_eq!(ledger.len(), 4);
        assert_relative_eq!(ledger.entries[0].oracle_price, 200.0);
        assert_relative_eq!(ledger.entries[1].oracle_price, 300.0);
        assert_relative_eq!(ledger.entries[1].post_ratio, 30.0);
        assert_eq!(reconstructor.stats().price_updates_folded, 1);
    }

    #[test]
    fn test_no_oracle_prices_default_to_zero() {
        let mut reconstructor = reconstructor();
        let ledger = reconstructor.reconstruct(&history(lifecycle()), &OracleSeries::new("ETH-A"));

        assert!(ledger.entries.iter().all(|e| e.oracle_price == 0.0 && e.post_ratio == 0.0));
        assert!(ledger.price_series.is_empty());
        assert_eq!(reconstructor.stats().missing_prices, 4);
        assert_relative_eq!(reconstructor.stats().missing_price_frac(), 1.0);
    }

    #[test]
    fn test_foreign_oracle_ignored() {
        let foreign = OracleSeries::from_points(
            "WBTC-A",
            vec![PricePoint {
                timestamp: 0,
                value: 9000.0,
                spot_price: 6000.0,
            }],
        );
        let ledger = reconstructor().reconstruct(&history(lifecycle()), &foreign);
        assert!(ledger.entries.iter().all(|e| e.oracle_price == 0.0));
    }

    #[test]
    fn test_price_series_sampled_and_unique() {
        let ledger = reconstructor().reconstruct(&history(lifecycle()), &oracle());
        let timestamps: Vec<Timestamp> = ledger.price_series.iter().map(|p| p.timestamp).collect();

        assert_eq!(timestamps.first(), Some(&100));
        assert_eq!(timestamps.last(), Some(&180));
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert!(timestamps.contains(&120));
        assert!(timestamps.contains(&150));
    }

    #[test]
    fn test_single_event_uses_clock() {
        let events = vec![collateral(100, "0x1-0", 0.0, 1.0)];
        let ledger = reconstructor().reconstruct(&history(events), &oracle());
        let timestamps: Vec<Timestamp> = ledger.price_series.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![100, 1_000]);
    }

    #[test]
    fn test_empty_history() {
        let mut reconstructor = reconstructor();
        let ledger = reconstructor.reconstruct(&history(Vec::new()), &oracle());
        assert!(ledger.is_empty());
        assert_eq!(reconstructor.stats().entities, 1);
    }
}
