//! Decoding of subgraph wire records into typed events.
//!
//! Vault logs, auction records and oracle pokes arrive in different shapes.
//! The decoder maps each onto an [`Event`], counting every field it had to
//! give up on instead of failing the whole vault.

use crate::records::{PriceUpdateLog, RawLog, RawNumber, SaleAuction, VaultHistoryBundle};
use std::collections::HashSet;
use tracing::{debug, warn};
use vault_core::{BalanceChange, Error, Event, EventPayload, Result, Timestamp};

/// Statistics about decoding quality.
#[derive(Debug, Clone, Default)]
pub struct DecodeStats {
    /// Vault logs decoded into events.
    pub logs: u64,
    /// Liquidation pseudo-events synthesized from auctions.
    pub auction_events: u64,
    /// Oracle price updates decoded.
    pub price_updates: u64,
    /// Numeric fields that were present but not numbers.
    pub malformed_fields: u64,
    /// Logs with an unrecognized `__typename`.
    pub unknown_kinds: u64,
    /// Price updates dropped because their timestamp was unusable.
    pub rejected: u64,
    /// Logs seen twice (e.g., a split listed under both vaults).
    pub duplicates: u64,
}

impl DecodeStats {
    /// Fraction of decoded records that had at least one bad field.
    pub fn malformed_frac(&self) -> f64 {
        let total = self.logs + self.price_updates;
        if total > 0 {
            self.malformed_fields as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Reset statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One vault's events, ready for ledger reconstruction.
#[derive(Debug, Clone)]
pub struct DecodedHistory {
    pub entity_id: String,
    pub collateral_type: String,
    pub rate: f64,
    /// Unordered events, including auction pseudo-events.
    pub events: Vec<Event>,
}

/// Stateful decoder that accumulates [`DecodeStats`].
#[derive(Debug, Default)]
pub struct EventDecoder {
    stats: DecodeStats,
    /// Timestamp of the last log decoded, used in place of an unusable one.
    last_log_timestamp: Timestamp,
}

impl EventDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a required timestamp.
    fn timestamp(&mut self, id: &str, raw: &RawNumber) -> Result<Timestamp> {
        raw.to_i64().ok_or_else(|| {
            self.stats.rejected += 1;
            Error::decode(format!("log {id}: timestamp {:?} is not an integer", raw.as_str()))
        })
    }

    /// Parse a log timestamp, falling back to the previous log's.
    ///
    /// A vault log is never dropped: its balance change still has to be
    /// carried through the ledger.
    fn log_timestamp(&mut self, id: &str, raw: &RawNumber) -> Timestamp {
        match raw.to_i64() {
            Some(ts) => {
                self.last_log_timestamp = ts;
                ts
            }
            None => {
                self.stats.malformed_fields += 1;
                warn!(
                    log = id,
                    value = raw.as_str(),
                    fallback = self.last_log_timestamp,
                    "Malformed timestamp, using previous log's"
                );
                self.last_log_timestamp
            }
        }
    }

    /// Parse an optional numeric field; malformed values become `None`.
    fn number(&mut self, id: &str, field: &'static str, raw: Option<&RawNumber>) -> Option<f64> {
        let raw = raw?;
        let parsed = raw.to_f64();
        if parsed.is_none() {
            self.stats.malformed_fields += 1;
            warn!(log = id, field, value = raw.as_str(), "Malformed numeric field");
        }
        parsed
    }

    fn change(
        &mut self,
        id: &str,
        diff: Option<&RawNumber>,
        after: Option<&RawNumber>,
        before: Option<&RawNumber>,
    ) -> BalanceChange {
        BalanceChange {
            diff: self.number(id, "diff", diff),
            after: self.number(id, "after", after),
            before: self.number(id, "before", before),
        }
    }

    /// Decode a single vault log.
    ///
    /// Returns `None` for unknown log kinds.
    pub fn decode_log(&mut self, log: &RawLog) -> Option<Event> {
        let event = match log {
            RawLog::VaultCreationLog { id, timestamp, .. } => {
                let ts = self.log_timestamp(id, timestamp);
                Event::new(ts, id.as_str(), EventPayload::Creation)
            }
            RawLog::VaultCollateralChangeLog {
                id,
                timestamp,
                collateral_diff,
                collateral_after,
                collateral_before,
                ..
            } => {
                let ts = self.log_timestamp(id, timestamp);
                let change = self.change(
                    id,
                    collateral_diff.as_ref(),
                    collateral_after.as_ref(),
                    collateral_before.as_ref(),
                );
                Event::new(ts, id.as_str(), EventPayload::CollateralChange(change))
            }
            RawLog::VaultDebtChangeLog {
                id,
                timestamp,
                debt_diff,
                debt_after,
                debt_before,
                ..
            } => {
                let ts = self.log_timestamp(id, timestamp);
                let change = self.change(
                    id,
                    debt_diff.as_ref(),
                    debt_after.as_ref(),
                    debt_before.as_ref(),
                );
                Event::new(ts, id.as_str(), EventPayload::DebtChange(change))
            }
            RawLog::VaultTransferChangeLog {
                id,
                timestamp,
                previous_owner,
                next_owner,
                ..
            } => {
                let ts = self.log_timestamp(id, timestamp);
                Event::new(
                    ts,
                    id.as_str(),
                    EventPayload::Transfer {
                        previous_owner: previous_owner.as_ref().map(|o| o.id().to_string()),
                        next_owner: next_owner.as_ref().map(|o| o.id().to_string()),
                    },
                )
            }
            RawLog::VaultSplitChangeLog {
                id,
                timestamp,
                dst,
                src,
                collateral_to_move,
                debt_to_move,
                ..
            } => {
                let ts = self.log_timestamp(id, timestamp);
                Event::new(
                    ts,
                    id.as_str(),
                    EventPayload::Split {
                        source: src.clone(),
                        destination: dst.clone(),
                        collateral_moved: self.number(
                            id,
                            "collateralToMove",
                            collateral_to_move.as_ref(),
                        ),
                        debt_moved: self.number(id, "debtToMove", debt_to_move.as_ref()),
                    },
                )
            }
            RawLog::Unknown => {
                self.stats.unknown_kinds += 1;
                return None;
            }
        };
        self.stats.logs += 1;
        Some(event)
    }

    /// Liquidation pseudo-events for an auction.
    ///
    /// A start is emitted when `startedAt` is present and non-zero, a finish
    /// when `boughtAt` is present and non-zero.
    pub fn decode_auction(&mut self, auction: &SaleAuction) -> Vec<Event> {
        let mut events = Vec::with_capacity(2);
        let nonzero = |raw: &Option<RawNumber>| {
            raw.as_ref()
                .and_then(RawNumber::to_i64)
                .filter(|t| *t != 0)
        };

        if let Some(started_at) = nonzero(&auction.started_at) {
            events.push(Event::new(
                started_at,
                format!("liquidationStartLog-{}", auction.id),
                EventPayload::LiquidationStart {
                    auction_id: auction.id.clone(),
                },
            ));
        }
        if let Some(bought_at) = nonzero(&auction.bought_at) {
            events.push(Event::new(
                bought_at,
                format!("liquidationFinishLog-{}", auction.id),
                EventPayload::LiquidationFinish {
                    auction_id: auction.id.clone(),
                },
            ));
        }
        self.stats.auction_events += events.len() as u64;
        events
    }

    /// Decode an oracle price update for a collateral class.
    pub fn decode_price_update(
        &mut self,
        collateral_type: &str,
        log: &PriceUpdateLog,
    ) -> Result<Event> {
        let ts = self.timestamp(&log.id, &log.timestamp)?;
        let collateral_type = log
            .collateral
            .as_ref()
            .map(|c| c.id().to_string())
            .unwrap_or_else(|| collateral_type.to_string());
        let event = Event::new(
            ts,
            log.id.as_str(),
            EventPayload::OraclePriceUpdate {
                collateral_type,
                new_value: self.number(&log.id, "newValue", log.new_value.as_ref()),
                new_spot_price: self.number(&log.id, "newSpotPrice", log.new_spot_price.as_ref()),
            },
        );
        self.stats.price_updates += 1;
        Ok(event)
    }

    /// Decode a batch of price updates, skipping unusable ones.
    pub fn decode_price_updates(
        &mut self,
        collateral_type: &str,
        logs: &[PriceUpdateLog],
    ) -> Vec<Event> {
        logs.iter()
            .filter_map(|log| match self.decode_price_update(collateral_type, log) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Skipping price update");
                    None
                }
            })
            .collect()
    }

    /// Decode everything fetched for one vault.
    ///
    /// Own logs and destination split logs are merged; a log listed in both
    /// is kept once.
    pub fn decode_history(&mut self, bundle: &VaultHistoryBundle) -> DecodedHistory {
        let vault = &bundle.vault;
        let (collateral_type, rate) = match &vault.collateral_type {
            Some(ct) => (
                ct.id.clone(),
                self.number(&vault.id, "rate", ct.rate.as_ref()).unwrap_or(0.0),
            ),
            None => (ilk_of(&vault.id).to_string(), 0.0),
        };

        self.last_log_timestamp = 0;
        let mut seen = HashSet::new();
        let mut events =
            Vec::with_capacity(vault.logs.len() + bundle.split_logs_as_destination.len());
        for log in vault.logs.iter().chain(&bundle.split_logs_as_destination) {
            if let Some(id) = log.id() {
                if !seen.insert(id.to_string()) {
                    self.stats.duplicates += 1;
                    continue;
                }
            }
            match self.decode_log(log) {
                Some(event) => events.push(event),
                None => debug!(vault = %vault.id, "Skipping unknown log kind"),
            }
        }
        for auction in &bundle.sale_auctions {
            events.extend(self.decode_auction(auction));
        }

        debug!(
            vault = %vault.id,
            events = events.len(),
            auctions = bundle.sale_auctions.len(),
            "Decoded vault history"
        );

        DecodedHistory {
            entity_id: vault.id.clone(),
            collateral_type,
            rate,
            events,
        }
    }

    /// Get decoding statistics.
    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

/// Ilk part of an `address-ilk` vault id (`0xabc-ETH-A` -> `ETH-A`).
pub fn ilk_of(vault_id: &str) -> &str {
    vault_id.split_once('-').map(|(_, ilk)| ilk).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{CollateralTypeRef, VaultRecord};
    use vault_core::EventKind;

    fn num(s: &str) -> Option<RawNumber> {
        Some(RawNumber::new(s))
    }

    fn auction(id: &str, started_at: Option<&str>, bought_at: Option<&str>) -> SaleAuction {
        SaleAuction {
            id: id.to_string(),
            vault: None,
            amount_dai_to_raise: None,
            amount_collateral_to_sell: None,
            bought_at: bought_at.map(RawNumber::new),
            is_active: None,
            started_at: started_at.map(RawNumber::new),
            reseted_at: None,
            updated_at: None,
        }
    }

    fn split(id: &str, ts: &str) -> RawLog {
        RawLog::VaultSplitChangeLog {
            id: id.to_string(),
            transaction: None,
            timestamp: RawNumber::new(ts),
            dst: "0xdst".to_string(),
            src: "0xsrc".to_string(),
            collateral_to_move: num("1.5"),
            debt_to_move: num("100"),
            block: None,
        }
    }

    #[test]
    fn test_decode_collateral_change() {
        let mut decoder = EventDecoder::new();
        let log = RawLog::VaultCollateralChangeLog {
            id: "0xa-3".to_string(),
            transaction: None,
            timestamp: RawNumber::new("100"),
            collateral_diff: num("2.5"),
            collateral_after: num("7.5"),
            collateral_before: num("5"),
        };
        let event = decoder.decode_log(&log).unwrap();
        assert_eq!(event.timestamp, 100);
        match event.payload {
            EventPayload::CollateralChange(change) => {
                assert_eq!(change.diff, Some(2.5));
                assert_eq!(change.after, Some(7.5));
                assert_eq!(change.before, Some(5.0));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decoder.stats().logs, 1);
    }

    #[test]
    fn test_malformed_field_degrades_to_none() {
        let mut decoder = EventDecoder::new();
        let log = RawLog::VaultDebtChangeLog {
            id: "0xa-4".to_string(),
            transaction: None,
            timestamp: RawNumber::new("100"),
            debt_diff: num("not-a-number"),
            debt_after: None,
            debt_before: None,
        };
        let event = decoder.decode_log(&log).unwrap();
        assert_eq!(event.payload, EventPayload::DebtChange(BalanceChange::default()));
        assert_eq!(decoder.stats().malformed_fields, 1);
    }

    #[test]
    fn test_bad_log_timestamp_uses_previous() {
        let mut decoder = EventDecoder::new();
        let first = RawLog::VaultCreationLog {
            id: "0xa-0".to_string(),
            transaction: None,
            timestamp: RawNumber::new("120"),
        };
        let bad = RawLog::VaultCreationLog {
            id: "0xa-1".to_string(),
            transaction: None,
            timestamp: RawNumber::new("yesterday"),
        };
        assert_eq!(decoder.decode_log(&bad).unwrap().timestamp, 0);
        assert_eq!(decoder.decode_log(&first).unwrap().timestamp, 120);
        assert_eq!(decoder.decode_log(&bad).unwrap().timestamp, 120);

        assert_eq!(decoder.stats().logs, 3);
        assert_eq!(decoder.stats().malformed_fields, 2);
        assert_eq!(decoder.stats().rejected, 0);
    }

    #[test]
    fn test_bad_price_update_timestamp_rejected() {
        let mut decoder = EventDecoder::new();
        let log = PriceUpdateLog {
            id: "0xp-0".to_string(),
            timestamp: RawNumber::new(""),
            collateral: None,
            new_value: num("200"),
            new_spot_price: None,
        };
        assert!(decoder.decode_price_update("ETH-A", &log).is_err());
        assert!(decoder.decode_price_updates("ETH-A", &[log]).is_empty());
        assert_eq!(decoder.stats().rejected, 2);
    }

    #[test]
    fn test_unknown_kind_skipped() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.decode_log(&RawLog::Unknown).is_none());
        assert_eq!(decoder.stats().unknown_kinds, 1);
    }

    #[test]
    fn test_auction_pseudo_events() {
        let mut decoder = EventDecoder::new();

        let settled = decoder.decode_auction(&auction("12", Some("150"), Some("180")));
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[0].kind(), EventKind::LiquidationStart);
        assert_eq!(settled[0].timestamp, 150);
        assert_eq!(settled[1].kind(), EventKind::LiquidationFinish);
        assert_eq!(settled[1].timestamp, 180);

        let running = decoder.decode_auction(&auction("13", Some("200"), Some("0")));
        assert_eq!(running.len(), 1);

        let empty = decoder.decode_auction(&auction("14", None, None));
        assert!(empty.is_empty());
        assert_eq!(decoder.stats().auction_events, 3);
    }

    #[test]
    fn test_history_dedups_split_logs() {
        let mut decoder = EventDecoder::new();
        let bundle = VaultHistoryBundle {
            vault: VaultRecord {
                id: "0xdst-ETH-A".to_string(),
                cdp_id: None,
                opened_at: None,
                updated_at: None,
                updated_at_block: None,
                updated_at_transaction: None,
                collateral: None,
                debt: None,
                owner: None,
                safety_level: None,
                collateral_type: Some(CollateralTypeRef {
                    id: "ETH-A".to_string(),
                    rate: num("1.05"),
                }),
                logs: vec![split("0xs-1", "100")],
            },
            sale_auctions: vec![auction("1", Some("300"), None)],
            split_logs_as_destination: vec![split("0xs-1", "100"), split("0xs-2", "200")],
        };

        let history = decoder.decode_history(&bundle);
        assert_eq!(history.entity_id, "0xdst-ETH-A");
        assert_eq!(history.collateral_type, "ETH-A");
        assert!((history.rate - 1.05).abs() < 1e-12);
        assert_eq!(history.events.len(), 3);
        assert_eq!(decoder.stats().duplicates, 1);
    }

    #[test]
    fn test_history_keeps_log_with_bad_timestamp() {
        let mut decoder = EventDecoder::new();
        let debt = RawLog::VaultDebtChangeLog {
            id: "0xb-1".to_string(),
            transaction: None,
            timestamp: RawNumber::new(""),
            debt_diff: num("50"),
            debt_after: None,
            debt_before: None,
        };
        let bundle = VaultHistoryBundle {
            vault: VaultRecord {
                id: "0xsrc-ETH-A".to_string(),
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
                logs: vec![split("0xs-2", "200"), debt, split("0xs-1", "100")],
            },
            sale_auctions: Vec::new(),
            split_logs_as_destination: Vec::new(),
        };

        let history = decoder.decode_history(&bundle);
        assert_eq!(history.events.len(), 3);
        assert_eq!(history.events[1].timestamp, 200);
        assert_eq!(decoder.stats().malformed_fields, 1);
    }

    #[test]
    fn test_price_update_defaults_class() {
        let mut decoder = EventDecoder::new();
        let log = PriceUpdateLog {
            id: "0xp-1".to_string(),
            timestamp: RawNumber::new("500"),
            collateral: None,
            new_value: num("210.5"),
            new_spot_price: num("140.3"),
        };
        let event = decoder.decode_price_update("ETH-A", &log).unwrap();
        assert!(event.is_price_update());
        match event.payload {
            EventPayload::OraclePriceUpdate {
                collateral_type,
                new_value,
                ..
            } => {
                assert_eq!(collateral_type, "ETH-A");
                assert_eq!(new_value, Some(210.5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ilk_of() {
        assert_eq!(ilk_of("0xabc-ETH-A"), "ETH-A");
        assert_eq!(ilk_of("0xabc"), "");
    }
}
