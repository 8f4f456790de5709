//! Pipeline steps behind each subcommand.
//!
//! Fetching steps are generic over [`VaultSource`]; offline steps only touch
//! the [`DataStore`].

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use vault_core::config::{LabelerConfig, LedgerConfig};
use vault_core::{ts_to_datetime, Checkpoint, EntityLedger, Result};
use vault_ingestion::{DataStore, EventDecoder, SnapshotSet, VaultSource};
use vault_labeler::{JsonBatchSink, LabelingSummary, LiquidationWindowIndex, TransitionLabeler};
use vault_ledger::{LedgerReconstructor, OracleSeries, ReconstructionStats};

/// Outcome of a history fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryReport {
    pub fetched: usize,
    pub skipped: usize,
    pub price_updates: usize,
}

/// Fetch and persist every vault id.
pub async fn fetch_ids<S: VaultSource>(source: &S, store: &DataStore) -> Result<usize> {
    let ids = source.fetch_vault_ids().await?;
    store.save_vault_ids(&ids)?;
    Ok(ids.len())
}

/// Count vaults with collateral and debt per collateral type.
pub async fn count_active<S: VaultSource>(
    source: &S,
    collateral_types: &[String],
) -> Result<BTreeMap<String, usize>> {
    let mut counts = BTreeMap::new();
    for collateral_type in collateral_types {
        let vaults = source.fetch_active_vaults(collateral_type).await?;
        info!(collateral_type = %collateral_type, active = vaults.len(), "Active vaults");
        counts.insert(collateral_type.clone(), vaults.len());
    }
    Ok(counts)
}

/// Fetch the history of every stored vault id, then the oracle price
/// updates of each collateral type.
///
/// Vaults that cannot be found are skipped; remote failures that survive
/// retrying stop the run.
pub async fn fetch_histories<S: VaultSource>(
    source: &S,
    store: &DataStore,
    collateral_types: &[String],
    limit: Option<usize>,
) -> Result<HistoryReport> {
    let ids = store.load_vault_ids()?;
    let total = limit.map_or(ids.len(), |limit| limit.min(ids.len()));
    let mut report = HistoryReport::default();
    let mut histories = BTreeMap::new();

    for (i, id) in ids.iter().take(total).enumerate() {
        match source.fetch_vault_history(id).await {
            Ok(bundle) => {
                debug!(index = i, vault = %id, logs = bundle.vault.logs.len(), "Fetched history");
                histories.insert(id.clone(), bundle);
                report.fetched += 1;
            }
            Err(e) if !e.is_transient() => {
                warn!(vault = %id, error = %e, "Skipping vault");
                report.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    store.save_histories(&histories)?;

    for collateral_type in collateral_types {
        let updates = source.fetch_price_updates(collateral_type).await?;
        report.price_updates += updates.len();
        store.save_price_updates(collateral_type, &updates)?;
    }

    info!(
        fetched = report.fetched,
        skipped = report.skipped,
        price_updates = report.price_updates,
        "Saved vault histories"
    );
    Ok(report)
}

/// Decode stored histories and reconstruct every ledger.
pub fn build_ledgers(store: &DataStore, config: &LedgerConfig) -> Result<ReconstructionStats> {
    let histories = store.load_histories()?;
    let mut decoder = EventDecoder::new();
    let mut reconstructor = LedgerReconstructor::new(config);
    let mut oracles: HashMap<String, OracleSeries> = HashMap::new();
    let mut ledgers: BTreeMap<String, EntityLedger> = BTreeMap::new();

    for (id, bundle) in &histories {
        let history = decoder.decode_history(bundle);
        if !oracles.contains_key(&history.collateral_type) {
            let updates = store.load_price_updates(&history.collateral_type)?;
            let events = decoder.decode_price_updates(&history.collateral_type, &updates);
            let series = OracleSeries::from_events(&history.collateral_type, &events);
            debug!(
                collateral_type = %history.collateral_type,
                points = series.len(),
                "Loaded oracle series"
            );
            oracles.insert(history.collateral_type.clone(), series);
        }
        let oracle = &oracles[&history.collateral_type];
        ledgers.insert(id.clone(), reconstructor.reconstruct(&history, oracle));
    }
    store.save_ledgers(&ledgers)?;

    let decode = decoder.stats();
    let stats = reconstructor.stats().clone();
    info!(
        vaults = stats.entities,
        entries = stats.entries,
        malformed_frac = decode.malformed_frac(),
        unknown_kinds = decode.unknown_kinds,
        rejected = decode.rejected,
        missing_price_frac = stats.missing_price_frac(),
        "Reconstructed ledgers"
    );
    Ok(stats)
}

/// Capture every collateral type at each checkpoint.
///
/// With `resume`, checkpoints already on disk are skipped.
pub async fn fetch_snapshots<S: VaultSource>(
    source: &S,
    store: &DataStore,
    checkpoints: &[Checkpoint],
    collateral_types: &[String],
    resume: bool,
) -> Result<usize> {
    let mut captured = 0;
    for (i, &checkpoint) in checkpoints.iter().enumerate() {
        if resume && store.has_snapshots(checkpoint) {
            debug!(checkpoint, "Snapshot already captured");
            continue;
        }
        let mut set = SnapshotSet::new();
        for collateral_type in collateral_types {
            let snapshot = source.fetch_snapshot(checkpoint, collateral_type).await?;
            set.insert(collateral_type.clone(), snapshot);
        }
        store.save_snapshots(checkpoint, &set)?;
        captured += 1;

        let timestamp = set.values().next().map(|s| s.timestamp()).unwrap_or(0);
        info!(
            checkpoint,
            done = i + 1,
            total = checkpoints.len(),
            time = ?ts_to_datetime(timestamp),
            "Captured checkpoint"
        );
    }
    Ok(captured)
}

/// Label every stored checkpoint pair into `result/`.
pub fn label(store: &DataStore, config: &LabelerConfig) -> Result<LabelingSummary> {
    let snapshots = store.load_snapshots_for(&config.collateral_type)?;
    let ledgers = store.load_ledgers()?;
    let index = LiquidationWindowIndex::from_ledgers(ledgers.values());
    info!(
        checkpoints = snapshots.len(),
        vaults = index.len(),
        collateral_type = %config.collateral_type,
        "Loaded labeling inputs"
    );

    let mut sink = JsonBatchSink::new(store.clone());
    TransitionLabeler::new(config).run(&snapshots, &index, &mut sink)
}
