//! On-disk JSON artifacts.
//!
//! Layout under the data directory:
//!
//! ```text
//! vault-ids.json
//! vault-history.json
//! price-updates/{collateral_type}.json
//! ledgers.json
//! vault-set/{checkpoint}/snapshot.json
//! result/result-{start}-{end}.json
//! ```
//!
//! Files are written pretty-printed to a temporary sibling and renamed into
//! place, so an aborted run never leaves a half-written artifact.

use crate::records::{PriceUpdateLog, VaultHistoryBundle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vault_core::{Checkpoint, EntityLedger, Error, Result, Snapshot};

const VAULT_IDS: &str = "vault-ids.json";
const VAULT_HISTORY: &str = "vault-history.json";
const LEDGERS: &str = "ledgers.json";
const PRICE_UPDATES_DIR: &str = "price-updates";
const VAULT_SET_DIR: &str = "vault-set";
const SNAPSHOT_FILE: &str = "snapshot.json";
const RESULT_DIR: &str = "result";

/// Snapshots captured at one checkpoint, keyed by collateral type.
pub type SnapshotSet = BTreeMap<String, Snapshot>;

/// JSON file store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Serialize `value` to `relative`, creating parent directories.
    pub fn save_json<T: Serialize + ?Sized>(
        &self,
        relative: impl AsRef<Path>,
        value: &T,
    ) -> Result<PathBuf> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "Wrote artifact");
        Ok(path)
    }

    /// Deserialize the artifact at `relative`.
    pub fn load_json<T: DeserializeOwned>(&self, relative: impl AsRef<Path>) -> Result<T> {
        let path = self.root.join(relative);
        let raw =
            fs::read(&path).map_err(|e| Error::storage(format!("{}: {e}", path.display())))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn exists(&self, relative: impl AsRef<Path>) -> bool {
        self.root.join(relative).exists()
    }

    pub fn save_vault_ids(&self, ids: &[String]) -> Result<PathBuf> {
        self.save_json(VAULT_IDS, ids)
    }

    pub fn load_vault_ids(&self) -> Result<Vec<String>> {
        self.load_json(VAULT_IDS)
    }

    pub fn save_histories(
        &self,
        histories: &BTreeMap<String, VaultHistoryBundle>,
    ) -> Result<PathBuf> {
        self.save_json(VAULT_HISTORY, histories)
    }

    pub fn load_histories(&self) -> Result<BTreeMap<String, VaultHistoryBundle>> {
        self.load_json(VAULT_HISTORY)
    }

    pub fn save_price_updates(
        &self,
        collateral_type: &str,
        updates: &[PriceUpdateLog],
    ) -> Result<PathBuf> {
        self.save_json(Self::price_updates_path(collateral_type), updates)
    }

    /// Price updates for a class; empty when none were fetched.
    pub fn load_price_updates(&self, collateral_type: &str) -> Result<Vec<PriceUpdateLog>> {
        let relative = Self::price_updates_path(collateral_type);
        if !self.exists(&relative) {
            warn!(collateral_type, "No price updates on disk");
            return Ok(Vec::new());
        }
        self.load_json(relative)
    }

    pub fn save_ledgers(&self, ledgers: &BTreeMap<String, EntityLedger>) -> Result<PathBuf> {
        self.save_json(LEDGERS, ledgers)
    }

    pub fn load_ledgers(&self) -> Result<BTreeMap<String, EntityLedger>> {
        self.load_json(LEDGERS)
    }

    fn price_updates_path(collateral_type: &str) -> PathBuf {
        Path::new(PRICE_UPDATES_DIR).join(format!("{collateral_type}.json"))
    }

    fn snapshot_path(checkpoint: Checkpoint) -> PathBuf {
        Path::new(VAULT_SET_DIR)
            .join(checkpoint.to_string())
            .join(SNAPSHOT_FILE)
    }

    pub fn save_snapshots(
        &self,
        checkpoint: Checkpoint,
        snapshots: &SnapshotSet,
    ) -> Result<PathBuf> {
        self.save_json(Self::snapshot_path(checkpoint), snapshots)
    }

    pub fn load_snapshots(&self, checkpoint: Checkpoint) -> Result<SnapshotSet> {
        self.load_json(Self::snapshot_path(checkpoint))
    }

    /// Whether the snapshot for `checkpoint` was already captured.
    pub fn has_snapshots(&self, checkpoint: Checkpoint) -> bool {
        self.exists(Self::snapshot_path(checkpoint))
    }

    /// Checkpoints with a captured snapshot, ascending.
    pub fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let dir = self.root.join(VAULT_SET_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(checkpoint) = name.to_str().and_then(|n| n.parse::<Checkpoint>().ok()) else {
                continue;
            };
            if entry.path().join(SNAPSHOT_FILE).exists() {
                checkpoints.push(checkpoint);
            }
        }
        checkpoints.sort_unstable();
        Ok(checkpoints)
    }

    /// Every captured snapshot of one collateral class, ascending by checkpoint.
    pub fn load_snapshots_for(&self, collateral_type: &str) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for checkpoint in self.list_checkpoints()? {
            let mut set = self.load_snapshots(checkpoint)?;
            match set.remove(collateral_type) {
                Some(snapshot) => snapshots.push(snapshot),
                None => warn!(checkpoint, collateral_type, "Snapshot missing collateral type"),
            }
        }
        Ok(snapshots)
    }

    /// Write one labeled batch as `result/result-{start}-{end}.json`.
    pub fn save_batch<T: Serialize + ?Sized>(
        &self,
        start: usize,
        end: usize,
        records: &T,
    ) -> Result<PathBuf> {
        let relative = Path::new(RESULT_DIR).join(format!("result-{start}-{end}.json"));
        self.save_json(relative, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::VaultRecord;
    use vault_core::CheckpointAggregate;

    fn snapshot(checkpoint: Checkpoint, timestamp: i64) -> Snapshot {
        Snapshot {
            checkpoint,
            aggregate: CheckpointAggregate {
                collateral_type: "ETH-A".to_string(),
                timestamp,
                price: 200.0,
                rate: 1.0,
                liquidation_ratio: 1.5,
                count: 0,
            },
            entities: BTreeMap::new(),
        }
    }

    #[test]
    fn test_vault_ids_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        let ids = vec!["0x1-ETH-A".to_string(), "0x2-ETH-A".to_string()];

        let path = store.save_vault_ids(&ids).unwrap();
        assert!(path.ends_with(VAULT_IDS));
        assert!(!dir.path().join("vault-ids.json.tmp").exists());
        assert_eq!(store.load_vault_ids().unwrap(), ids);
    }

    #[test]
    fn test_missing_artifact_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        assert!(matches!(store.load_ledgers(), Err(Error::Storage(_))));
        assert!(store.load_price_updates("ETH-A").unwrap().is_empty());
    }

    #[test]
    fn test_list_checkpoints_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        for (checkpoint, ts) in [(300, 3), (100, 1), (200, 2)] {
            let mut set = SnapshotSet::new();
            set.insert("ETH-A".to_string(), snapshot(checkpoint, ts));
            store.save_snapshots(checkpoint, &set).unwrap();
        }
        fs::create_dir_all(dir.path().join("vault-set/not-a-block")).unwrap();
        fs::create_dir_all(dir.path().join("vault-set/400")).unwrap();

        assert_eq!(store.list_checkpoints().unwrap(), vec![100, 200, 300]);
        assert!(store.has_snapshots(200));
        assert!(!store.has_snapshots(400));

        let loaded = store.load_snapshots_for("ETH-A").unwrap();
        let timestamps: Vec<i64> = loaded.iter().map(Snapshot::timestamp).collect();
        assert_eq!(timestamps, vec![1, 2, 3]);
        assert!(store.load_snapshots_for("FAU-A").unwrap().is_empty());
    }

    #[test]
    fn test_histories_and_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());

        let vault: VaultRecord = serde_json::from_str(r#"{"id": "0x1-ETH-A"}"#).unwrap();
        let mut histories = BTreeMap::new();
        histories.insert(
            vault.id.clone(),
            VaultHistoryBundle {
                vault,
                sale_auctions: Vec::new(),
                split_logs_as_destination: Vec::new(),
            },
        );
        store.save_histories(&histories).unwrap();
        assert_eq!(store.load_histories().unwrap(), histories);

        let path = store.save_batch(0, 3, &vec![1, 2, 3, 4]).unwrap();
        assert!(path.ends_with("result/result-0-3.json"));
        let loaded: Vec<i32> = store.load_json("result/result-0-3.json").unwrap();
        assert_eq!(loaded.len(), 4);
    }
}
