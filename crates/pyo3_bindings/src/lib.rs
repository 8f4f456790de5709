//! PyO3 bindings for the vault-history pipeline.
//!
//! Exposes the offline stages to Python:
//! - Ledger reconstruction from stored history bundles
//! - Liquidation labeling of checkpoint pairs
//!
//! Bulk inputs and outputs cross the boundary as JSON strings in the same
//! shape the pipeline stores on disk.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use vault_core::config::{LabelerConfig, LedgerConfig};
use vault_core::{EntityLedger, LedgerEntry as RustLedgerEntry, Snapshot};
use vault_ingestion::{EventDecoder, PriceUpdateLog, VaultHistoryBundle};
use vault_labeler::{LiquidationWindowIndex, MemorySink, TransitionLabeler};
use vault_ledger::{LedgerReconstructor, OracleSeries};

fn to_py_err(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse<T: DeserializeOwned>(what: &str, json: &str) -> PyResult<T> {
    serde_json::from_str(json)
        .map_err(|e| PyValueError::new_err(format!("invalid {what} JSON: {e}")))
}

// ============================================================================
// Python-exposed Types
// ============================================================================

/// One reconstructed ledger row.
#[pyclass]
#[derive(Clone)]
pub struct LedgerEntry {
    #[pyo3(get)]
    pub timestamp: i64,
    #[pyo3(get)]
    pub kind: String,
    #[pyo3(get)]
    pub sequence_id: String,
    #[pyo3(get)]
    pub collateral_before: f64,
    #[pyo3(get)]
    pub collateral_after: f64,
    #[pyo3(get)]
    pub debt_before: f64,
    #[pyo3(get)]
    pub debt_after: f64,
    #[pyo3(get)]
    pub oracle_price: f64,
    #[pyo3(get)]
    pub pre_ratio: f64,
    #[pyo3(get)]
    pub post_ratio: f64,
}

#[pymethods]
impl LedgerEntry {
    #[getter]
    fn collateral_change(&self) -> f64 {
        self.collateral_after - self.collateral_before
    }

    #[getter]
    fn debt_change(&self) -> f64 {
        self.debt_after - self.debt_before
    }

    fn __repr__(&self) -> String {
        format!(
            "LedgerEntry(ts={}, kind={}, collateral={:.4}, debt={:.4}, ratio={:.4})",
            self.timestamp, self.kind, self.collateral_after, self.debt_after, self.post_ratio
        )
    }
}

impl From<&RustLedgerEntry> for LedgerEntry {
    fn from(e: &RustLedgerEntry) -> Self {
        LedgerEntry {
            timestamp: e.timestamp,
            kind: format!("{:?}", e.kind),
            sequence_id: e.sequence_id.to_string(),
            collateral_before: e.collateral_before,
            collateral_after: e.collateral_after,
            debt_before: e.debt_before,
            debt_after: e.debt_after,
            oracle_price: e.oracle_price,
            pre_ratio: e.pre_ratio,
            post_ratio: e.post_ratio,
        }
    }
}

// ============================================================================
// Engine Classes
// ============================================================================

/// Ledger reconstructor over stored history bundles.
#[pyclass]
pub struct PyLedgerReconstructor {
    decoder: EventDecoder,
    inner: LedgerReconstructor,
    oracles: BTreeMap<String, OracleSeries>,
}

impl PyLedgerReconstructor {
    fn rebuild(&mut self, history_json: &str) -> PyResult<EntityLedger> {
        let bundle: VaultHistoryBundle = parse("history bundle", history_json)?;
        let history = self.decoder.decode_history(&bundle);
        let empty = OracleSeries::new(history.collateral_type.as_str());
        let oracle = self.oracles.get(&history.collateral_type).unwrap_or(&empty);
        Ok(self.inner.reconstruct(&history, oracle))
    }
}

#[pymethods]
impl PyLedgerReconstructor {
    #[new]
    #[pyo3(signature = (price_sample_points=100))]
    fn new(price_sample_points: usize) -> Self {
        PyLedgerReconstructor {
            decoder: EventDecoder::new(),
            inner: LedgerReconstructor::new(&LedgerConfig { price_sample_points }),
            oracles: BTreeMap::new(),
        }
    }

    /// Register oracle price updates (a JSON array) for a collateral type.
    fn add_price_updates(&mut self, collateral_type: &str, updates_json: &str) -> PyResult<usize> {
        let updates: Vec<PriceUpdateLog> = parse("price updates", updates_json)?;
        let events = self.decoder.decode_price_updates(collateral_type, &updates);
        let series = match self.oracles.remove(collateral_type) {
            Some(existing) => existing.merged_with(&events),
            None => OracleSeries::from_events(collateral_type, &events),
        };
        let len = series.len();
        self.oracles.insert(collateral_type.to_string(), series);
        Ok(len)
    }

    /// Reconstruct one vault and return its ledger as JSON.
    fn reconstruct(&mut self, history_json: &str) -> PyResult<String> {
        let ledger = self.rebuild(history_json)?;
        serde_json::to_string(&ledger).map_err(to_py_err)
    }

    /// Reconstruct one vault and return its entries.
    fn entries(&mut self, history_json: &str) -> PyResult<Vec<LedgerEntry>> {
        let ledger = self.rebuild(history_json)?;
        Ok(ledger.entries.iter().map(LedgerEntry::from).collect())
    }

    /// Get reconstruction statistics.
    fn stats(&self) -> (u64, u64, u64, u64) {
        let s = self.inner.stats();
        (s.entities, s.entries, s.missing_prices, s.unmatched_splits)
    }

    /// Reset statistics.
    fn reset_stats(&mut self) {
        self.inner.reset_stats();
        self.decoder.reset_stats();
    }
}

/// Label every checkpoint pair.
///
/// `snapshots_json` is an array of snapshots of one collateral type and
/// `ledgers_json` an object of vault id to ledger. Returns the batches as a
/// JSON array.
#[pyfunction]
#[pyo3(signature = (
    snapshots_json,
    ledgers_json,
    batch_size=100,
    min_collateral=0.0,
    min_debt=0.0
))]
fn label_transitions(
    snapshots_json: &str,
    ledgers_json: &str,
    batch_size: usize,
    min_collateral: f64,
    min_debt: f64,
) -> PyResult<String> {
    let snapshots: Vec<Snapshot> = parse("snapshots", snapshots_json)?;
    let ledgers: BTreeMap<String, EntityLedger> = parse("ledgers", ledgers_json)?;
    let index = LiquidationWindowIndex::from_ledgers(ledgers.values());

    let config = LabelerConfig {
        batch_size,
        min_collateral,
        min_debt,
        ..LabelerConfig::default()
    };
    let mut sink = MemorySink::new();
    TransitionLabeler::new(&config)
        .run(&snapshots, &index, &mut sink)
        .map_err(to_py_err)?;
    serde_json::to_string(&sink.batches).map_err(to_py_err)
}

/// Collateralization ratio of a position.
#[pyfunction]
fn collateralization_ratio(price: f64, collateral: f64, debt: f64, rate: f64) -> f64 {
    vault_ledger::collateralization_ratio(price, collateral, debt, rate)
}

// ============================================================================
// Module Definition
// ============================================================================

/// Vault history - ledger reconstruction and liquidation labeling for Python.
#[pymodule]
fn vault_history(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Types
    m.add_class::<LedgerEntry>()?;

    // Engine classes
    m.add_class::<PyLedgerReconstructor>()?;

    // Functions
    m.add_function(wrap_pyfunction!(label_transitions, m)?)?;
    m.add_function(wrap_pyfunction!(collateralization_ratio, m)?)?;

    Ok(())
}
