//! Transition labeling.
//!
//! For every ordered checkpoint pair (A, B) the labeler records, for each
//! vault active at A, its state at A and B and whether a liquidation started
//! strictly between the two checkpoint timestamps.

use crate::batch::{BatchSink, BatchWriter};
use crate::pairs::CheckpointPairs;
use crate::summary::LabelingSummary;
use crate::window::LiquidationWindowIndex;
use std::collections::BTreeMap;
use tracing::{debug, info};
use vault_core::config::LabelerConfig;
use vault_core::{EntityTransition, Result, Snapshot, TransitionRecord};

/// Transition labeler.
#[derive(Debug, Clone)]
pub struct TransitionLabeler {
    /// Inclusion threshold on collateral at the first checkpoint.
    min_collateral: f64,
    /// Inclusion threshold on debt at the first checkpoint.
    min_debt: f64,
    batch_size: usize,
}

impl Default for TransitionLabeler {
    fn default() -> Self {
        Self::new(&LabelerConfig::default())
    }
}

impl TransitionLabeler {
    /// Create a new labeler from configuration.
    pub fn new(config: &LabelerConfig) -> Self {
        Self {
            min_collateral: config.min_collateral,
            min_debt: config.min_debt,
            batch_size: config.batch_size,
        }
    }

    /// Label one checkpoint pair.
    pub fn label_pair(
        &self,
        pair_index: usize,
        first: &Snapshot,
        second: &Snapshot,
        index: &LiquidationWindowIndex,
    ) -> TransitionRecord {
        let (from, to) = (first.timestamp(), second.timestamp());
        let per_entity: BTreeMap<_, _> = first
            .entities
            .values()
            .filter(|state| state.is_active(self.min_collateral, self.min_debt))
            .map(|state| {
                let liquidation_timestamp = index.first_between(&state.id, from, to);
                let transition = EntityTransition {
                    first: state.clone(),
                    second: second.get(&state.id).cloned(),
                    liquidated: liquidation_timestamp.is_some(),
                    liquidation_timestamp,
                };
                (state.id.clone(), transition)
            })
            .collect();

        TransitionRecord {
            pair_index,
            first: first.meta(),
            second: second.meta(),
            per_entity,
        }
    }

    /// Lazily label every checkpoint pair.
    ///
    /// Snapshots may come in any order; they are sorted by checkpoint and a
    /// repeated checkpoint keeps its first snapshot.
    pub fn transitions<'a>(
        &'a self,
        snapshots: &'a [Snapshot],
        index: &'a LiquidationWindowIndex,
    ) -> Transitions<'a> {
        let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
        ordered.sort_by_key(|s| s.checkpoint);
        ordered.dedup_by_key(|s| s.checkpoint);

        Transitions {
            labeler: self,
            pairs: CheckpointPairs::new(ordered.len()),
            snapshots: ordered,
            index,
            next_index: 0,
        }
    }

    /// Label every pair into `sink`, flushing every `batch_size` records.
    pub fn run<S: BatchSink>(
        &self,
        snapshots: &[Snapshot],
        index: &LiquidationWindowIndex,
        sink: &mut S,
    ) -> Result<LabelingSummary> {
        let transitions = self.transitions(snapshots, index);
        info!(
            checkpoints = transitions.checkpoints(),
            pairs = transitions.len(),
            batch_size = self.batch_size,
            "Labeling transitions"
        );

        let mut summary = LabelingSummary::default();
        let mut writer = BatchWriter::new(sink, self.batch_size);
        for record in transitions {
            debug!(
                pair = record.pair_index,
                first = record.first.checkpoint,
                second = record.second.checkpoint,
                vaults = record.per_entity.len(),
                "Labeled pair"
            );
            summary.observe(&record);
            writer.push(record)?;
        }
        summary.batches = writer.finish()?;

        info!(
            pairs = summary.pairs,
            batches = summary.batches,
            transitions = summary.transitions,
            liquidated = summary.liquidated,
            "Labeling complete"
        );
        Ok(summary)
    }
}

/// Lazy iterator over labeled checkpoint pairs.
pub struct Transitions<'a> {
    labeler: &'a TransitionLabeler,
    pairs: CheckpointPairs,
    snapshots: Vec<&'a Snapshot>,
    index: &'a LiquidationWindowIndex,
    next_index: usize,
}

impl Transitions<'_> {
    /// Distinct checkpoints being paired.
    pub fn checkpoints(&self) -> usize {
        self.snapshots.len()
    }
}

impl Iterator for Transitions<'_> {
    type Item = TransitionRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let (i, j) = self.pairs.next()?;
        let record = self
            .labeler
            .label_pair(self.next_index, self.snapshots[i], self.snapshots[j], self.index);
        self.next_index += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pairs.size_hint()
    }
}

impl ExactSizeIterator for Transitions<'_> {}
