//! Log sequence identifiers.
//!
//! Subgraph log ids look like `txHash-logIndex[-suffix]`. Several logs of the
//! same transaction share a timestamp, so the numeric segments are the only
//! way to recover their on-chain order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Dash-delimited log identifier with a total, numeric-aware ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(String);

impl SequenceId {
    /// Wrap a raw id.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Main index (second segment), if numeric.
    pub fn log_index(&self) -> Option<i64> {
        self.segment(1)
    }

    /// Sub-index (third segment), if numeric.
    pub fn suffix(&self) -> Option<i64> {
        self.segment(2)
    }

    fn segment(&self, n: usize) -> Option<i64> {
        self.0.split('-').nth(n).and_then(|s| s.trim().parse().ok())
    }
}

/// Parsed segments sort before unparseable or missing ones.
#[inline]
fn numeric_key(segment: Option<i64>) -> (bool, i64) {
    (segment.is_none(), segment.unwrap_or(0))
}

impl Ord for SequenceId {
    fn cmp(&self, other: &Self) -> Ordering {
        numeric_key(self.log_index())
            .cmp(&numeric_key(other.log_index()))
            .then_with(|| numeric_key(self.suffix()).cmp(&numeric_key(other.suffix())))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SequenceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
