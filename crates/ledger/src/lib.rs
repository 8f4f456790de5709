//! Per-vault ledger reconstruction.
//!
//! This crate provides:
//! - Oracle price series with "latest at or before" lookups
//! - Collateralization ratio computation
//! - The carry-forward fold that turns sorted events into ledger entries
//! - The ledger reconstructor tying them together

pub mod carry;
pub mod oracle;
pub mod ratio;
pub mod reconstructor;

pub use oracle::OracleSeries;
pub use ratio::collateralization_ratio;
pub use reconstructor::{LedgerReconstructor, ReconstructionStats};
