//! Core types and configuration for the vault-history pipeline.
//!
//! This crate provides shared types used across all other crates:
//! - Vault events and reconstructed ledgers
//! - Snapshots and labeled transition records
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod sequence;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use sequence::SequenceId;
pub use types::*;
