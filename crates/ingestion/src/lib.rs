//! Data ingestion and normalization for the vault-history pipeline.
//!
//! This crate handles:
//! - Subgraph wire records (vaults, logs, auctions, price updates)
//! - Decoding wire records into typed events
//! - `id_gt` cursor pagination with first-seen de-duplication
//! - Retrying transient remote failures
//! - The subgraph client and on-disk JSON store

pub mod decoder;
pub mod pagination;
pub mod records;
pub mod retry;
pub mod source;
pub mod store;
pub mod subgraph;

pub use decoder::{DecodeStats, DecodedHistory, EventDecoder};
pub use pagination::{collect_pages, dedup_first_seen};
pub use records::{PriceUpdateLog, RawLog, RawNumber, SaleAuction, VaultHistoryBundle, VaultRecord};
pub use retry::RetryPolicy;
pub use source::VaultSource;
pub use store::{DataStore, SnapshotSet};
pub use subgraph::SubgraphClient;
