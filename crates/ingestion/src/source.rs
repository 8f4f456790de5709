//! Remote vault data source.

use crate::records::{PriceUpdateLog, VaultHistoryBundle, VaultRecord};
use async_trait::async_trait;
use vault_core::{Checkpoint, Result, Snapshot};

/// Everything the pipeline needs from the remote index.
#[async_trait]
pub trait VaultSource: Send + Sync {
    /// Every vault id, ascending and de-duplicated.
    async fn fetch_vault_ids(&self) -> Result<Vec<String>>;

    /// Vaults of a collateral class with non-zero collateral and debt.
    async fn fetch_active_vaults(&self, collateral_type: &str) -> Result<Vec<VaultRecord>>;

    /// Logs, auctions and destination split logs of one vault.
    ///
    /// `vault_key` is either a numeric cdp id or an `address-ilk` id.
    async fn fetch_vault_history(&self, vault_key: &str) -> Result<VaultHistoryBundle>;

    /// All oracle price updates for a collateral class.
    async fn fetch_price_updates(&self, collateral_type: &str) -> Result<Vec<PriceUpdateLog>>;

    /// State of every vault of a collateral class at a block.
    async fn fetch_snapshot(
        &self,
        checkpoint: Checkpoint,
        collateral_type: &str,
    ) -> Result<Snapshot>;
}
