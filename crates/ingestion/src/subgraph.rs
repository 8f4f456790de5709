//! GraphQL client for the Maker vault subgraph.

use crate::pagination::collect_pages;
use crate::records::{
    address_of, CollateralTypeRecord, PriceUpdateLog, RawLog, RawNumber, SaleAuction,
    VaultHistoryBundle, VaultRecord,
};
use crate::retry::RetryPolicy;
use crate::source::VaultSource;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use vault_core::{Checkpoint, Config, Error, Result, Snapshot};

/// Selection set for a vault with its logs, newest first.
const VAULT_LOGS_SELECTION: &str = r#"
    id
    cdpId
    openedAt
    updatedAt
    collateral
    debt
    collateralType { id rate }
    logs(orderBy: timestamp, orderDirection: desc, first: 1000) {
      __typename
      transaction
      timestamp
      ... on VaultCreationLog { id }
      ... on VaultCollateralChangeLog { id collateralDiff collateralAfter collateralBefore }
      ... on VaultDebtChangeLog { id debtDiff debtAfter debtBefore }
      ... on VaultTransferChangeLog { id previousOwner { id } nextOwner { id } }
      ... on VaultSplitChangeLog { id dst src collateralToMove debtToMove }
    }"#;

/// Selection set for a vault's point-in-time state.
const VAULT_STATE_SELECTION: &str =
    "id collateral debt cdpId owner updatedAt updatedAtBlock updatedAtTransaction safetyLevel";

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

impl<T> GraphQlResponse<T> {
    fn into_data(self) -> Result<T> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(Error::source(format!("graphql: {}", messages.join("; "))));
        }
        self.data
            .ok_or_else(|| Error::source("graphql response without data"))
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IdsData {
    vaults: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct VaultsData {
    vaults: Vec<VaultRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountHeader {
    collateral_type: Option<CollateralTypeRecord>,
    #[serde(default)]
    vaults: Vec<IdOnly>,
    #[serde(default)]
    system_states: Vec<SystemState>,
}

#[derive(Debug, Deserialize)]
struct SystemState {
    timestamp: RawNumber,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryData {
    #[serde(default)]
    vaults: Vec<VaultRecord>,
    #[serde(default)]
    sale_auctions: Vec<SaleAuction>,
    #[serde(default)]
    vault_split_change_logs: Vec<RawLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceUpdatesData {
    collateral_price_update_logs: Vec<PriceUpdateLog>,
}

/// GraphQL string literal.
fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn vault_ids_query(cursor: &str, page_size: usize) -> String {
    format!(
        "{{ vaults(where: {{ id_gt: {} }}, first: {page_size}, \
         orderBy: id, orderDirection: asc) {{ id }} }}",
        quote(cursor)
    )
}

fn active_header_query(collateral_type: &str) -> String {
    let ct = quote(collateral_type);
    format!(
        "{{ collateralType(id: {ct}) {{ vaultCount }} \
         vaults(where: {{ collateralType: {ct}, collateral_not: 0, debt_not: 0 }}, \
         first: 1, orderBy: id, orderDirection: desc) {{ id }} }}"
    )
}

fn active_page_query(collateral_type: &str, cursor: &str, page_size: usize) -> String {
    format!(
        "{{ vaults(where: {{ collateralType: {}, id_gt: {}, collateral_not: 0, debt_not: 0 }}, \
         first: {page_size}, orderBy: id, orderDirection: asc) {{ {VAULT_STATE_SELECTION} }} }}",
        quote(collateral_type),
        quote(cursor)
    )
}

fn snapshot_header_query(collateral_type: &str, block: Checkpoint) -> String {
    let ct = quote(collateral_type);
    format!(
        "{{ collateralType(id: {ct}, block: {{ number: {block} }}) {{ \
         vaultCount unmanagedVaultCount price {{ id value spotPrice }} rate liquidationRatio }} \
         vaults(where: {{ collateralType: {ct} }}, first: 1, orderBy: id, orderDirection: desc, \
         block: {{ number: {block} }}) {{ id }} \
         systemStates(block: {{ number: {block} }}, first: 1) {{ timestamp }} }}"
    )
}

fn snapshot_page_query(
    collateral_type: &str,
    block: Checkpoint,
    cursor: &str,
    page_size: usize,
) -> String {
    format!(
        "{{ vaults(where: {{ collateralType: {}, id_gt: {} }}, first: {page_size}, \
         orderBy: id, orderDirection: asc, block: {{ number: {block} }}) \
         {{ {VAULT_STATE_SELECTION} }} }}",
        quote(collateral_type),
        quote(cursor)
    )
}

fn auctions_fragment(vault_id: &str) -> String {
    format!(
        "saleAuctions(where: {{ vault: {} }}) {{ id vault {{ id }} amountDaiToRaise \
         amountCollateralToSell boughtAt isActive startedAt resetedAt updatedAt }}",
        quote(vault_id)
    )
}

fn split_destination_fragment(address: &str) -> String {
    format!(
        "vaultSplitChangeLogs(where: {{ dst: {} }}) {{ __typename id dst src \
         collateralToMove debtToMove transaction timestamp block }}",
        quote(address)
    )
}

fn vault_by_cdp_id_query(cdp_id: &str) -> String {
    format!("{{ vaults(first: 1, where: {{ cdpId: {cdp_id} }}) {{ {VAULT_LOGS_SELECTION} }} }}")
}

fn vault_extras_query(vault_id: &str) -> String {
    format!(
        "{{ {} {} }}",
        auctions_fragment(vault_id),
        split_destination_fragment(address_of(vault_id))
    )
}

fn vault_by_id_query(vault_id: &str) -> String {
    format!(
        "{{ vaults(first: 1, where: {{ id: {} }}) {{ {VAULT_LOGS_SELECTION} }} {} {} }}",
        quote(vault_id),
        auctions_fragment(vault_id),
        split_destination_fragment(address_of(vault_id))
    )
}

fn price_updates_query(collateral_type: &str, cursor: &str, page_size: usize) -> String {
    format!(
        "{{ collateralPriceUpdateLogs(where: {{ collateral: {}, id_gt: {} }}, \
         first: {page_size}, orderBy: id, orderDirection: asc) \
         {{ id timestamp collateral {{ id }} newValue newSpotPrice }} }}",
        quote(collateral_type),
        quote(cursor)
    )
}

fn is_cdp_id(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

/// Subgraph client over HTTP.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    client: reqwest::Client,
    endpoint: String,
    page_size: usize,
    retry: RetryPolicy,
}

impl SubgraphClient {
    /// Create a client for `endpoint`.
    pub fn new(endpoint: impl Into<String>, page_size: usize, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            page_size,
            retry,
        }
    }

    /// Build a client from configuration; fails without an endpoint.
    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoint = config
            .source
            .endpoint
            .clone()
            .ok_or_else(|| Error::config("no subgraph endpoint configured"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.source.request_timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            page_size: config.source.page_size,
            retry: RetryPolicy::from(&config.retry),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One GraphQL request, no retry.
    async fn query<T: DeserializeOwned>(&self, query: &str) -> Result<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GraphQlRequest { query })
            .send()
            .await
            .map_err(|e| Error::source(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::source(format!("reading response: {e}")))?;
        if !status.is_success() {
            let excerpt: String = body.chars().take(200).collect();
            return Err(Error::source(format!("http {status}: {excerpt}")));
        }

        serde_json::from_str::<GraphQlResponse<T>>(&body)?.into_data()
    }

    async fn query_retried<T: DeserializeOwned>(&self, label: &str, query: &str) -> Result<T> {
        self.retry.run(label, || self.query::<T>(query)).await
    }

    async fn history_by_cdp_id(&self, cdp_id: &str) -> Result<Option<VaultHistoryBundle>> {
        let data: VaultsData = self.query(&vault_by_cdp_id_query(cdp_id)).await?;
        let Some(vault) = data.vaults.into_iter().next() else {
            return Ok(None);
        };
        let extras: HistoryData = self
            .query_retried("vault auctions", &vault_extras_query(&vault.id))
            .await?;
        Ok(Some(VaultHistoryBundle {
            vault,
            sale_auctions: extras.sale_auctions,
            split_logs_as_destination: extras.vault_split_change_logs,
        }))
    }

    async fn history_by_id(&self, vault_id: &str) -> Result<Option<VaultHistoryBundle>> {
        let data: HistoryData = self
            .query_retried("vault history", &vault_by_id_query(vault_id))
            .await?;
        Ok(data.vaults.into_iter().next().map(|vault| VaultHistoryBundle {
            vault,
            sale_auctions: data.sale_auctions,
            split_logs_as_destination: data.vault_split_change_logs,
        }))
    }
}

#[async_trait]
impl VaultSource for SubgraphClient {
    #[instrument(skip(self))]
    async fn fetch_vault_ids(&self) -> Result<Vec<String>> {
        let ids = collect_pages(
            |cursor: String| async move {
                let data: IdsData = self
                    .query_retried("vault ids", &vault_ids_query(&cursor, self.page_size))
                    .await?;
                Ok(data.vaults)
            },
            |v: &IdOnly| v.id.as_str(),
            None,
        )
        .await?;

        info!(count = ids.len(), "Fetched vault ids");
        Ok(ids.into_iter().map(|v| v.id).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_active_vaults(&self, collateral_type: &str) -> Result<Vec<VaultRecord>> {
        let header: CountHeader = self
            .query_retried("active header", &active_header_query(collateral_type))
            .await?;
        let count = header
            .collateral_type
            .as_ref()
            .and_then(|c| c.vault_count.as_ref())
            .and_then(RawNumber::to_i64)
            .and_then(|c| usize::try_from(c).ok())
            .unwrap_or(0);
        if header.vaults.is_empty() || count == 0 {
            debug!(collateral_type, "No active vaults");
            return Ok(Vec::new());
        }

        let vaults = collect_pages(
            |cursor: String| async move {
                let query = active_page_query(collateral_type, &cursor, self.page_size);
                let data: VaultsData = self.query_retried("active page", &query).await?;
                Ok(data.vaults)
            },
            |v: &VaultRecord| v.id.as_str(),
            Some(count),
        )
        .await?;

        info!(collateral_type, count = vaults.len(), "Fetched active vaults");
        Ok(vaults)
    }

    #[instrument(skip(self))]
    async fn fetch_vault_history(&self, vault_key: &str) -> Result<VaultHistoryBundle> {
        if is_cdp_id(vault_key) {
            match self.history_by_cdp_id(vault_key).await {
                Ok(Some(bundle)) => return Ok(bundle),
                Ok(None) => warn!(
                    vault = vault_key,
                    "Vault not found by cdp id, retrying with vault id"
                ),
                Err(e) => warn!(
                    vault = vault_key,
                    error = %e,
                    "Cdp id lookup failed, retrying with vault id"
                ),
            }
        }

        self.history_by_id(vault_key)
            .await?
            .ok_or_else(|| Error::data(format!("vault {vault_key} could not be retrieved")))
    }

    #[instrument(skip(self))]
    async fn fetch_price_updates(&self, collateral_type: &str) -> Result<Vec<PriceUpdateLog>> {
        let updates = collect_pages(
            |cursor: String| async move {
                let query = price_updates_query(collateral_type, &cursor, self.page_size);
                let data: PriceUpdatesData = self.query_retried("price updates", &query).await?;
                Ok(data.collateral_price_update_logs)
            },
            |u: &PriceUpdateLog| u.id.as_str(),
            None,
        )
        .await?;

        info!(collateral_type, count = updates.len(), "Fetched price updates");
        Ok(updates)
    }

    #[instrument(skip(self))]
    async fn fetch_snapshot(
        &self,
        checkpoint: Checkpoint,
        collateral_type: &str,
    ) -> Result<Snapshot> {
        let header: CountHeader = self
            .query_retried("snapshot header", &snapshot_header_query(collateral_type, checkpoint))
            .await?;
        let timestamp = header
            .system_states
            .first()
            .and_then(|s| s.timestamp.to_i64())
            .unwrap_or(0);
        let count = header
            .collateral_type
            .as_ref()
            .map(CollateralTypeRecord::total_vault_count)
            .unwrap_or(0) as usize;

        let vaults = if header.vaults.is_empty() || count == 0 {
            Vec::new()
        } else {
            collect_pages(
                |cursor: String| async move {
                    let query =
                        snapshot_page_query(collateral_type, checkpoint, &cursor, self.page_size);
                    let data: VaultsData = self.query_retried("snapshot page", &query).await?;
                    Ok(data.vaults)
                },
                |v: &VaultRecord| v.id.as_str(),
                Some(count),
            )
            .await?
        };

        let snapshot = crate::records::assemble_snapshot(
            checkpoint,
            collateral_type,
            header.collateral_type.as_ref(),
            timestamp,
            &vaults,
        );
        info!(
            checkpoint,
            collateral_type,
            timestamp,
            vaults = snapshot.entities.len(),
            price = snapshot.aggregate.price,
            "Fetched snapshot"
        );
        Ok(snapshot)
    }
}
