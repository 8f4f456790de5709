//! `id_gt` cursor pagination.
//!
//! Subgraph lists are paged by asking for ids strictly greater than the last
//! id of the previous page. Pages can overlap when the index shifts between
//! requests, so results are de-duplicated keeping the first-seen record.

use std::collections::HashSet;
use std::future::Future;
use tracing::debug;
use vault_core::Result;

/// Initial cursor: every id compares greater than "0".
pub const START_CURSOR: &str = "0";

/// Keep only the first record seen for each id, preserving order.
pub fn dedup_first_seen<T, F>(items: Vec<T>, id_of: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(id_of(item).to_string()))
        .collect()
}

/// Fetch pages until an empty page, the cursor stalls, or `limit` records
/// have been collected. Returns de-duplicated records.
///
/// `fetch` receives the cursor (`id_gt`) for each page.
pub async fn collect_pages<T, F, Fut, I>(
    mut fetch: F,
    id_of: I,
    limit: Option<usize>,
) -> Result<Vec<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
    I: Fn(&T) -> &str,
{
    let mut cursor = START_CURSOR.to_string();
    let mut records: Vec<T> = Vec::new();
    let mut pages = 0usize;

    loop {
        if limit.is_some_and(|limit| records.len() >= limit) {
            break;
        }

        let page = fetch(cursor.clone()).await?;
        pages += 1;
        if page.is_empty() {
            break;
        }

        // Ids are compared as strings by the subgraph, so the next cursor is
        // the lexicographic maximum of this page.
        let next = page
            .iter()
            .map(|r| id_of(r))
            .max()
            .unwrap_or(START_CURSOR)
            .to_string();

        debug!(
            page = pages,
            fetched = page.len(),
            total = records.len() + page.len(),
            cursor = %next,
            "Fetched page"
        );
        records.extend(page);

        if next <= cursor {
            break;
        }
        cursor = next;
    }

    Ok(dedup_first_seen(records, id_of))
}
