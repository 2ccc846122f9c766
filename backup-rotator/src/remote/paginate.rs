//! Drain cursor-paginated listings.

use super::retry::{with_retry, RetryPolicy};
use super::Page;
use crate::utils::errors::Result;
use std::future::Future;
use tracing::debug;

/// Fetch every page, following continuation cursors, and concatenate the items.
///
/// Each page request goes through [`with_retry`]. The listing ends at the
/// first page without a continuation cursor.
pub async fn list_all<T, F, Fut>(policy: &RetryPolicy, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = with_retry(policy, || fetch_page(cursor.clone())).await?;
        pages += 1;
        items.extend(page.items);

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    debug!(pages, items = items.len(), "Listing complete");
    Ok(items)
}
