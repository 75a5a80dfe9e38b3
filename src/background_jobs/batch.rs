//! Paginated, transactional processing of query results.

use super::job::JobError;
use crate::chat_store::SqliteChatStore;
use rusqlite::{Row, ToSql, Transaction};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub total_processed: usize,
    pub transactions: usize,
}

/// Page through `query` in chunks of `batch_size` rows and hand every row of a
/// page to `process` inside one transaction per page.
///
/// `query` must not carry its own `LIMIT`/`OFFSET`; they are appended as two
/// extra positional parameters after `params`. A failing row rolls back its
/// whole page and aborts with [`JobError::Transaction`]; earlier pages stay
/// committed. Iteration stops after the first page shorter than `batch_size`.
/// `throttle` is slept between pages, so this must run on a blocking thread.
pub fn process_batch<T, M, P>(
    store: &SqliteChatStore,
    query: &str,
    params: &[&dyn ToSql],
    batch_size: usize,
    throttle: Duration,
    mut map_row: M,
    mut process: P,
) -> Result<BatchOutcome, JobError>
where
    M: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    P: FnMut(&Transaction<'_>, &T) -> anyhow::Result<()>,
{
    if batch_size == 0 {
        return Err(JobError::InvalidBatchSize);
    }

    let paged_query = format!("{} LIMIT ? OFFSET ?", query);
    let limit = batch_size as i64;
    let mut offset = 0usize;
    let mut outcome = BatchOutcome::default();

    loop {
        let page_offset = offset as i64;
        let mut page_params: Vec<&dyn ToSql> = params.to_vec();
        page_params.push(&limit);
        page_params.push(&page_offset);

        let page = store.all(&paged_query, &page_params, &mut map_row)?;
        if page.is_empty() {
            break;
        }
        let page_len = page.len();

        store
            .transaction(|tx| {
                for row in &page {
                    process(tx, row)?;
                }
                Ok(())
            })
            .map_err(|source| JobError::Transaction { offset, source })?;

        outcome.total_processed += page_len;
        outcome.transactions += 1;
        debug!(
            "Committed page at offset {} ({} rows, {} total)",
            offset, page_len, outcome.total_processed
        );

        if page_len < batch_size {
            break;
        }
        offset += batch_size;

        if !throttle.is_zero() {
            std::thread::sleep(throttle);
        }
    }

    Ok(outcome)
}
