//! Stock counts
//!
//! A count captures the theoretical stock of each line when it is submitted.
//! Completing the count books `counted - theoretical` as a STOCK_ADJUSTMENT
//! for every line with a variance; zero-variance lines emit nothing.

use shared::models::{CountLineInput, Item, StockCount, StockCountLine, StockCountStatus};

use super::{StockEngine, StockError, StockResult};
use crate::db::tables::{ITEMS, STOCK_COUNTS};
use crate::db::{StorageError, get_doc, next_counter, put_doc};

impl StockEngine {
    pub fn start_count(&self, venue_id: &str, actor: &str) -> StockResult<StockCount> {
        let txn = self.storage.begin_write()?;
        let count = {
            let n = next_counter(&txn, "stock_counts")?;
            let count = StockCount {
                id: shared::util::new_id(),
                display_id: shared::util::display_id("SC", n),
                venue_id: venue_id.to_string(),
                status: StockCountStatus::InProgress,
                lines: Vec::new(),
                started_by: actor.to_string(),
                started_at: shared::util::now(),
                completed_at: None,
                adjustments: 0,
            };
            let mut table = txn.open_table(STOCK_COUNTS)?;
            put_doc(&mut table, &count.id, &count)?;
            count
        };
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(count_id = %count.id, display_id = %count.display_id, "Stock count started");
        Ok(count)
    }

    pub fn get_count(&self, count_id: &str) -> StockResult<StockCount> {
        self.storage
            .get(STOCK_COUNTS, count_id)?
            .ok_or_else(|| StockError::StockCountNotFound(count_id.to_string()))
    }

    /// Record (or replace) the counted quantity of one item
    pub fn submit_count_line(
        &self,
        count_id: &str,
        input: CountLineInput,
    ) -> StockResult<StockCount> {
        let _guards = self.locks.lock_all([input.item_id.as_str()]);
        let txn = self.storage.begin_write()?;
        let count = {
            let items = txn.open_table(ITEMS)?;
            let item: Item = get_doc(&items, &input.item_id)?
                .ok_or_else(|| StockError::ItemNotFound(input.item_id.clone()))?;

            let mut table = txn.open_table(STOCK_COUNTS)?;
            let mut count: StockCount = get_doc(&table, count_id)?
                .ok_or_else(|| StockError::StockCountNotFound(count_id.to_string()))?;
            if count.status == StockCountStatus::Completed {
                return Err(StockError::StockCountClosed(count.display_id));
            }
            if item.venue_id != count.venue_id {
                return Err(StockError::ItemNotFound(input.item_id));
            }

            let line = StockCountLine {
                item_id: item.id.clone(),
                counted_qty: input.counted_qty,
                theoretical_qty: item.current_stock,
                variance: input.counted_qty - item.current_stock,
            };
            match count.lines.iter_mut().find(|l| l.item_id == item.id) {
                Some(existing) => *existing = line,
                None => count.lines.push(line),
            }
            put_doc(&mut table, count_id, &count)?;
            count
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(count)
    }

    /// Apply the variances and close the count
    pub fn complete_count(&self, count_id: &str) -> StockResult<StockCount> {
        let count = self.get_count(count_id)?;
        let item_ids: Vec<String> = count.lines.iter().map(|l| l.item_id.clone()).collect();

        self.run(&item_ids, |batch| {
            let txn = batch.txn();
            let mut count: StockCount = {
                let table = txn.open_table(STOCK_COUNTS)?;
                get_doc(&table, count_id)?
                    .ok_or_else(|| StockError::StockCountNotFound(count_id.to_string()))?
            };
            if count.status == StockCountStatus::Completed {
                return Err(StockError::StockCountClosed(count.display_id));
            }

            let mut adjustments = 0;
            for line in &count.lines {
                if batch.adjust(&line.item_id, line.variance, &count.id)?.is_some() {
                    adjustments += 1;
                }
            }

            count.status = StockCountStatus::Completed;
            count.completed_at = Some(batch.at());
            count.adjustments = adjustments;
            let mut table = txn.open_table(STOCK_COUNTS)?;
            put_doc(&mut table, &count.id, &count)?;

            tracing::info!(
                count_id = %count.id,
                lines = count.lines.len(),
                adjustments,
                "Stock count completed"
            );
            Ok(count)
        })
    }
}
