//! Per-item exclusion for ledger appends

use dashmap::DashMap;
use parking_lot::{Mutex, RawMutex};
use parking_lot::lock_api::ArcMutexGuard;
use std::sync::Arc;

pub type ItemGuard = ArcMutexGuard<RawMutex, ()>;

/// One mutex per item id, created on first use
#[derive(Clone, Default)]
pub struct ItemLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, item_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(item_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock a set of items in sorted order; guards release on drop
    pub fn lock_all<'a>(&self, item_ids: impl IntoIterator<Item = &'a str>) -> Vec<ItemGuard> {
        let mut ids: Vec<&str> = item_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().map(|id| self.handle(id).lock_arc()).collect()
    }
}
