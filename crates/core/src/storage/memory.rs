use crate::domain::stock::{StockRecord, Symbol};
use crate::error::StorageError;
use crate::storage::StockStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

/// Process-local store. Used when running without Postgres and in tests; can be told
/// to fail upcoming writes.
#[derive(Debug, Default)]
pub struct MemoryStockStore {
    records: Mutex<HashMap<Symbol, StockRecord>>,
    failing_persists: AtomicU32,
    persist_calls: AtomicU32,
}

impl MemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = StockRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.symbol.clone(), r))
            .collect::<HashMap<_, _>>();
        Self {
            records: Mutex::new(map),
            ..Self::default()
        }
    }

    /// The next `n` calls to `persist` return [`StorageError::Unavailable`].
    pub fn fail_next_persists(&self, n: u32) {
        self.failing_persists.store(n, Ordering::SeqCst);
    }

    pub fn persist_calls(&self) -> u32 {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StockStore for MemoryStockStore {
    async fn find_by_symbol(&self, symbol: &Symbol) -> Result<Option<StockRecord>, StorageError> {
        Ok(self.records.lock().await.get(symbol).cloned())
    }

    async fn persist(&self, record: &StockRecord) -> Result<(), StorageError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failing_persists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StorageError::Unavailable(
                "injected write failure".to_string(),
            ));
        }

        self.records
            .lock()
            .await
            .insert(record.symbol.clone(), record.clone());
        Ok(())
    }
}
