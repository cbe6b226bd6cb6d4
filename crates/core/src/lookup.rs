use crate::domain::stock::{StockRecord, Symbol};
use crate::error::{LookupError, StorageError};
use crate::ingest::alphavantage::{AlphaVantageClient, FetchOutcome};
use crate::storage::StockStore;
use crate::time::us_market::is_fresh;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PERSIST_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupStatus {
    CachedFresh,
    ApiFresh,
    CachedStale,
    Error,
}

#[derive(Debug)]
pub struct LookupResult {
    pub record: Option<StockRecord>,
    pub status: LookupStatus,
    pub error: Option<LookupError>,
    /// True when the returned record is what the store holds. False for errors and
    /// for fetched data that could not be written back.
    pub persisted: bool,
}

impl LookupResult {
    fn served(record: StockRecord, status: LookupStatus) -> Self {
        Self {
            record: Some(record),
            status,
            error: None,
            persisted: true,
        }
    }

    fn failed(error: LookupError) -> Self {
        Self {
            record: None,
            status: LookupStatus::Error,
            error: Some(error),
            persisted: false,
        }
    }
}

/// Serve-or-refresh decision for a single symbol.
pub struct StockLookup {
    store: Arc<dyn StockStore>,
    upstream: AlphaVantageClient,
    persist_retries: u32,
    persist_backoff: Duration,
}

impl StockLookup {
    pub fn new(store: Arc<dyn StockStore>, upstream: AlphaVantageClient) -> Self {
        let persist_backoff = upstream.config().backoff;
        Self {
            store,
            upstream,
            persist_retries: DEFAULT_PERSIST_RETRIES,
            persist_backoff,
        }
    }

    pub fn with_persist_retries(mut self, retries: u32) -> Self {
        self.persist_retries = retries.max(1);
        self
    }

    pub async fn lookup(&self, symbol: &Symbol) -> LookupResult {
        self.lookup_at(symbol, Utc::now()).await
    }

    pub async fn lookup_at(&self, symbol: &Symbol, now: DateTime<Utc>) -> LookupResult {
        let existing = match self.store.find_by_symbol(symbol).await {
            Ok(existing) => existing,
            Err(err) => {
                tracing::error!(%symbol, error = %err, "stock lookup: storage read failed");
                return LookupResult::failed(err.into());
            }
        };

        if let Some(record) = existing.as_ref() {
            if is_fresh(record.last_cache_time, now) {
                tracing::debug!(%symbol, "stock lookup: serving cached data");
                return LookupResult::served(record.clone(), LookupStatus::CachedFresh);
            }
        }

        let outcome = self.upstream.refresh(symbol).await;
        tracing::debug!(%symbol, outcome = outcome.label(), cached = existing.is_some(), "stock lookup: refresh finished");

        match outcome {
            FetchOutcome::Success(payload) => {
                let mut record = existing.unwrap_or_else(|| StockRecord::new(symbol.clone()));
                record.apply_payload(payload, now);

                match self.persist_with_retry(&record).await {
                    Ok(()) => LookupResult::served(record, LookupStatus::ApiFresh),
                    Err(err) => {
                        tracing::error!(
                            %symbol,
                            error = %err,
                            attempts = self.persist_retries,
                            "stock lookup: fetched data could not be persisted; serving it unsaved"
                        );
                        LookupResult {
                            record: Some(record),
                            status: LookupStatus::ApiFresh,
                            error: Some(err.into()),
                            persisted: false,
                        }
                    }
                }
            }
            FetchOutcome::RateLimited => match existing {
                Some(record) => LookupResult::served(record, LookupStatus::CachedStale),
                None => LookupResult::failed(LookupError::RateLimited),
            },
            FetchOutcome::Empty => LookupResult::failed(LookupError::Empty),
            FetchOutcome::UpstreamError(message) => {
                LookupResult::failed(LookupError::Upstream(message))
            }
            FetchOutcome::TransportError(failure) => {
                LookupResult::failed(LookupError::Transport(failure))
            }
            FetchOutcome::Offline => LookupResult::failed(LookupError::Offline),
        }
    }

    async fn persist_with_retry(&self, record: &StockRecord) -> Result<(), StorageError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.store.persist(record).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.persist_retries => {
                    let backoff = self.persist_backoff * (1u32 << (attempt - 1).min(16));
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        symbol = %record.symbol,
                        error = %err,
                        "stock persist failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
