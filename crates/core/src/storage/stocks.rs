use crate::domain::stock::{StockRecord, Symbol};
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Durable home of [`StockRecord`]s, keyed by symbol.
#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    async fn find_by_symbol(&self, symbol: &Symbol) -> Result<Option<StockRecord>, StorageError>;

    /// Inserts the record or overwrites the existing row for its symbol.
    async fn persist(&self, record: &StockRecord) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
pub struct PgStockStore {
    pool: sqlx::PgPool,
}

impl PgStockStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StockRow {
    symbol: String,
    name: Option<String>,
    description: Option<String>,
    exchange: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
    market_cap: Option<i64>,
    no_shares: Option<i64>,
    trail_pe_ratio: Option<f64>,
    fwd_pe_ratio: Option<f64>,
    d_yield: Option<f64>,
    high_52w: Option<f64>,
    low_52w: Option<f64>,
    eps: Option<Value>,
    timeseries: Option<Value>,
    last_cache_time: Option<DateTime<Utc>>,
}

impl TryFrom<StockRow> for StockRecord {
    type Error = StorageError;

    fn try_from(row: StockRow) -> Result<Self, Self::Error> {
        let symbol = Symbol::parse(&row.symbol)
            .map_err(|e| StorageError::Invalid(format!("symbol {:?}: {e}", row.symbol)))?;

        Ok(StockRecord {
            symbol,
            name: row.name,
            description: row.description,
            exchange: row.exchange,
            sector: row.sector,
            industry: row.industry,
            market_cap: row.market_cap,
            no_shares: row.no_shares,
            trail_pe_ratio: row.trail_pe_ratio,
            fwd_pe_ratio: row.fwd_pe_ratio,
            d_yield: row.d_yield,
            high_52w: row.high_52w,
            low_52w: row.low_52w,
            eps: row.eps,
            last_cache_time: row.last_cache_time,
            timeseries: row.timeseries,
        })
    }
}

#[async_trait::async_trait]
impl StockStore for PgStockStore {
    async fn find_by_symbol(&self, symbol: &Symbol) -> Result<Option<StockRecord>, StorageError> {
        let row = sqlx::query_as::<_, StockRow>(
            "SELECT symbol, name, description, exchange, sector, industry, market_cap, no_shares, \
                    trail_pe_ratio, fwd_pe_ratio, d_yield, high_52w, low_52w, eps, timeseries, last_cache_time \
             FROM stocks \
             WHERE symbol = $1",
        )
        .persistent(false)
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StockRecord::try_from).transpose()
    }

    async fn persist(&self, record: &StockRecord) -> Result<(), StorageError> {
        let t0 = std::time::Instant::now();
        sqlx::query(
            "INSERT INTO stocks (symbol, name, description, exchange, sector, industry, market_cap, no_shares, \
                                 trail_pe_ratio, fwd_pe_ratio, d_yield, high_52w, low_52w, eps, timeseries, last_cache_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (symbol) DO UPDATE SET \
               name = EXCLUDED.name, \
               description = EXCLUDED.description, \
               exchange = EXCLUDED.exchange, \
               sector = EXCLUDED.sector, \
               industry = EXCLUDED.industry, \
               market_cap = EXCLUDED.market_cap, \
               no_shares = EXCLUDED.no_shares, \
               trail_pe_ratio = EXCLUDED.trail_pe_ratio, \
               fwd_pe_ratio = EXCLUDED.fwd_pe_ratio, \
               d_yield = EXCLUDED.d_yield, \
               high_52w = EXCLUDED.high_52w, \
               low_52w = EXCLUDED.low_52w, \
               eps = EXCLUDED.eps, \
               timeseries = EXCLUDED.timeseries, \
               last_cache_time = EXCLUDED.last_cache_time",
        )
        .persistent(false)
        .bind(record.symbol.as_str())
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.exchange)
        .bind(&record.sector)
        .bind(&record.industry)
        .bind(record.market_cap)
        .bind(record.no_shares)
        .bind(record.trail_pe_ratio)
        .bind(record.fwd_pe_ratio)
        .bind(record.d_yield)
        .bind(record.high_52w)
        .bind(record.low_52w)
        .bind(&record.eps)
        .bind(&record.timeseries)
        .bind(record.last_cache_time)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            symbol = %record.symbol,
            elapsed_ms = t0.elapsed().as_millis(),
            "stocks upsert"
        );
        Ok(())
    }
}
