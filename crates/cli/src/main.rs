use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockdash_core::config::env_or;
use stockdash_core::domain::stock::Symbol;
use stockdash_core::ingest::alphavantage::{AlphaVantageClient, AlphaVantageConfig};
use stockdash_core::lookup::{LookupResult, LookupStatus, StockLookup, DEFAULT_PERSIST_RETRIES};
use stockdash_core::storage::memory::MemoryStockStore;
use stockdash_core::storage::{PgStockStore, StockStore};

#[derive(Debug, Parser)]
#[command(name = "stockdash_cli")]
struct Args {
    /// Ticker symbols to look up (fresh cache is served, stale data is refreshed).
    #[arg(required = true)]
    symbols: Vec<String>,

    /// Keep records in process memory instead of DATABASE_URL.
    #[arg(long)]
    in_memory: bool,

    /// Print the full record instead of a one-line summary per symbol.
    #[arg(long)]
    full: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = stockdash_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let symbols = args
        .symbols
        .iter()
        .map(|s| Symbol::parse(s).with_context(|| format!("invalid symbol {s:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let store: Arc<dyn StockStore> = if args.in_memory {
        Arc::new(MemoryStockStore::new())
    } else {
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        stockdash_core::storage::migrate(&pool).await?;
        Arc::new(PgStockStore::new(pool))
    };

    let upstream = AlphaVantageClient::from_config(AlphaVantageConfig::from_settings(&settings))?;
    let lookup = StockLookup::new(store, upstream)
        .with_persist_retries(env_or("STOCK_PERSIST_RETRIES", DEFAULT_PERSIST_RETRIES));

    let mut failures: usize = 0;
    for symbol in &symbols {
        let res = lookup.lookup(symbol).await;
        if res.status == LookupStatus::Error || !res.persisted {
            failures += 1;
        }
        if let Some(err) = &res.error {
            sentry_anyhow::capture_anyhow(&anyhow::anyhow!("stock {symbol}: {err}"));
        }
        println!("{}", render(symbol, &res, args.full)?);
    }

    tracing::info!(total = symbols.len(), failures, "stock lookups finished");
    anyhow::ensure!(failures == 0, "{failures} of {} lookups failed", symbols.len());
    Ok(())
}

fn render(symbol: &Symbol, res: &LookupResult, full: bool) -> anyhow::Result<String> {
    let mut out = serde_json::json!({
        "ticker": symbol,
        "status": res.status,
        "persisted": res.persisted,
        "last_cache_time": res.record.as_ref().and_then(|r| r.last_cache_time),
        "error": res.error.as_ref().map(ToString::to_string),
    });
    if full {
        out["record"] = serde_json::to_value(&res.record)?;
    }
    Ok(out.to_string())
}

fn init_sentry(settings: &stockdash_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
