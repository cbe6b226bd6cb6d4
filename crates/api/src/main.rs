use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockdash_core::config::env_or;
use stockdash_core::domain::stock::{StockRecord, Symbol};
use stockdash_core::error::LookupError;
use stockdash_core::ingest::alphavantage::{AlphaVantageClient, AlphaVantageConfig};
use stockdash_core::lookup::{LookupResult, LookupStatus, StockLookup, DEFAULT_PERSIST_RETRIES};
use stockdash_core::storage::PgStockStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = stockdash_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let av_config = AlphaVantageConfig::from_settings(&settings);
    if av_config.is_offline() {
        tracing::warn!("ALPHA_VANTAGE_API_KEY missing; stock refreshes will report offline mode");
    }
    let upstream = AlphaVantageClient::from_config(av_config)?;

    let pool: Option<sqlx::PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match stockdash_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let lookup = pool.map(|pool| {
        Arc::new(
            StockLookup::new(Arc::new(PgStockStore::new(pool)), upstream)
                .with_persist_retries(env_or("STOCK_PERSIST_RETRIES", DEFAULT_PERSIST_RETRIES)),
        )
    });

    let app = router(AppState { lookup });

    let port: u16 = env_or("PORT", 3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stock/:ticker", get(get_stock))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    lookup: Option<Arc<StockLookup>>,
}

/// Record fields flattened next to the lookup status.
#[derive(Debug, Serialize)]
struct StockResponse {
    #[serde(flatten)]
    record: Option<StockRecord>,
    status: LookupStatus,
    persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
}

impl From<LookupResult> for StockResponse {
    fn from(res: LookupResult) -> Self {
        Self {
            record: res.record,
            status: res.status,
            persisted: res.persisted,
            error: res.error.as_ref().map(ToString::to_string),
            error_kind: res.error.as_ref().map(LookupError::kind),
        }
    }
}

async fn get_stock(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<StockResponse>, StatusCode> {
    tracing::debug!(%ticker, "GET /stock");

    let symbol = Symbol::parse(&ticker).map_err(|e| {
        tracing::debug!(%ticker, error = %e, "rejecting malformed ticker");
        StatusCode::BAD_REQUEST
    })?;

    let Some(lookup) = &state.lookup else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let res = lookup.lookup(&symbol).await;
    if let Some(err @ LookupError::Storage(_)) = &res.error {
        sentry_anyhow::capture_anyhow(&anyhow::anyhow!("stock {symbol}: {err}"));
    }

    Ok(Json(res.into()))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
