use anyhow::Context;

pub mod memory;
pub mod stocks;

pub use stocks::{PgStockStore, StockStore};

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
